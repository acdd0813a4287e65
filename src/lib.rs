// This file is part of Parallel-Sumo.
// Copyright © 2022, 2023, 2024, 2025 André de Palma, Lucas Javaudin
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Parallel-Sumo: runs a traffic microsimulation across cooperating partition
//! processes, each owning a disjoint part of the road network and forwarding
//! vehicles to its neighbors over border edges.
#![doc(html_no_source)]

pub mod coordinator;
pub mod error;
pub mod handler;
pub mod io;
pub mod logging;
pub mod net;
pub mod ops;
pub mod partition;
pub mod progress;
pub mod routes;
pub mod sim;
pub mod stub;
pub mod types;

// Dependencies only used in the bins.
use clap as _;
