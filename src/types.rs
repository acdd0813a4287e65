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

//! Shared types of the runtime.
use serde::{Deserialize, Serialize};

/// Identifier of a network partition, stable for the whole run.
pub type PartitionId = i32;

/// A road edge shared by two partitions.
///
/// Directional: an undirected road shared by two partitions yields two
/// records, one per direction. A partition splits its border edges into
/// incoming (`to == self`) and outgoing (`from == self`).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BorderEdge {
    /// Edge identifier, present in both partitions' networks.
    pub id: String,
    /// Identifiers of the lanes of the edge.
    pub lanes: Vec<String>,
    /// Partition the edge leads out of.
    pub from: PartitionId,
    /// Partition the edge leads into.
    pub to: PartitionId,
}

/// A buffered vehicle-insertion operation, as carried by the `ADD_VEHICLE`
/// request.
#[derive(Clone, Debug, PartialEq)]
pub struct AddVehicle {
    pub veh_id: String,
    pub route_id: String,
    pub veh_type: String,
    pub lane_id: String,
    pub lane_index: i32,
    pub lane_pos: f64,
    pub speed: f64,
}

/// A buffered vehicle-speed operation, as carried by the `SET_VEHICLE_SPEED`
/// request.
#[derive(Clone, Debug, PartialEq)]
pub struct SetSpeed {
    pub veh_id: String,
    pub speed: f64,
}
