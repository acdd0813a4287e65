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

//! Interface to the embedded microsimulator.
//!
//! The simulator is an opaque, process-local state machine advanced one
//! tick at a time; only one instance per process is permitted. The
//! partition runtime is the sole writer; handler threads may call the read
//! operations concurrently with the main thread, so implementations must
//! make reads safe against one concurrent writer.
pub mod scripted;

use std::path::PathBuf;

pub use scripted::ScriptedSim;

use crate::error::SimError;

pub type SimResult<T> = Result<T, SimError>;

/// Arguments passed to [Sim::start].
#[derive(Clone, Debug, Default)]
pub struct SimStartArgs {
    /// Path to the simulator configuration of this partition.
    pub cfg: PathBuf,
    /// Where the simulator should dump its per-step network state.
    pub netstate_output: Option<PathBuf>,
    /// Pass-through arguments for the simulator.
    pub extra: Vec<String>,
}

/// Version information reported by a started simulator.
#[derive(Clone, Debug)]
pub struct SimVersion {
    pub api: i32,
    pub name: String,
}

/// The embedded microsimulator.
pub trait Sim: Send + Sync {
    /// Loads the simulation. Must be called exactly once, before any other
    /// operation.
    fn start(&self, args: &SimStartArgs) -> SimResult<SimVersion>;
    /// Whether a simulation is currently loaded.
    fn is_loaded(&self) -> bool;
    /// Advances the simulation by one tick.
    fn step(&self) -> SimResult<()>;
    /// Current simulation time in seconds.
    fn time(&self) -> f64;
    /// Length of one tick in seconds.
    fn delta_t(&self) -> f64;
    /// Number of vehicles currently in the simulation.
    fn vehicle_count(&self) -> usize;
    /// Shuts the simulation down.
    fn close(&self, reason: &str);

    /// Ids of the vehicles that were on the given edge during the last
    /// step.
    fn edge_vehicle_ids(&self, edge_id: &str) -> SimResult<Vec<String>>;
    /// Ids of all vehicles currently in the simulation.
    fn vehicle_ids(&self) -> Vec<String>;
    /// Ids of all loaded routes.
    fn route_ids(&self) -> Vec<String>;

    fn vehicle_route(&self, veh_id: &str) -> SimResult<String>;
    fn vehicle_type(&self, veh_id: &str) -> SimResult<String>;
    fn vehicle_lane(&self, veh_id: &str) -> SimResult<String>;
    fn vehicle_lane_index(&self, veh_id: &str) -> SimResult<i32>;
    fn vehicle_lane_position(&self, veh_id: &str) -> SimResult<f64>;
    fn vehicle_speed(&self, veh_id: &str) -> SimResult<f64>;

    /// Smoothly changes the speed of a vehicle over the given duration.
    fn slow_down(&self, veh_id: &str, speed: f64, duration: f64) -> SimResult<()>;
    /// Inserts a vehicle at the start of the given route ("now" / "first"
    /// lane / "base" position in the upstream API) with the given speed.
    fn add_vehicle(&self, veh_id: &str, route_id: &str, veh_type: &str, speed: f64)
        -> SimResult<()>;
    /// Teleports a vehicle onto a lane at the given position.
    fn move_vehicle_to(&self, veh_id: &str, lane_id: &str, lane_pos: f64) -> SimResult<()>;
}
