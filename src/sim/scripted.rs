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

//! Deterministic scripted simulator.
//!
//! Vehicles move at constant speed down the edge list of their route and
//! leave the simulation at the end of the last edge. The scenario is read
//! from the partition configuration file as JSON. This implementation
//! backs the binaries and the test suite; an embedded SUMO would implement
//! the same [Sim] trait.
use std::sync::Mutex;

use hashbrown::HashMap;
use serde::Deserialize;

use super::{Sim, SimResult, SimStartArgs, SimVersion};
use crate::error::SimError;
use crate::io::read_json;

const API_VERSION: i32 = 1;

/// Scenario file of one partition.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default = "default_delta_t")]
    pub delta_t: f64,
    pub edges: Vec<ScenarioEdge>,
    pub routes: Vec<ScenarioRoute>,
    #[serde(default)]
    pub vehicles: Vec<ScenarioVehicle>,
}

fn default_delta_t() -> f64 {
    1.0
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioEdge {
    pub id: String,
    pub length: f64,
    #[serde(default = "default_lanes")]
    pub lanes: u32,
}

fn default_lanes() -> u32 {
    1
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRoute {
    pub id: String,
    pub edges: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioVehicle {
    pub id: String,
    pub route: String,
    #[serde(default = "default_veh_type")]
    pub veh_type: String,
    #[serde(default)]
    pub depart: f64,
    pub speed: f64,
}

fn default_veh_type() -> String {
    "car".to_owned()
}

/// A vehicle insertion served by this simulator, kept for inspection after
/// the run.
#[derive(Clone, Debug, PartialEq)]
pub struct AddRecord {
    pub time: f64,
    pub veh_id: String,
    pub route_id: String,
    pub veh_type: String,
    pub lane_id: String,
    pub lane_pos: f64,
    pub speed: f64,
}

#[derive(Clone, Debug)]
struct EdgeDef {
    length: f64,
    lanes: u32,
}

#[derive(Clone, Debug)]
struct VehicleState {
    route_id: String,
    veh_type: String,
    edge_index: usize,
    lane_index: i32,
    lane_pos: f64,
    speed: f64,
}

#[derive(Debug, Default)]
struct State {
    loaded: bool,
    time: f64,
    delta_t: f64,
    edges: HashMap<String, EdgeDef>,
    routes: HashMap<String, Vec<String>>,
    pending: Vec<ScenarioVehicle>,
    vehicles: HashMap<String, VehicleState>,
    arrived: Vec<String>,
    journal: Vec<AddRecord>,
}

/// Deterministic scripted [Sim].
#[derive(Debug, Default)]
pub struct ScriptedSim {
    state: Mutex<State>,
}

impl ScriptedSim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a scenario directly, bypassing the configuration file.
    pub fn load_scenario(&self, scenario: Scenario) -> SimResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.loaded {
            return Err(SimError::Load("simulation already loaded".to_owned()));
        }
        *state = State::from_scenario(scenario)?;
        Ok(())
    }

    /// Vehicle insertions served so far, surviving [Sim::close].
    pub fn added(&self) -> Vec<AddRecord> {
        self.state.lock().unwrap().journal.clone()
    }

    /// Ids of the vehicles that completed their local route, in arrival
    /// order, surviving [Sim::close].
    pub fn arrived(&self) -> Vec<String> {
        self.state.lock().unwrap().arrived.clone()
    }

    /// Current `(vehicle, edge, position)` triples, sorted by vehicle id.
    pub fn positions(&self) -> Vec<(String, String, f64)> {
        let state = self.state.lock().unwrap();
        let mut result: Vec<_> = state
            .vehicles
            .iter()
            .map(|(id, veh)| {
                let edge = state.routes[&veh.route_id][veh.edge_index].clone();
                (id.clone(), edge, veh.lane_pos)
            })
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl State {
    fn from_scenario(scenario: Scenario) -> SimResult<Self> {
        let edges: HashMap<String, EdgeDef> = scenario
            .edges
            .into_iter()
            .map(|e| {
                (
                    e.id,
                    EdgeDef {
                        length: e.length,
                        lanes: e.lanes,
                    },
                )
            })
            .collect();
        let routes: HashMap<String, Vec<String>> = scenario
            .routes
            .into_iter()
            .map(|r| (r.id, r.edges))
            .collect();
        for (route_id, route_edges) in &routes {
            if route_edges.is_empty() {
                return Err(SimError::Load(format!("route `{route_id}` has no edges")));
            }
            for edge in route_edges {
                if !edges.contains_key(edge) {
                    return Err(SimError::Load(format!(
                        "route `{route_id}` references unknown edge `{edge}`"
                    )));
                }
            }
        }
        for vehicle in &scenario.vehicles {
            if !routes.contains_key(&vehicle.route) {
                return Err(SimError::Load(format!(
                    "vehicle `{}` references unknown route `{}`",
                    vehicle.id, vehicle.route
                )));
            }
        }
        let mut pending = scenario.vehicles;
        pending.sort_by(|a, b| a.depart.total_cmp(&b.depart));
        Ok(State {
            loaded: true,
            time: 0.0,
            delta_t: scenario.delta_t,
            edges,
            routes,
            pending,
            vehicles: HashMap::new(),
            arrived: Vec::new(),
            journal: Vec::new(),
        })
    }

    fn vehicle(&self, veh_id: &str) -> SimResult<&VehicleState> {
        self.vehicles
            .get(veh_id)
            .ok_or_else(|| SimError::Read(format!("unknown vehicle `{veh_id}`")))
    }

    fn current_edge(&self, veh: &VehicleState) -> &str {
        &self.routes[&veh.route_id][veh.edge_index]
    }

    fn spawn_departures(&mut self) {
        while let Some(next) = self.pending.first() {
            if next.depart > self.time {
                break;
            }
            let vehicle = self.pending.remove(0);
            self.vehicles.insert(
                vehicle.id,
                VehicleState {
                    route_id: vehicle.route,
                    veh_type: vehicle.veh_type,
                    edge_index: 0,
                    lane_index: 0,
                    lane_pos: 0.0,
                    speed: vehicle.speed,
                },
            );
        }
    }

    fn advance_vehicles(&mut self) {
        let mut finished = Vec::new();
        let routes = &self.routes;
        let edges = &self.edges;
        for (veh_id, veh) in self.vehicles.iter_mut() {
            let route = &routes[&veh.route_id];
            let mut remaining = veh.speed * self.delta_t;
            loop {
                let length = edges[&route[veh.edge_index]].length;
                if veh.lane_pos + remaining < length {
                    veh.lane_pos += remaining;
                    break;
                }
                remaining -= length - veh.lane_pos;
                veh.lane_pos = 0.0;
                veh.edge_index += 1;
                if veh.edge_index == route.len() {
                    finished.push(veh_id.clone());
                    break;
                }
            }
        }
        finished.sort();
        for veh_id in finished {
            self.vehicles.remove(&veh_id);
            self.arrived.push(veh_id);
        }
    }
}

impl Sim for ScriptedSim {
    fn start(&self, args: &SimStartArgs) -> SimResult<SimVersion> {
        let scenario: Scenario = read_json(&args.cfg)
            .map_err(|e| SimError::Load(format!("reading `{}`: {e:#}", args.cfg.display())))?;
        self.load_scenario(scenario)?;
        Ok(SimVersion {
            api: API_VERSION,
            name: "ScriptedSim".to_owned(),
        })
    }

    fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().loaded
    }

    fn step(&self) -> SimResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.loaded {
            return Err(SimError::Write("simulation is not loaded".to_owned()));
        }
        state.time += state.delta_t;
        state.spawn_departures();
        state.advance_vehicles();
        Ok(())
    }

    fn time(&self) -> f64 {
        self.state.lock().unwrap().time
    }

    fn delta_t(&self) -> f64 {
        self.state.lock().unwrap().delta_t
    }

    fn vehicle_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.vehicles.len() + state.pending.len()
    }

    fn close(&self, _reason: &str) {
        self.state.lock().unwrap().loaded = false;
    }

    fn edge_vehicle_ids(&self, edge_id: &str) -> SimResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        if !state.edges.contains_key(edge_id) {
            return Err(SimError::Read(format!("unknown edge `{edge_id}`")));
        }
        let mut ids: Vec<String> = state
            .vehicles
            .iter()
            .filter(|(_, veh)| state.current_edge(veh) == edge_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn vehicle_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().unwrap().vehicles.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn route_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().unwrap().routes.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn vehicle_route(&self, veh_id: &str) -> SimResult<String> {
        let state = self.state.lock().unwrap();
        Ok(state.vehicle(veh_id)?.route_id.clone())
    }

    fn vehicle_type(&self, veh_id: &str) -> SimResult<String> {
        let state = self.state.lock().unwrap();
        Ok(state.vehicle(veh_id)?.veh_type.clone())
    }

    fn vehicle_lane(&self, veh_id: &str) -> SimResult<String> {
        let state = self.state.lock().unwrap();
        let veh = state.vehicle(veh_id)?;
        Ok(format!("{}_{}", state.current_edge(veh), veh.lane_index))
    }

    fn vehicle_lane_index(&self, veh_id: &str) -> SimResult<i32> {
        let state = self.state.lock().unwrap();
        Ok(state.vehicle(veh_id)?.lane_index)
    }

    fn vehicle_lane_position(&self, veh_id: &str) -> SimResult<f64> {
        let state = self.state.lock().unwrap();
        Ok(state.vehicle(veh_id)?.lane_pos)
    }

    fn vehicle_speed(&self, veh_id: &str) -> SimResult<f64> {
        let state = self.state.lock().unwrap();
        Ok(state.vehicle(veh_id)?.speed)
    }

    fn slow_down(&self, veh_id: &str, speed: f64, _duration: f64) -> SimResult<()> {
        let mut state = self.state.lock().unwrap();
        let veh = state
            .vehicles
            .get_mut(veh_id)
            .ok_or_else(|| SimError::Write(format!("unknown vehicle `{veh_id}`")))?;
        veh.speed = speed;
        Ok(())
    }

    fn add_vehicle(
        &self,
        veh_id: &str,
        route_id: &str,
        veh_type: &str,
        speed: f64,
    ) -> SimResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.vehicles.contains_key(veh_id) {
            return Err(SimError::Write(format!("vehicle `{veh_id}` already exists")));
        }
        let first_edge = state
            .routes
            .get(route_id)
            .ok_or_else(|| SimError::Write(format!("unknown route `{route_id}`")))?[0]
            .clone();
        state.vehicles.insert(
            veh_id.to_owned(),
            VehicleState {
                route_id: route_id.to_owned(),
                veh_type: veh_type.to_owned(),
                edge_index: 0,
                lane_index: 0,
                lane_pos: 0.0,
                speed,
            },
        );
        let time = state.time;
        state.journal.push(AddRecord {
            time,
            veh_id: veh_id.to_owned(),
            route_id: route_id.to_owned(),
            veh_type: veh_type.to_owned(),
            lane_id: format!("{first_edge}_0"),
            lane_pos: 0.0,
            speed,
        });
        Ok(())
    }

    fn move_vehicle_to(&self, veh_id: &str, lane_id: &str, lane_pos: f64) -> SimResult<()> {
        let mut state = self.state.lock().unwrap();
        let (edge_id, lane_index) = lane_id
            .rsplit_once('_')
            .and_then(|(edge, idx)| idx.parse::<i32>().ok().map(|idx| (edge.to_owned(), idx)))
            .ok_or_else(|| SimError::Write(format!("malformed lane id `{lane_id}`")))?;
        let edge_lanes = state
            .edges
            .get(&edge_id)
            .ok_or_else(|| SimError::Write(format!("unknown edge `{edge_id}`")))?
            .lanes;
        if lane_index < 0 || lane_index as u32 >= edge_lanes {
            return Err(SimError::Write(format!("no lane `{lane_id}`")));
        }
        let route_id = state
            .vehicle(veh_id)
            .map_err(|_| SimError::Write(format!("unknown vehicle `{veh_id}`")))?
            .route_id
            .clone();
        let edge_index = state.routes[&route_id]
            .iter()
            .position(|edge| *edge == edge_id)
            .ok_or_else(|| {
                SimError::Write(format!(
                    "edge `{edge_id}` is not on route `{route_id}` of vehicle `{veh_id}`"
                ))
            })?;
        let veh = state.vehicles.get_mut(veh_id).unwrap();
        veh.edge_index = edge_index;
        veh.lane_index = lane_index;
        veh.lane_pos = lane_pos;
        if let Some(record) = state
            .journal
            .iter_mut()
            .rev()
            .find(|record| record.veh_id == veh_id)
        {
            record.lane_id = lane_id.to_owned();
            record.lane_pos = lane_pos;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario {
            delta_t: 1.0,
            edges: vec![
                ScenarioEdge {
                    id: "A".to_owned(),
                    length: 20.0,
                    lanes: 1,
                },
                ScenarioEdge {
                    id: "E".to_owned(),
                    length: 30.0,
                    lanes: 2,
                },
            ],
            routes: vec![ScenarioRoute {
                id: "R".to_owned(),
                edges: vec!["A".to_owned(), "E".to_owned()],
            }],
            vehicles: vec![ScenarioVehicle {
                id: "v0".to_owned(),
                route: "R".to_owned(),
                veh_type: "car".to_owned(),
                depart: 0.0,
                speed: 10.0,
            }],
        }
    }

    #[test]
    fn constant_speed_motion_test() {
        let sim = ScriptedSim::new();
        sim.load_scenario(scenario()).unwrap();
        // t=1: 10m into A; t=2: 20m -> crosses onto E at 0m.
        sim.step().unwrap();
        assert_eq!(sim.vehicle_lane("v0").unwrap(), "A_0");
        assert_eq!(sim.vehicle_lane_position("v0").unwrap(), 10.0);
        sim.step().unwrap();
        assert_eq!(sim.vehicle_lane("v0").unwrap(), "E_0");
        assert_eq!(sim.edge_vehicle_ids("E").unwrap(), vec!["v0"]);
        // t=5: 30m past the start of E, the route ends.
        sim.step().unwrap();
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.vehicle_count(), 0);
        assert_eq!(sim.arrived(), vec!["v0"]);
    }

    #[test]
    fn add_and_move_test() {
        let sim = ScriptedSim::new();
        sim.load_scenario(Scenario {
            vehicles: vec![],
            ..scenario()
        })
        .unwrap();
        sim.add_vehicle("w1", "R", "car", 5.0).unwrap();
        sim.move_vehicle_to("w1", "E_1", 3.5).unwrap();
        assert_eq!(sim.vehicle_lane("w1").unwrap(), "E_1");
        assert_eq!(sim.vehicle_lane_position("w1").unwrap(), 3.5);
        let added = sim.added();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].lane_id, "E_1");
        assert_eq!(added[0].lane_pos, 3.5);
        // Duplicate insertion is a write error.
        assert!(matches!(
            sim.add_vehicle("w1", "R", "car", 5.0),
            Err(SimError::Write(_))
        ));
        // Unknown route is a write error.
        assert!(matches!(
            sim.add_vehicle("w2", "nope", "car", 5.0),
            Err(SimError::Write(_))
        ));
    }

    #[test]
    fn read_errors_test() {
        let sim = ScriptedSim::new();
        sim.load_scenario(scenario()).unwrap();
        assert!(matches!(
            sim.edge_vehicle_ids("missing"),
            Err(SimError::Read(_))
        ));
        assert!(matches!(sim.vehicle_speed("ghost"), Err(SimError::Read(_))));
    }
}
