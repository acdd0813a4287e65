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

//! The per-partition runtime.
//!
//! Drives the simulator tick loop, scans the outgoing border edges,
//! forwards crossing vehicles to the neighbor partitions, participates in
//! the coordinator's barriers and applies the writes buffered by the
//! neighbor handlers between ticks.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use hashbrown::{HashMap, HashSet};
use log::{debug, error, info, warn};

use crate::error::NetError;
use crate::handler::NeighborHandler;
use crate::io::PartitionData;
use crate::net::endpoint::{Endpoint, Transport};
use crate::net::frame::{decode_bool_reply, SyncRequest};
use crate::net::socket::ReqSocket;
use crate::routes::{split_part_suffix, MultipartIndex, RouteMetadata};
use crate::sim::{Sim, SimResult, SimStartArgs};
use crate::stub::NeighborStub;
use crate::types::{AddVehicle, BorderEdge, PartitionId};

/// How long startup connections may wait for the peer to bind.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration of a partition runtime.
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    pub data_dir: PathBuf,
    pub transport: Transport,
    /// Simulation time to end at; negative means the run is driven by all
    /// partitions becoming empty.
    pub end_time: i32,
    /// Write `simtime<i>.txt` and `commtime<i>.txt` at the end of the run.
    pub measure_times: bool,
    /// Write a per-tick `stepVehicles<i>.csv`.
    pub log_step_vehicles: bool,
    /// Write a per-tick `msgNum<i>.csv`.
    pub log_msg_counts: bool,
    /// Pass-through arguments for the simulator.
    pub sim_args: Vec<String>,
}

impl RuntimeOptions {
    pub fn new(data_dir: PathBuf) -> Self {
        RuntimeOptions {
            data_dir,
            transport: Transport::default(),
            end_time: -1,
            measure_times: false,
            log_step_vehicles: false,
            log_msg_counts: false,
            sim_args: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct VehicleCache {
    ids: HashSet<String>,
    fresh: bool,
}

/// State of a partition shared between the main thread and the neighbor
/// handler threads.
///
/// The simulator itself is only written by the main thread (during the
/// step and the drain phase); handlers call the read operations. The
/// vehicle-id cache is rebuilt lazily on the first `hasVehicle` of a tick.
pub struct PartitionCore {
    id: PartitionId,
    sim: Arc<dyn Sim>,
    routes: RouteMetadata,
    multipart: OnceLock<MultipartIndex>,
    /// Per vehicle, the highest route part this partition has placed it
    /// on. Only populated for multipart routes.
    progress: Mutex<HashMap<String, u32>>,
    vehicle_cache: Mutex<VehicleCache>,
    msg_in: AtomicUsize,
    msg_out: AtomicUsize,
}

impl PartitionCore {
    pub fn new(id: PartitionId, sim: Arc<dyn Sim>, routes: RouteMetadata) -> Self {
        PartitionCore {
            id,
            sim,
            routes,
            multipart: OnceLock::new(),
            progress: Mutex::new(HashMap::new()),
            vehicle_cache: Mutex::new(VehicleCache::default()),
            msg_in: AtomicUsize::new(0),
            msg_out: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn sim(&self) -> &dyn Sim {
        &*self.sim
    }

    pub fn routes(&self) -> &RouteMetadata {
        &self.routes
    }

    /// Derives the multipart-route index from the simulator's route list.
    /// Called once after the simulator has started.
    pub fn index_routes(&self) {
        let _ = self
            .multipart
            .set(MultipartIndex::from_route_ids(&self.sim.route_ids()));
    }

    fn multipart(&self) -> &MultipartIndex {
        self.multipart
            .get_or_init(|| MultipartIndex::from_route_ids(&self.sim.route_ids()))
    }

    /// Vehicles on the given edge during the last step; a read failure is
    /// logged and treated as no data.
    pub fn edge_vehicles(&self, edge_id: &str) -> Vec<String> {
        match self.sim.edge_vehicle_ids(edge_id) {
            Ok(vehicles) => vehicles,
            Err(e) => {
                warn!("Manager {}: getEdgeVehicles({edge_id}) failed: {e}", self.id);
                Vec::new()
            }
        }
    }

    /// Whether the given vehicle is currently in the local simulation.
    pub fn has_vehicle(&self, veh_id: &str) -> bool {
        let mut cache = self.vehicle_cache.lock().unwrap();
        if !cache.fresh {
            cache.ids = self.sim.vehicle_ids().into_iter().collect();
            cache.fresh = true;
        }
        cache.ids.contains(veh_id)
    }

    /// Whether the given vehicle is on the given local edge.
    pub fn has_vehicle_in_edge(&self, veh_id: &str, edge_id: &str) -> bool {
        self.edge_vehicles(edge_id).iter().any(|id| id == veh_id)
    }

    /// Applies a buffered speed change through `slowDown`, spread over one
    /// tick.
    pub fn set_vehicle_speed(&self, veh_id: &str, speed: f64) -> SimResult<()> {
        self.sim.slow_down(veh_id, speed, self.sim.delta_t())
    }

    /// Inserts a vehicle transferred from a neighbor partition.
    ///
    /// For multipart routes the transferred id is the base id; the local
    /// segment is chosen from the vehicle's part progress. A missing
    /// segment means the vehicle already completed all its local parts
    /// here, i.e. it reached its global destination, and the insertion is
    /// skipped.
    pub fn add_vehicle(&self, op: &AddVehicle) -> SimResult<()> {
        let Some(route_id) = self.adapt_route(&op.veh_id, &op.route_id) else {
            debug!(
                "Manager {}: vehicle {} completed its route, skipping insertion",
                self.id, op.veh_id
            );
            return Ok(());
        };
        self.sim
            .add_vehicle(&op.veh_id, &route_id, &op.veh_type, op.speed)?;
        if let Err(e) = self
            .sim
            .move_vehicle_to(&op.veh_id, &op.lane_id, op.lane_pos)
        {
            warn!(
                "Manager {}: moveTo({}, {}, {}) failed: {e} (still continuing)",
                self.id, op.veh_id, op.lane_id, op.lane_pos
            );
        }
        let mut cache = self.vehicle_cache.lock().unwrap();
        if cache.fresh {
            cache.ids.insert(op.veh_id.clone());
        }
        Ok(())
    }

    fn adapt_route(&self, veh_id: &str, base: &str) -> Option<String> {
        let multipart = self.multipart();
        if !multipart.is_multipart(base) {
            return Some(base.to_owned());
        }
        let mut progress = self.progress.lock().unwrap();
        let k = match progress.get(veh_id) {
            // The vehicle left this partition before and came back: it
            // continues on the next local segment.
            Some(&k) => k + 1,
            // First crossing-in: the vehicle continues on the first
            // segment this partition owns.
            None => multipart.first_local_part(base)?,
        };
        match multipart.local_part_id(base, k) {
            Some(route_id) => {
                progress.insert(veh_id.to_owned(), k);
                Some(route_id)
            }
            None => {
                progress.remove(veh_id);
                None
            }
        }
    }

    /// Records the route part a scanned outgoing vehicle is currently on.
    pub fn note_scanned_part(&self, veh_id: &str, k: u32) {
        self.progress.lock().unwrap().insert(veh_id.to_owned(), k);
    }

    /// Invalidates the vehicle-id cache; called after each step.
    pub fn invalidate_vehicle_cache(&self) {
        self.vehicle_cache.lock().unwrap().fresh = false;
    }

    /// Whether this partition looks done: past the last scheduled
    /// departure and out of vehicles.
    pub fn is_maybe_finished(&self) -> bool {
        self.sim.time() > self.routes.last_depart_time + 1.0 && self.sim.vehicle_count() == 0
    }

    pub fn count_message_in(&self) {
        self.msg_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_message_out(&self) {
        self.msg_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns and resets the per-tick message counters.
    pub fn take_message_counts(&self) -> (usize, usize) {
        (
            self.msg_in.swap(0, Ordering::Relaxed),
            self.msg_out.swap(0, Ordering::Relaxed),
        )
    }
}

/// The runtime of one partition process.
pub struct PartitionRuntime {
    core: Arc<PartitionCore>,
    opts: RuntimeOptions,
    cfg: PathBuf,
    neighbors: Vec<PartitionId>,
    stubs: BTreeMap<PartitionId, NeighborStub>,
    handlers: BTreeMap<PartitionId, NeighborHandler>,
    coordinator: Option<ReqSocket>,
    incoming_edges: Vec<BorderEdge>,
    outgoing_edges: Vec<BorderEdge>,
    /// All partitions reported empty at the last step barrier.
    finished: bool,
}

impl PartitionRuntime {
    /// Builds the runtime: splits the border edges, binds one handler and
    /// prepares one stub per neighbor. Nothing is connected yet.
    pub fn new(
        sim: Arc<dyn Sim>,
        data: &PartitionData,
        cfg: PathBuf,
        opts: RuntimeOptions,
    ) -> Result<Self, NetError> {
        let id = data.id;
        let routes = RouteMetadata::from_partition_data(data);
        let core = Arc::new(PartitionCore::new(id, sim, routes));

        let mut incoming_edges = Vec::new();
        let mut outgoing_edges = Vec::new();
        for edge in &data.border_edges {
            if edge.to == id {
                incoming_edges.push(edge.clone());
            } else if edge.from == id {
                outgoing_edges.push(edge.clone());
            }
        }

        let mut stubs = BTreeMap::new();
        let mut handlers = BTreeMap::new();
        for &neighbor in &data.neighbors {
            stubs.insert(
                neighbor,
                NeighborStub::new(id, neighbor, opts.transport, &opts.data_dir),
            );
            handlers.insert(
                neighbor,
                NeighborHandler::start(Arc::clone(&core), neighbor, opts.transport, &opts.data_dir)?,
            );
        }

        debug!(
            "Manager {id}: initialized, lastDepartTime={}, cfg={}",
            core.routes().last_depart_time,
            cfg.display()
        );
        Ok(PartitionRuntime {
            core,
            opts,
            cfg,
            neighbors: data.neighbors.clone(),
            stubs,
            handlers,
            coordinator: None,
            incoming_edges,
            outgoing_edges,
            finished: false,
        })
    }

    pub fn core(&self) -> &Arc<PartitionCore> {
        &self.core
    }

    /// Runs the partition to completion: simulator startup, the barrier
    /// handshake, the tick loop and the teardown rendezvous.
    pub fn run(&mut self) -> Result<()> {
        let id = self.core.id();
        let start_args = SimStartArgs {
            cfg: self.cfg.clone(),
            netstate_output: Some(self.opts.data_dir.join(format!("output{id}.xml"))),
            extra: self.opts.sim_args.clone(),
        };
        let version = self
            .core
            .sim()
            .start(&start_args)
            .context("Simulation failed to load")?;
        if !self.core.sim().is_loaded() {
            bail!("Simulation failed to load");
        }
        info!(
            "Manager {id}: simulation loaded with {} starting vehicles, ver. {} - {}",
            self.core.sim().vehicle_count(),
            version.api,
            version.name
        );
        self.core.index_routes();

        // Make sure every handler is reachable before any stub connects.
        let sync_endpoint = Endpoint::sync(self.opts.transport, &self.opts.data_dir, id);
        self.coordinator = Some(
            ReqSocket::connect_retry(&sync_endpoint, CONNECT_TIMEOUT)
                .context("Failed to connect to the coordinator")?,
        );
        self.arrive_wait_barrier()?;
        for stub in self.stubs.values_mut() {
            stub.connect()
                .context("Failed to connect a partition stub")?;
        }
        for handler in self.handlers.values() {
            handler.listen_on();
        }
        info!("-- partition {id} started in process {} --", std::process::id());

        self.tick_loop().context("Partition tick loop failed")?;

        debug!("Manager {id}: simulation done, barrier then closing connections");
        self.arrive_wait_barrier()?;
        for neighbor in self.neighbors.clone() {
            if let Some(handler) = self.handlers.get(&neighbor) {
                handler.stop();
            }
            if let Some(stub) = self.stubs.get_mut(&neighbor) {
                stub.disconnect();
            }
        }
        for handler in self.handlers.values_mut() {
            handler.join();
        }
        info!("Manager {id}: finished");
        self.signal_finish()?;
        self.coordinator = None;
        self.core.sim().close("Parallel-Sumo terminated.");
        Ok(())
    }

    fn is_finished(&self) -> bool {
        if self.opts.end_time > -1 {
            self.core.sim().time() >= self.opts.end_time as f64
        } else {
            self.finished
        }
    }

    fn tick_loop(&mut self) -> Result<()> {
        let id = self.core.id();
        let data_dir = self.opts.data_dir.clone();

        let mut step_vehicles_file = if self.opts.log_step_vehicles {
            let mut file = File::create(data_dir.join(format!("stepVehicles{id}.csv")))?;
            writeln!(file, "time,vehNo")?;
            Some(file)
        } else {
            None
        };
        let mut msg_counts_file = if self.opts.log_msg_counts {
            let mut file = File::create(data_dir.join(format!("msgNum{id}.csv")))?;
            writeln!(file, "time,msgs_in,msgs_out")?;
            Some(file)
        } else {
            None
        };

        let mut sim_time = Duration::ZERO;
        let mut comm_time = Duration::ZERO;
        let mut prev_incoming = vec![Vec::new(); self.incoming_edges.len()];
        let mut prev_outgoing = vec![Vec::new(); self.outgoing_edges.len()];

        while !self.is_finished() {
            let before = Instant::now();
            self.core.sim().step().context("Simulation step failed")?;
            sim_time += before.elapsed();

            self.core.invalidate_vehicle_cache();
            if self.opts.end_time >= 0 {
                debug!(
                    "Manager {id}: step done ({}/{})",
                    self.core.sim().time() as i64,
                    self.opts.end_time
                );
            } else {
                debug!("Manager {id}: step done ({})", self.core.sim().time() as i64);
            }

            if let Some(file) = step_vehicles_file.as_mut() {
                writeln!(
                    file,
                    "{},{}",
                    self.core.sim().time(),
                    self.core.sim().vehicle_count()
                )?;
            }

            let before = Instant::now();
            self.handle_incoming_edges(&mut prev_incoming);
            self.handle_outgoing_edges(&mut prev_outgoing);
            comm_time += before.elapsed();

            // Every time step across partitions is synchronized here.
            self.finish_step_wait()?;

            // Writes buffered by the handlers during the tick are applied
            // now, with every handler quiesced, so they cannot race the
            // step or the border scans.
            self.drain_neighbor_operations();

            if let Some(file) = msg_counts_file.as_mut() {
                let (msgs_in, msgs_out) = self.core.take_message_counts();
                writeln!(file, "{},{msgs_in},{msgs_out}", self.core.sim().time())?;
            }
        }

        if self.opts.measure_times {
            let duration = sim_time.as_secs_f64();
            info!("Manager {id}: took {duration:.3}s for simulation, writing to file");
            std::fs::write(data_dir.join(format!("simtime{id}.txt")), format!("{duration}\n"))?;
            let duration = comm_time.as_secs_f64();
            info!("Manager {id}: took {duration:.3}s for communication, writing to file");
            std::fs::write(data_dir.join(format!("commtime{id}.txt")), format!("{duration}\n"))?;
        }
        Ok(())
    }

    /// Hook for slowing down the shadow copy of a vehicle on the upstream
    /// partition, using the incoming border edges. Disabled while its
    /// effect on accuracy is evaluated; the protocol operations it needs
    /// are all served.
    fn handle_incoming_edges(&mut self, _prev_incoming: &mut [Vec<String>]) {}

    /// Scans the outgoing border edges and forwards vehicles that crossed
    /// to the owning neighbor.
    fn handle_outgoing_edges(&mut self, prev_outgoing: &mut [Vec<String>]) {
        let id = self.core.id();
        let core = &self.core;
        for (edge_idx, edge) in self.outgoing_edges.iter().enumerate() {
            let edge_vehicles = core.edge_vehicles(&edge.id);
            if !edge_vehicles.is_empty() {
                let Some(to_routes) = core.routes().neighbor_routes.get(&edge.to) else {
                    // No routes cross to this neighbor at all.
                    prev_outgoing[edge_idx] = edge_vehicles;
                    continue;
                };
                let Some(routes_ending_in_edge) = core.routes().route_ends_in_edge.get(&edge.id)
                else {
                    // No local route segment ends on this edge, so no
                    // vehicle passes over from here.
                    prev_outgoing[edge_idx] = edge_vehicles;
                    continue;
                };
                let Some(stub) = self.stubs.get_mut(&edge.to) else {
                    error!("Manager {id}: no stub for neighbor {}", edge.to);
                    continue;
                };

                for veh_id in &edge_vehicles {
                    let route = match core.sim().vehicle_route(veh_id) {
                        Ok(route) => route,
                        Err(e) => {
                            warn!("Manager {id}: getRouteID({veh_id}) failed: {e}");
                            continue;
                        }
                    };
                    // Pass just the base route id to the neighbor.
                    let base = match split_part_suffix(&route) {
                        Some((base, k, _)) => {
                            core.note_scanned_part(veh_id, k);
                            base.to_owned()
                        }
                        None => route,
                    };

                    if !to_routes.contains(&base) {
                        // The vehicle does not pass to this neighbor.
                        continue;
                    }
                    if !routes_ending_in_edge.contains(&base) {
                        // The vehicle passes to the neighbor, but not from
                        // this edge.
                        continue;
                    }
                    if prev_outgoing[edge_idx].iter().any(|prev| prev == veh_id) {
                        // Already on this edge last tick, transferred then.
                        continue;
                    }

                    let already_in_target = match stub.has_vehicle(veh_id) {
                        Ok(found) => {
                            core.count_message_out();
                            found
                        }
                        Err(e) => {
                            error!("Manager {id}: hasVehicle({veh_id}) on neighbor {} failed: {e}", edge.to);
                            continue;
                        }
                    };
                    if already_in_target {
                        continue;
                    }

                    let op = match describe_vehicle(core.sim(), veh_id, &base) {
                        Ok(op) => op,
                        Err(e) => {
                            warn!("Manager {id}: failed to read state of vehicle {veh_id}: {e}");
                            continue;
                        }
                    };
                    match stub.add_vehicle(&op) {
                        Ok(()) => core.count_message_out(),
                        Err(e) => {
                            error!("Manager {id}: exception in adding vehicle: {e}");
                        }
                    }
                }
            }
            prev_outgoing[edge_idx] = edge_vehicles;
        }
    }

    /// Quiesces every handler, replays the buffered writes into the
    /// simulator and reopens the handlers.
    fn drain_neighbor_operations(&self) {
        for handler in self.handlers.values() {
            handler.listen_off();
        }
        for handler in self.handlers.values() {
            handler.wait_idle();
        }
        for handler in self.handlers.values() {
            handler.apply_mutable_operations();
        }
        for handler in self.handlers.values() {
            handler.listen_on();
        }
    }

    fn coordinator_request(&mut self, request: SyncRequest) -> Result<Vec<u8>, NetError> {
        let socket = self.coordinator.as_mut().ok_or(NetError::NotConnected)?;
        socket.request(&request.encode())
    }

    /// Blocks until every partition reached the barrier.
    fn arrive_wait_barrier(&mut self) -> Result<(), NetError> {
        debug!("Manager {}: waiting for barrier", self.core.id());
        self.coordinator_request(SyncRequest::Barrier)?;
        debug!("Manager {}: reached barrier", self.core.id());
        Ok(())
    }

    /// Blocks until every partition finished the step; stores whether all
    /// of them reported empty.
    fn finish_step_wait(&mut self) -> Result<(), NetError> {
        let maybe_finished = self.core.is_maybe_finished();
        debug!(
            "Manager {}: waiting for step end barrier, maybe finished: {maybe_finished}",
            self.core.id()
        );
        let reply = self.coordinator_request(SyncRequest::BarrierStep { maybe_finished })?;
        self.finished = decode_bool_reply(&reply)?;
        debug!(
            "Manager {}: reached step end barrier, is finished: {}",
            self.core.id(),
            self.finished
        );
        Ok(())
    }

    /// Tells the coordinator this partition is done; replied to
    /// immediately.
    fn signal_finish(&mut self) -> Result<(), NetError> {
        debug!("Manager {}: signaling partition end", self.core.id());
        self.coordinator_request(SyncRequest::Finished)?;
        Ok(())
    }
}

/// Reads the full insertion state of an outgoing vehicle.
fn describe_vehicle(sim: &dyn Sim, veh_id: &str, route_id: &str) -> SimResult<AddVehicle> {
    Ok(AddVehicle {
        veh_id: veh_id.to_owned(),
        route_id: route_id.to_owned(),
        veh_type: sim.vehicle_type(veh_id)?,
        lane_id: sim.vehicle_lane(veh_id)?,
        lane_index: sim.vehicle_lane_index(veh_id)?,
        lane_pos: sim.vehicle_lane_position(veh_id)?,
        speed: sim.vehicle_speed(veh_id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::scripted::{Scenario, ScenarioEdge, ScenarioRoute};
    use crate::sim::ScriptedSim;

    fn core_with_routes(route_ids: &[(&str, Vec<&str>)]) -> PartitionCore {
        let sim = Arc::new(ScriptedSim::new());
        sim.load_scenario(Scenario {
            delta_t: 1.0,
            edges: vec![
                ScenarioEdge {
                    id: "E".to_owned(),
                    length: 100.0,
                    lanes: 1,
                },
                ScenarioEdge {
                    id: "B".to_owned(),
                    length: 100.0,
                    lanes: 1,
                },
            ],
            routes: route_ids
                .iter()
                .map(|(id, edges)| ScenarioRoute {
                    id: (*id).to_owned(),
                    edges: edges.iter().map(|e| (*e).to_owned()).collect(),
                })
                .collect(),
            vehicles: vec![],
        })
        .unwrap();
        PartitionCore::new(1, sim, RouteMetadata::default())
    }

    fn add_op(veh_id: &str, route_id: &str) -> AddVehicle {
        AddVehicle {
            veh_id: veh_id.to_owned(),
            route_id: route_id.to_owned(),
            veh_type: "car".to_owned(),
            lane_id: "E_0".to_owned(),
            lane_index: 0,
            lane_pos: 0.0,
            speed: 10.0,
        }
    }

    #[test]
    fn add_vehicle_plain_route_test() {
        let core = core_with_routes(&[("R", vec!["E", "B"])]);
        core.add_vehicle(&add_op("v0", "R")).unwrap();
        assert!(core.has_vehicle("v0"));
        assert!(core.has_vehicle_in_edge("v0", "E"));
        assert!(!core.has_vehicle_in_edge("v0", "B"));
    }

    #[test]
    fn add_vehicle_first_crossing_uses_first_local_part_test() {
        // This partition owns segment 1 of route R.
        let core = core_with_routes(&[("R_part1", vec!["E", "B"])]);
        core.add_vehicle(&add_op("v0", "R")).unwrap();
        assert_eq!(core.sim().vehicle_route("v0").unwrap(), "R_part1");
    }

    #[test]
    fn add_vehicle_reentry_uses_next_part_test() {
        let core = core_with_routes(&[("R_part0", vec!["E"]), ("R_part2", vec!["B"])]);
        // The vehicle previously left this partition from segment 0.
        core.note_scanned_part("v0", 1);
        core.add_vehicle(&add_op("v0", "R")).unwrap();
        assert_eq!(core.sim().vehicle_route("v0").unwrap(), "R_part2");
    }

    #[test]
    fn add_vehicle_past_last_part_is_skipped_test() {
        let core = core_with_routes(&[("R_part0", vec!["E"])]);
        core.note_scanned_part("v0", 0);
        // Segment 1 does not exist here: the vehicle reached its global
        // destination, the insertion is silently skipped.
        core.add_vehicle(&add_op("v0", "R")).unwrap();
        assert!(!core.has_vehicle("v0"));
        // The progress entry was cleared with it.
        assert!(core.progress.lock().unwrap().is_empty());
    }

    #[test]
    fn vehicle_cache_refresh_test() {
        let core = core_with_routes(&[("R", vec!["E", "B"])]);
        assert!(!core.has_vehicle("v0"));
        // The cache is fresh now; an insertion keeps it consistent.
        core.add_vehicle(&add_op("v0", "R")).unwrap();
        assert!(core.has_vehicle("v0"));
        core.invalidate_vehicle_cache();
        assert!(core.has_vehicle("v0"));
    }

    #[test]
    fn maybe_finished_test() {
        let core = core_with_routes(&[("R", vec!["E"])]);
        // Empty sim, but time has not passed last_depart + 1 yet.
        assert!(!core.is_maybe_finished());
        core.sim().step().unwrap();
        core.sim().step().unwrap();
        assert!(core.is_maybe_finished());
    }
}
