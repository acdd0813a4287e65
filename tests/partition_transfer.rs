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

//! End-to-end border-crossing runs: several partition runtimes with
//! scripted simulators, wired through real sockets, one per thread.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use hashbrown::{HashMap, HashSet};
use psumo::coordinator::{Coordinator, CoordinatorOptions};
use psumo::io::{self, PartitionData};
use psumo::net::Transport;
use psumo::partition::{PartitionRuntime, RuntimeOptions};
use psumo::sim::{ScriptedSim, Sim};
use psumo::types::{BorderEdge, PartitionId};
use serde_json::json;

fn write_scenario(data_dir: &Path, id: PartitionId, scenario: serde_json::Value) {
    std::fs::write(
        io::partition_cfg_file(data_dir, id),
        scenario.to_string(),
    )
    .unwrap();
}

fn routes(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn edge_routes(edge: &str, items: &[&str]) -> HashMap<String, HashSet<String>> {
    [(edge.to_owned(), routes(items))].into_iter().collect()
}

fn start_coordinator(data_dir: &Path, n: usize, end_time: i32) -> thread::JoinHandle<(i32, usize)> {
    let mut coordinator = Coordinator::new(CoordinatorOptions {
        data_dir: data_dir.to_path_buf(),
        transport: Transport::Ipc,
        end_time,
        num_partitions: n,
    });
    coordinator.bind().unwrap();
    thread::spawn(move || {
        let status = coordinator.run(Vec::new()).unwrap();
        (status, coordinator.steps())
    })
}

fn start_partition(
    sim: Arc<ScriptedSim>,
    data: PartitionData,
    data_dir: PathBuf,
    end_time: i32,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let cfg = io::partition_cfg_file(&data_dir, data.id);
        let mut opts = RuntimeOptions::new(data_dir);
        opts.end_time = end_time;
        let sim: Arc<dyn Sim> = sim;
        let mut runtime = PartitionRuntime::new(sim, &data, cfg, opts).unwrap();
        runtime.run().unwrap();
    })
}

#[test]
fn single_transfer_test() {
    let dir = tempfile::tempdir().unwrap();
    io::prepare_sockets_dir(dir.path()).unwrap();

    // Partition 0 owns A and the border edge E; partition 1 owns E and B.
    // Route R runs A -> E -> B, crossing from 0 to 1 on E.
    write_scenario(
        dir.path(),
        0,
        json!({
            "edges": [{"id": "A", "length": 50.0}, {"id": "E", "length": 50.0}],
            "routes": [{"id": "R", "edges": ["A", "E"]}],
            "vehicles": [{"id": "v0", "route": "R", "speed": 10.0}]
        }),
    );
    write_scenario(
        dir.path(),
        1,
        json!({
            "edges": [{"id": "E", "length": 50.0}, {"id": "B", "length": 100.0}],
            "routes": [{"id": "R", "edges": ["E", "B"]}]
        }),
    );
    let border = BorderEdge {
        id: "E".to_owned(),
        lanes: vec!["E_0".to_owned()],
        from: 0,
        to: 1,
    };
    let data0 = PartitionData {
        id: 0,
        neighbors: vec![1],
        border_edges: vec![border.clone()],
        neighbor_routes: [(1, routes(&["R"]))].into_iter().collect(),
        border_route_ends: edge_routes("E", &["R"]),
        last_depart: 0.0,
    };
    let data1 = PartitionData {
        id: 1,
        neighbors: vec![0],
        border_edges: vec![border],
        ..Default::default()
    };

    let sim0 = Arc::new(ScriptedSim::new());
    let sim1 = Arc::new(ScriptedSim::new());
    let coordinator = start_coordinator(dir.path(), 2, 10);
    let p0 = start_partition(Arc::clone(&sim0), data0, dir.path().to_path_buf(), 10);
    let p1 = start_partition(Arc::clone(&sim1), data1, dir.path().to_path_buf(), 10);
    p0.join().unwrap();
    p1.join().unwrap();
    let (status, steps) = coordinator.join().unwrap();
    assert_eq!(status, 0);
    assert_eq!(steps, 10);

    // v0 reaches E at t=5 and is inserted into partition 1 exactly once,
    // even though it stays on E for several more ticks.
    let added = sim1.added();
    assert_eq!(added.len(), 1);
    let add = &added[0];
    assert_eq!(add.veh_id, "v0");
    assert_eq!(add.route_id, "R");
    assert_eq!(add.veh_type, "car");
    assert_eq!(add.lane_id, "E_0");
    assert!(add.lane_pos.abs() < 1e-9);
    assert_eq!(add.speed, 10.0);
    assert_eq!(add.time, 5.0);

    // After the remaining ticks it advanced to B in partition 1, and its
    // shadow copy completed the local route on partition 0.
    assert_eq!(
        sim1.positions(),
        vec![("v0".to_owned(), "B".to_owned(), 0.0)]
    );
    assert_eq!(sim0.arrived(), vec!["v0"]);
    assert!(sim0.positions().is_empty());
}

#[test]
fn duplicate_transfer_suppressed_test() {
    let dir = tempfile::tempdir().unwrap();
    io::prepare_sockets_dir(dir.path()).unwrap();

    // v0 starts on the border edge E, leaves it over A and comes back to
    // E later. The second pass must not insert it into partition 1 again:
    // the remote hasVehicle pre-check sees it there already.
    write_scenario(
        dir.path(),
        0,
        json!({
            "edges": [{"id": "E", "length": 30.0}, {"id": "A", "length": 30.0}],
            "routes": [{"id": "R", "edges": ["E", "A", "E"]}],
            "vehicles": [{"id": "v0", "route": "R", "speed": 10.0}]
        }),
    );
    write_scenario(
        dir.path(),
        1,
        json!({
            "edges": [{"id": "E", "length": 30.0}, {"id": "B", "length": 60.0}],
            "routes": [{"id": "R", "edges": ["E", "B"]}]
        }),
    );
    let border = BorderEdge {
        id: "E".to_owned(),
        lanes: vec!["E_0".to_owned()],
        from: 0,
        to: 1,
    };
    let data0 = PartitionData {
        id: 0,
        neighbors: vec![1],
        border_edges: vec![border.clone()],
        neighbor_routes: [(1, routes(&["R"]))].into_iter().collect(),
        border_route_ends: edge_routes("E", &["R"]),
        last_depart: 0.0,
    };
    let data1 = PartitionData {
        id: 1,
        neighbors: vec![0],
        border_edges: vec![border],
        ..Default::default()
    };

    let sim0 = Arc::new(ScriptedSim::new());
    let sim1 = Arc::new(ScriptedSim::new());
    let coordinator = start_coordinator(dir.path(), 2, 12);
    let p0 = start_partition(Arc::clone(&sim0), data0, dir.path().to_path_buf(), 12);
    let p1 = start_partition(Arc::clone(&sim1), data1, dir.path().to_path_buf(), 12);
    p0.join().unwrap();
    p1.join().unwrap();
    let (status, _) = coordinator.join().unwrap();
    assert_eq!(status, 0);

    let added = sim1.added();
    assert_eq!(added.len(), 1, "duplicate insertion: {added:?}");
    assert_eq!(added[0].veh_id, "v0");
}

#[test]
fn multipart_route_transfer_test() {
    let dir = tempfile::tempdir().unwrap();
    io::prepare_sockets_dir(dir.path()).unwrap();

    // Route R was split into three segments: partition 0 owns R_part0
    // (A -> E1), partition 1 owns R_part1 (E1 -> E2), partition 2 owns
    // R_part2 (E2 -> B).
    write_scenario(
        dir.path(),
        0,
        json!({
            "edges": [{"id": "A", "length": 30.0}, {"id": "E1", "length": 30.0}],
            "routes": [{"id": "R_part0", "edges": ["A", "E1"]}],
            "vehicles": [{"id": "v0", "route": "R_part0", "speed": 10.0}]
        }),
    );
    write_scenario(
        dir.path(),
        1,
        json!({
            "edges": [{"id": "E1", "length": 30.0}, {"id": "E2", "length": 30.0}],
            "routes": [{"id": "R_part1", "edges": ["E1", "E2"]}]
        }),
    );
    write_scenario(
        dir.path(),
        2,
        json!({
            "edges": [{"id": "E2", "length": 30.0}, {"id": "B", "length": 30.0}],
            "routes": [{"id": "R_part2", "edges": ["E2", "B"]}]
        }),
    );
    let e1 = BorderEdge {
        id: "E1".to_owned(),
        lanes: vec!["E1_0".to_owned()],
        from: 0,
        to: 1,
    };
    let e2 = BorderEdge {
        id: "E2".to_owned(),
        lanes: vec!["E2_0".to_owned()],
        from: 1,
        to: 2,
    };
    let data0 = PartitionData {
        id: 0,
        neighbors: vec![1],
        border_edges: vec![e1.clone()],
        neighbor_routes: [(1, routes(&["R"]))].into_iter().collect(),
        border_route_ends: edge_routes("E1", &["R"]),
        last_depart: 0.0,
    };
    let data1 = PartitionData {
        id: 1,
        neighbors: vec![0, 2],
        border_edges: vec![e1, e2.clone()],
        neighbor_routes: [(2, routes(&["R"]))].into_iter().collect(),
        border_route_ends: edge_routes("E2", &["R"]),
        last_depart: 0.0,
    };
    let data2 = PartitionData {
        id: 2,
        neighbors: vec![1],
        border_edges: vec![e2],
        ..Default::default()
    };

    let sim0 = Arc::new(ScriptedSim::new());
    let sim1 = Arc::new(ScriptedSim::new());
    let sim2 = Arc::new(ScriptedSim::new());
    let coordinator = start_coordinator(dir.path(), 3, 12);
    let p0 = start_partition(Arc::clone(&sim0), data0, dir.path().to_path_buf(), 12);
    let p1 = start_partition(Arc::clone(&sim1), data1, dir.path().to_path_buf(), 12);
    let p2 = start_partition(Arc::clone(&sim2), data2, dir.path().to_path_buf(), 12);
    p0.join().unwrap();
    p1.join().unwrap();
    p2.join().unwrap();
    let (status, _) = coordinator.join().unwrap();
    assert_eq!(status, 0);

    // Each crossing re-materializes the vehicle on the next local segment
    // of the split route.
    let added1 = sim1.added();
    assert_eq!(added1.len(), 1);
    assert_eq!(added1[0].route_id, "R_part1");
    assert_eq!(added1[0].lane_id, "E1_0");
    let added2 = sim2.added();
    assert_eq!(added2.len(), 1);
    assert_eq!(added2[0].route_id, "R_part2");
    assert_eq!(added2[0].lane_id, "E2_0");

    // The vehicle finishes its global route on partition 2.
    assert_eq!(sim2.arrived(), vec!["v0"]);
    assert_eq!(sim0.arrived(), vec!["v0"]);
    assert_eq!(sim1.arrived(), vec!["v0"]);
}

#[test]
fn all_empty_termination_test() {
    let dir = tempfile::tempdir().unwrap();
    io::prepare_sockets_dir(dir.path()).unwrap();

    // No end time: the run stops at the first step where every partition
    // reports itself empty.
    write_scenario(
        dir.path(),
        0,
        json!({
            "edges": [{"id": "A", "length": 30.0}, {"id": "E", "length": 30.0}],
            "routes": [{"id": "R", "edges": ["A"]}],
            "vehicles": [{"id": "v0", "route": "R", "speed": 10.0}]
        }),
    );
    write_scenario(
        dir.path(),
        1,
        json!({
            "edges": [{"id": "E", "length": 30.0}],
            "routes": [{"id": "S", "edges": ["E"]}]
        }),
    );
    let border = BorderEdge {
        id: "E".to_owned(),
        lanes: vec!["E_0".to_owned()],
        from: 0,
        to: 1,
    };
    let data0 = PartitionData {
        id: 0,
        neighbors: vec![1],
        border_edges: vec![border.clone()],
        ..Default::default()
    };
    let data1 = PartitionData {
        id: 1,
        neighbors: vec![0],
        border_edges: vec![border],
        ..Default::default()
    };

    let sim0 = Arc::new(ScriptedSim::new());
    let sim1 = Arc::new(ScriptedSim::new());
    let coordinator = start_coordinator(dir.path(), 2, -1);
    let p0 = start_partition(Arc::clone(&sim0), data0, dir.path().to_path_buf(), -1);
    let p1 = start_partition(Arc::clone(&sim1), data1, dir.path().to_path_buf(), -1);
    p0.join().unwrap();
    p1.join().unwrap();
    let (status, steps) = coordinator.join().unwrap();
    assert_eq!(status, 0);

    // v0 completes at t=3; that step is the first where both partitions
    // report maybe-finished, so it is the last one.
    assert_eq!(steps, 3);
    assert_eq!(sim0.arrived(), vec!["v0"]);
    assert!(sim1.added().is_empty());
}
