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

//! Watchdog behavior when a partition process dies mid-run.
use std::process::Command;
use std::time::{Duration, Instant};

use psumo::coordinator::{Coordinator, CoordinatorOptions, PartitionProcess};
use psumo::io::prepare_sockets_dir;
use psumo::net::endpoint::sockets_dir;
use psumo::net::Transport;

#[test]
fn failing_partition_stops_the_run_test() {
    let dir = tempfile::tempdir().unwrap();
    prepare_sockets_dir(dir.path()).unwrap();

    let mut coordinator = Coordinator::new(CoordinatorOptions {
        data_dir: dir.path().to_path_buf(),
        transport: Transport::Ipc,
        end_time: -1,
        num_partitions: 2,
    });
    coordinator.bind().unwrap();

    // Partition 0 hangs; partition 1 dies with status 7 before ever
    // reaching a barrier.
    let children = vec![
        PartitionProcess {
            part_id: 0,
            child: Command::new("sleep").arg("30").spawn().unwrap(),
        },
        PartitionProcess {
            part_id: 1,
            child: Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap(),
        },
    ];

    let before = Instant::now();
    let status = coordinator.run(children).unwrap();
    // The watchdog reaps the failure, kills the survivor and the failing
    // status is propagated; nobody waits for the hanging partition.
    assert_eq!(status, 7);
    assert!(before.elapsed() < Duration::from_secs(10));

    // No orphan rendezvous sockets remain.
    assert!(!sockets_dir(dir.path()).exists());
}

#[test]
fn signal_death_maps_to_conventional_status_test() {
    let dir = tempfile::tempdir().unwrap();
    prepare_sockets_dir(dir.path()).unwrap();

    let mut coordinator = Coordinator::new(CoordinatorOptions {
        data_dir: dir.path().to_path_buf(),
        transport: Transport::Ipc,
        end_time: -1,
        num_partitions: 1,
    });
    coordinator.bind().unwrap();

    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    child.kill().unwrap();
    let children = vec![PartitionProcess { part_id: 0, child }];

    let status = coordinator.run(children).unwrap();
    // SIGKILL surfaces as 128 + 9.
    assert_eq!(status, 137);
}
