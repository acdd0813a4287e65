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

//! Filesystem contract with the offline partitioner.
//!
//! The partitioner leaves `numParts.txt`, one `partData<i>.json` and one
//! `part<i>.sumocfg` per partition in the data directory; the runtime only
//! consumes them. The `sockets/` subdirectory is the IPC rendezvous area,
//! wiped and recreated at startup.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hashbrown::{HashMap, HashSet};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::net::endpoint::sockets_dir;
use crate::types::{BorderEdge, PartitionId};

/// Per-partition output of the partitioner.
#[derive(Clone, Debug, Default)]
pub struct PartitionData {
    pub id: PartitionId,
    pub neighbors: Vec<PartitionId>,
    pub border_edges: Vec<BorderEdge>,
    /// Routes whose vehicles will need to be transferred to each neighbor.
    pub neighbor_routes: HashMap<PartitionId, HashSet<String>>,
    /// Routes whose local segment terminates on each outgoing border edge.
    pub border_route_ends: HashMap<String, HashSet<String>>,
    /// Latest scheduled vehicle departure in this partition.
    pub last_depart: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPartitionData {
    id: PartitionId,
    neighbors: Vec<PartitionId>,
    border_edges: Vec<BorderEdge>,
    // JSON object keys are strings, including the neighbor ids.
    neighbor_routes: HashMap<String, HashSet<String>>,
    border_route_ends: HashMap<String, HashSet<String>>,
    last_depart: f64,
}

/// Reads some deserializable data from a JSON file.
pub fn read_json<D: DeserializeOwned>(filename: &Path) -> Result<D> {
    let mut bytes = Vec::new();
    File::open(filename)
        .with_context(|| format!("Unable to open file `{filename:?}`"))?
        .read_to_end(&mut bytes)
        .with_context(|| format!("Unable to read file `{filename:?}`"))?;
    let data = serde_json::from_slice(&bytes)
        .with_context(|| format!("Unable to parse file `{filename:?}`"))?;
    Ok(data)
}

/// Reads the number of non-empty partitions the partitioner produced.
pub fn read_num_partitions(data_dir: &Path) -> Result<usize> {
    let filename = data_dir.join("numParts.txt");
    let content = std::fs::read_to_string(&filename)
        .with_context(|| format!("Unable to read file `{filename:?}`"))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("Invalid partition count in `{filename:?}`"))
}

/// Path of the partition-data file of partition `id`.
pub fn partition_data_file(data_dir: &Path, id: PartitionId) -> PathBuf {
    data_dir.join(format!("partData{id}.json"))
}

/// Path of the simulator configuration of partition `id`.
pub fn partition_cfg_file(data_dir: &Path, id: PartitionId) -> PathBuf {
    data_dir.join(format!("part{id}.sumocfg"))
}

/// Reads the partition-data file of partition `id`.
pub fn read_partition_data(data_dir: &Path, id: PartitionId) -> Result<PartitionData> {
    let raw: RawPartitionData = read_json(&partition_data_file(data_dir, id))?;
    let mut neighbor_routes = HashMap::with_capacity(raw.neighbor_routes.len());
    for (neighbor, routes) in raw.neighbor_routes {
        let neighbor: PartitionId = neighbor
            .parse()
            .with_context(|| format!("Invalid neighbor id `{neighbor}` in partData{id}.json"))?;
        neighbor_routes.insert(neighbor, routes);
    }
    Ok(PartitionData {
        id: raw.id,
        neighbors: raw.neighbors,
        border_edges: raw.border_edges,
        neighbor_routes,
        border_route_ends: raw.border_route_ends,
        last_depart: raw.last_depart,
    })
}

/// Wipes and recreates the IPC rendezvous directory.
pub fn prepare_sockets_dir(data_dir: &Path) -> Result<PathBuf> {
    let dir = sockets_dir(data_dir);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to wipe sockets directory `{dir:?}`"))?;
    }
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create sockets directory `{dir:?}`"))?;
    Ok(dir)
}

/// Removes the IPC rendezvous directory at the end of a run.
pub fn cleanup_sockets_dir(data_dir: &Path) {
    let _ = std::fs::remove_dir_all(sockets_dir(data_dir));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_partition_data_test() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            partition_data_file(dir.path(), 1),
            r#"{
                "id": 1,
                "neighbors": [0, 2],
                "borderEdges": [
                    {"id": "E", "lanes": ["E_0"], "from": 0, "to": 1},
                    {"id": "F", "lanes": ["F_0", "F_1"], "from": 1, "to": 2}
                ],
                "neighborRoutes": {"0": ["R"], "2": ["R", "S"]},
                "borderRouteEnds": {"F": ["R"]},
                "lastDepart": 42.5
            }"#,
        )
        .unwrap();
        let data = read_partition_data(dir.path(), 1).unwrap();
        assert_eq!(data.id, 1);
        assert_eq!(data.neighbors, vec![0, 2]);
        assert_eq!(data.border_edges.len(), 2);
        assert_eq!(data.border_edges[1].lanes, vec!["F_0", "F_1"]);
        assert!(data.neighbor_routes[&2].contains("S"));
        assert!(data.border_route_ends["F"].contains("R"));
        assert_eq!(data.last_depart, 42.5);
    }

    #[test]
    fn num_partitions_test() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("numParts.txt"), "3\n").unwrap();
        assert_eq!(read_num_partitions(dir.path()).unwrap(), 3);
    }

    #[test]
    fn sockets_dir_lifecycle_test() {
        let dir = tempfile::tempdir().unwrap();
        let sockets = prepare_sockets_dir(dir.path()).unwrap();
        std::fs::write(sockets.join("stale"), b"x").unwrap();
        // A second prepare wipes leftovers from an earlier run.
        let sockets = prepare_sockets_dir(dir.path()).unwrap();
        assert!(std::fs::read_dir(&sockets).unwrap().next().is_none());
        cleanup_sockets_dir(dir.path());
        assert!(!sockets.exists());
    }
}
