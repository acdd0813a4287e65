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

//! Route metadata of a partition.
//!
//! A route crossing partition borders is split by the partitioner into
//! ordered segments named `<base>_part<k>`, `k` zero-padded to a uniform
//! width per base id; each partition's route file carries the segments
//! that lie inside it. The metadata here answers, per partition: which
//! routes leave towards which neighbor, on which border edge a local
//! segment ends, and which local segment a transferred vehicle should be
//! placed on.
use hashbrown::{HashMap, HashSet};

use crate::io::PartitionData;
use crate::types::PartitionId;

const PART_MARKER: &str = "_part";

/// Splits a multipart segment id into `(base, k, digit width)`.
///
/// Returns `None` for ids without a well-formed numeric `_part` suffix.
pub fn split_part_suffix(route_id: &str) -> Option<(&str, u32, usize)> {
    let (base, digits) = route_id.rsplit_once(PART_MARKER)?;
    if base.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((base, digits.parse().ok()?, digits.len()))
}

/// Builds the id of segment `k` of a multipart route.
pub fn part_route_id(base: &str, k: u32, width: usize) -> String {
    format!("{base}{PART_MARKER}{k:0width$}")
}

#[derive(Clone, Debug, Default)]
struct PartList {
    /// Digit width used by the partitioner for this base id.
    width: usize,
    /// Sorted segment numbers present in this partition.
    parts: Vec<u32>,
}

/// Local segments of the multipart routes, derived from the simulator's
/// route list after start.
#[derive(Clone, Debug, Default)]
pub struct MultipartIndex {
    parts: HashMap<String, PartList>,
}

impl MultipartIndex {
    pub fn from_route_ids<S: AsRef<str>>(route_ids: &[S]) -> Self {
        let mut parts: HashMap<String, PartList> = HashMap::new();
        for route_id in route_ids {
            if let Some((base, k, width)) = split_part_suffix(route_id.as_ref()) {
                let list = parts.entry(base.to_owned()).or_default();
                list.width = list.width.max(width);
                list.parts.push(k);
            }
        }
        for list in parts.values_mut() {
            list.parts.sort_unstable();
        }
        MultipartIndex { parts }
    }

    /// Whether the given base id was split by the partitioner.
    pub fn is_multipart(&self, base: &str) -> bool {
        self.parts.contains_key(base)
    }

    /// Lowest-numbered local segment of the given base id.
    pub fn first_local_part(&self, base: &str) -> Option<u32> {
        self.parts.get(base)?.parts.first().copied()
    }

    /// Whether segment `k` of the given base id exists locally.
    pub fn has_local_part(&self, base: &str, k: u32) -> bool {
        self.parts
            .get(base)
            .is_some_and(|list| list.parts.binary_search(&k).is_ok())
    }

    /// Local id of segment `k` of the given base id.
    pub fn local_part_id(&self, base: &str, k: u32) -> Option<String> {
        let list = self.parts.get(base)?;
        list.parts
            .binary_search(&k)
            .ok()
            .map(|_| part_route_id(base, k, list.width))
    }
}

/// Read-only route metadata of one partition.
#[derive(Clone, Debug, Default)]
pub struct RouteMetadata {
    /// Routes whose vehicles will need to be transferred to each neighbor.
    pub neighbor_routes: HashMap<PartitionId, HashSet<String>>,
    /// Routes whose local segment terminates on each outgoing border edge.
    pub route_ends_in_edge: HashMap<String, HashSet<String>>,
    /// Latest scheduled vehicle departure in this partition.
    pub last_depart_time: f64,
}

impl RouteMetadata {
    pub fn from_partition_data(data: &PartitionData) -> Self {
        RouteMetadata {
            neighbor_routes: data.neighbor_routes.clone(),
            route_ends_in_edge: data.border_route_ends.clone(),
            last_depart_time: data.last_depart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_part_suffix_test() {
        assert_eq!(split_part_suffix("R_part0"), Some(("R", 0, 1)));
        assert_eq!(split_part_suffix("R_part12"), Some(("R", 12, 2)));
        assert_eq!(split_part_suffix("R_part07"), Some(("R", 7, 2)));
        assert_eq!(split_part_suffix("my_route_part3"), Some(("my_route", 3, 1)));
        assert_eq!(split_part_suffix("R"), None);
        assert_eq!(split_part_suffix("R_partx"), None);
        assert_eq!(split_part_suffix("R_part"), None);
        assert_eq!(split_part_suffix("_part2"), None);
    }

    #[test]
    fn part_route_id_test() {
        assert_eq!(part_route_id("R", 3, 1), "R_part3");
        assert_eq!(part_route_id("R", 3, 2), "R_part03");
        // Round-trips through the parser.
        assert_eq!(split_part_suffix(&part_route_id("R", 3, 2)), Some(("R", 3, 2)));
    }

    #[test]
    fn multipart_index_test() {
        let index =
            MultipartIndex::from_route_ids(&["R_part1", "R_part3", "S", "T_part00", "T_part02"]);
        assert!(index.is_multipart("R"));
        assert!(index.is_multipart("T"));
        assert!(!index.is_multipart("S"));
        assert_eq!(index.first_local_part("R"), Some(1));
        assert_eq!(index.first_local_part("T"), Some(0));
        assert!(index.has_local_part("R", 3));
        assert!(!index.has_local_part("R", 2));
        assert_eq!(index.local_part_id("T", 2), Some("T_part02".to_owned()));
        assert_eq!(index.local_part_id("R", 2), None);
    }
}
