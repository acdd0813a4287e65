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

//! Deterministic endpoint naming.
//!
//! Endpoints are named from the partition ids alone so that a Stub and the
//! matching Handler rendezvous without any discovery step.
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};

use crate::types::PartitionId;

/// First TCP port used for the coordinator sync endpoints.
pub const SYNC_SOCKETS_START: u16 = 4500;
/// First TCP port used for the neighbor-pair endpoints.
pub const PART_SOCKETS_START: u16 = 5400;

/// Transport used for cross-process messaging.
///
/// Unix-domain sockets under `<dataDir>/sockets/` by default, with a
/// loopback TCP fallback for setups without filesystem IPC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    #[default]
    Ipc,
    Tcp,
}

/// A named rendezvous point for one request/reply socket pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Ipc(PathBuf),
    Tcp(SocketAddr),
}

/// Unique number from an ordered pair of non-negative integers.
pub fn cantor_pairing(a: i32, b: i32) -> i32 {
    (a + b) * (a + b + 1) / 2 + b
}

/// Directory holding the IPC rendezvous sockets.
pub fn sockets_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("sockets")
}

impl Endpoint {
    /// Endpoint of the neighbor pair `(from, to)`: the Stub owned by `from`
    /// connects to it, the Handler owned by `to` binds it.
    pub fn neighbor(
        transport: Transport,
        data_dir: &Path,
        from: PartitionId,
        to: PartitionId,
    ) -> Self {
        match transport {
            Transport::Ipc => Endpoint::Ipc(sockets_dir(data_dir).join(format!("{from}-{to}"))),
            Transport::Tcp => {
                let port = PART_SOCKETS_START + cantor_pairing(from, to) as u16;
                Endpoint::Tcp(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
            }
        }
    }

    /// Endpoint of the coordinator sync socket of partition `part_id`.
    pub fn sync(transport: Transport, data_dir: &Path, part_id: PartitionId) -> Self {
        match transport {
            Transport::Ipc => {
                Endpoint::Ipc(sockets_dir(data_dir).join(format!("{part_id}-main-s")))
            }
            Transport::Tcp => {
                let port = SYNC_SOCKETS_START + part_id as u16;
                Endpoint::Tcp(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
            }
        }
    }

    /// URI form of the endpoint, used in logs and error messages.
    pub fn uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbor_ipc_names_test() {
        let ep = Endpoint::neighbor(Transport::Ipc, Path::new("data"), 2, 0);
        assert_eq!(ep.uri(), "ipc://data/sockets/2-0");
        // The two directions of a pair have distinct endpoints.
        let back = Endpoint::neighbor(Transport::Ipc, Path::new("data"), 0, 2);
        assert_ne!(ep, back);
    }

    #[test]
    fn sync_names_test() {
        let ep = Endpoint::sync(Transport::Ipc, Path::new("data"), 3);
        assert_eq!(ep.uri(), "ipc://data/sockets/3-main-s");
        let ep = Endpoint::sync(Transport::Tcp, Path::new("data"), 0);
        assert_eq!(ep.uri(), "tcp://127.0.0.1:4500");
    }

    #[test]
    fn cantor_pairing_test() {
        assert_eq!(cantor_pairing(0, 1), 2);
        assert_eq!(cantor_pairing(1, 0), 1);
        assert_eq!(cantor_pairing(2, 3), 18);
        // Injective over the pairs used by a small run.
        let mut seen = std::collections::HashSet::new();
        for a in 0..16 {
            for b in 0..16 {
                assert!(seen.insert(cantor_pairing(a, b)));
            }
        }
    }
}
