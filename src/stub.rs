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

//! Outbound requests towards one specific neighbor.
//!
//! One stub per `(owner, neighbor)` pair, called only from the partition
//! main thread: the request/reply socket is strictly alternating and must
//! not be shared across threads. Every call blocks until the neighbor's
//! handler replies.
use std::path::Path;
use std::time::Duration;

use crate::error::NetError;
use crate::net::endpoint::{Endpoint, Transport};
use crate::net::frame::{decode_bool_reply, decode_strings_reply, NeighborRequest};
use crate::net::socket::ReqSocket;
use crate::types::{AddVehicle, PartitionId, SetSpeed};

/// How long a stub connection may wait for the neighbor to bind.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues typed requests to one neighbor partition.
pub struct NeighborStub {
    owner_id: PartitionId,
    target_id: PartitionId,
    endpoint: Endpoint,
    socket: Option<ReqSocket>,
}

impl NeighborStub {
    /// Prepares the stub; the endpoint is not connected until
    /// [NeighborStub::connect], after the startup barrier.
    pub fn new(
        owner_id: PartitionId,
        target_id: PartitionId,
        transport: Transport,
        data_dir: &Path,
    ) -> Self {
        NeighborStub {
            owner_id,
            target_id,
            endpoint: Endpoint::neighbor(transport, data_dir, owner_id, target_id),
            socket: None,
        }
    }

    pub fn target_id(&self) -> PartitionId {
        self.target_id
    }

    pub fn connect(&mut self) -> Result<(), NetError> {
        self.socket = Some(ReqSocket::connect_retry(&self.endpoint, CONNECT_TIMEOUT)?);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.socket = None;
    }

    fn request(&mut self, request: &NeighborRequest) -> Result<Vec<u8>, NetError> {
        debug_assert!(
            self.socket.is_some(),
            "stub {}->{} used while disconnected",
            self.owner_id,
            self.target_id
        );
        self.socket
            .as_mut()
            .ok_or(NetError::NotConnected)?
            .request(&request.encode())
    }

    /// Vehicles on the given edge of the neighbor during its last step.
    pub fn get_edge_vehicles(&mut self, edge_id: &str) -> Result<Vec<String>, NetError> {
        let reply = self.request(&NeighborRequest::GetEdgeVehicles {
            edge_id: edge_id.to_owned(),
        })?;
        Ok(decode_strings_reply(&reply)?)
    }

    /// Whether the neighbor currently simulates the given vehicle.
    pub fn has_vehicle(&mut self, veh_id: &str) -> Result<bool, NetError> {
        let reply = self.request(&NeighborRequest::HasVehicle {
            veh_id: veh_id.to_owned(),
        })?;
        Ok(decode_bool_reply(&reply)?)
    }

    /// Whether the neighbor has the given vehicle on the given edge.
    pub fn has_vehicle_in_edge(&mut self, veh_id: &str, edge_id: &str) -> Result<bool, NetError> {
        let reply = self.request(&NeighborRequest::HasVehicleInEdge {
            veh_id: veh_id.to_owned(),
            edge_id: edge_id.to_owned(),
        })?;
        Ok(decode_bool_reply(&reply)?)
    }

    /// Queues a speed change on the neighbor, applied at its next drain.
    pub fn set_vehicle_speed(&mut self, veh_id: &str, speed: f64) -> Result<(), NetError> {
        self.request(&NeighborRequest::SetVehicleSpeed(SetSpeed {
            veh_id: veh_id.to_owned(),
            speed,
        }))?;
        Ok(())
    }

    /// Queues a vehicle insertion on the neighbor, applied at its next
    /// drain.
    pub fn add_vehicle(&mut self, op: &AddVehicle) -> Result<(), NetError> {
        self.request(&NeighborRequest::AddVehicle(op.clone()))?;
        Ok(())
    }
}
