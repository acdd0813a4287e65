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

//! Binary message framing.
//!
//! Every message is an opcode-prefixed buffer: little-endian fixed-size
//! scalars followed by length-prefixed blocks of null-terminated strings.
//! On stream transports each message additionally travels inside a
//! `u32`-length-prefixed frame (see [crate::net::socket]).
use crate::error::CodecError;
use crate::types::{AddVehicle, SetSpeed};

/// Fixed reply body acknowledging a write or a barrier.
pub const OK_REPLY: &[u8] = b"ok";
/// Sentinel reply to a repeated barrier message.
pub const REPEATED_REPLY: &[u8] = b"repeated";
/// Sentinel reply to a malformed or unknown request.
pub const ERR_REPLY: &[u8] = b"err";

/// Opcodes of the neighbor request/reply protocol.
pub mod neighbor_op {
    pub const GET_EDGE_VEHICLES: i32 = 0;
    pub const HAS_VEHICLE: i32 = 1;
    pub const HAS_VEHICLE_IN_EDGE: i32 = 2;
    pub const SET_VEHICLE_SPEED: i32 = 3;
    pub const ADD_VEHICLE: i32 = 4;
}

/// Opcodes of the coordinator sync protocol.
pub mod sync_op {
    pub const BARRIER: i32 = 0;
    pub const BARRIER_STEP: i32 = 1;
    pub const FINISHED: i32 = 2;
}

/// Incremental writer for an opcode-prefixed message.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new(opcode: i32) -> Self {
        let mut writer = MessageWriter { buf: Vec::new() };
        writer.put_i32(opcode);
        writer
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    /// Writes a single null-terminated string.
    pub fn put_cstr(&mut self, value: &str) {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Writes a counted block of null-terminated strings.
    pub fn put_strings<S: AsRef<str>>(&mut self, values: &[S]) {
        self.put_i32(values.len() as i32);
        for value in values {
            self.put_cstr(value.as_ref());
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Incremental reader over a received message.
#[derive(Debug)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        MessageReader { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::Truncated(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn take_i32(&mut self) -> Result<i32, CodecError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn take_f64(&mut self) -> Result<f64, CodecError> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn take_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.take(1)?[0] != 0)
    }

    /// Reads a single null-terminated string.
    pub fn take_cstr(&mut self) -> Result<String, CodecError> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnterminatedString)?;
        let value = std::str::from_utf8(&rest[..nul]).map_err(|_| CodecError::BadUtf8)?;
        self.pos += nul + 1;
        Ok(value.to_owned())
    }

    /// Reads a counted block of null-terminated strings.
    pub fn take_strings(&mut self) -> Result<Vec<String>, CodecError> {
        let count = self.take_i32()?;
        if !(0..=1 << 20).contains(&count) {
            return Err(CodecError::BadCount(count));
        }
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.take_cstr()?);
        }
        Ok(values)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// A decoded request of the neighbor protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum NeighborRequest {
    GetEdgeVehicles { edge_id: String },
    HasVehicle { veh_id: String },
    HasVehicleInEdge { veh_id: String, edge_id: String },
    SetVehicleSpeed(SetSpeed),
    AddVehicle(AddVehicle),
}

impl NeighborRequest {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            NeighborRequest::GetEdgeVehicles { edge_id } => {
                let mut writer = MessageWriter::new(neighbor_op::GET_EDGE_VEHICLES);
                writer.put_cstr(edge_id);
                writer.into_bytes()
            }
            NeighborRequest::HasVehicle { veh_id } => {
                let mut writer = MessageWriter::new(neighbor_op::HAS_VEHICLE);
                writer.put_cstr(veh_id);
                writer.into_bytes()
            }
            NeighborRequest::HasVehicleInEdge { veh_id, edge_id } => {
                let mut writer = MessageWriter::new(neighbor_op::HAS_VEHICLE_IN_EDGE);
                writer.put_strings(&[veh_id, edge_id]);
                writer.into_bytes()
            }
            NeighborRequest::SetVehicleSpeed(op) => {
                let mut writer = MessageWriter::new(neighbor_op::SET_VEHICLE_SPEED);
                writer.put_f64(op.speed);
                writer.put_cstr(&op.veh_id);
                writer.into_bytes()
            }
            NeighborRequest::AddVehicle(op) => {
                let mut writer = MessageWriter::new(neighbor_op::ADD_VEHICLE);
                writer.put_i32(op.lane_index);
                writer.put_f64(op.lane_pos);
                writer.put_f64(op.speed);
                writer.put_strings(&[&op.veh_id, &op.route_id, &op.veh_type, &op.lane_id]);
                writer.into_bytes()
            }
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = MessageReader::new(payload);
        let opcode = reader.take_i32()?;
        match opcode {
            neighbor_op::GET_EDGE_VEHICLES => Ok(NeighborRequest::GetEdgeVehicles {
                edge_id: reader.take_cstr()?,
            }),
            neighbor_op::HAS_VEHICLE => Ok(NeighborRequest::HasVehicle {
                veh_id: reader.take_cstr()?,
            }),
            neighbor_op::HAS_VEHICLE_IN_EDGE => {
                let strings = reader.take_strings()?;
                let [veh_id, edge_id]: [String; 2] = strings
                    .try_into()
                    .map_err(|v: Vec<String>| CodecError::BadCount(v.len() as i32))?;
                Ok(NeighborRequest::HasVehicleInEdge { veh_id, edge_id })
            }
            neighbor_op::SET_VEHICLE_SPEED => {
                let speed = reader.take_f64()?;
                let veh_id = reader.take_cstr()?;
                Ok(NeighborRequest::SetVehicleSpeed(SetSpeed { veh_id, speed }))
            }
            neighbor_op::ADD_VEHICLE => {
                let lane_index = reader.take_i32()?;
                let lane_pos = reader.take_f64()?;
                let speed = reader.take_f64()?;
                let strings = reader.take_strings()?;
                let [veh_id, route_id, veh_type, lane_id]: [String; 4] = strings
                    .try_into()
                    .map_err(|v: Vec<String>| CodecError::BadCount(v.len() as i32))?;
                Ok(NeighborRequest::AddVehicle(AddVehicle {
                    veh_id,
                    route_id,
                    veh_type,
                    lane_id,
                    lane_index,
                    lane_pos,
                    speed,
                }))
            }
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

/// A decoded request of the coordinator sync protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncRequest {
    Barrier,
    BarrierStep { maybe_finished: bool },
    Finished,
}

impl SyncRequest {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            SyncRequest::Barrier => MessageWriter::new(sync_op::BARRIER).into_bytes(),
            SyncRequest::BarrierStep { maybe_finished } => {
                let mut writer = MessageWriter::new(sync_op::BARRIER_STEP);
                writer.put_bool(*maybe_finished);
                writer.into_bytes()
            }
            SyncRequest::Finished => MessageWriter::new(sync_op::FINISHED).into_bytes(),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = MessageReader::new(payload);
        let opcode = reader.take_i32()?;
        match opcode {
            sync_op::BARRIER => Ok(SyncRequest::Barrier),
            sync_op::BARRIER_STEP => Ok(SyncRequest::BarrierStep {
                maybe_finished: reader.take_bool()?,
            }),
            sync_op::FINISHED => Ok(SyncRequest::Finished),
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

/// Encodes the reply to a `GET_EDGE_VEHICLES` request.
pub fn encode_strings_reply<S: AsRef<str>>(values: &[S]) -> Vec<u8> {
    let mut writer = MessageWriter::default();
    writer.put_strings(values);
    writer.into_bytes()
}

/// Decodes the reply to a `GET_EDGE_VEHICLES` request.
pub fn decode_strings_reply(payload: &[u8]) -> Result<Vec<String>, CodecError> {
    MessageReader::new(payload).take_strings()
}

/// Encodes a single-boolean reply body.
pub fn encode_bool_reply(value: bool) -> Vec<u8> {
    vec![value as u8]
}

/// Decodes a single-boolean reply body.
pub fn decode_bool_reply(payload: &[u8]) -> Result<bool, CodecError> {
    MessageReader::new(payload).take_bool()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_roundtrip_test() {
        let values = vec!["v0".to_owned(), String::new(), "a longer id".to_owned()];
        let encoded = encode_strings_reply(&values);
        assert_eq!(decode_strings_reply(&encoded).unwrap(), values);
        assert_eq!(decode_strings_reply(&encode_strings_reply::<&str>(&[])).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn neighbor_request_roundtrip_test() {
        let requests = vec![
            NeighborRequest::GetEdgeVehicles {
                edge_id: "E12".to_owned(),
            },
            NeighborRequest::HasVehicle {
                veh_id: "v7".to_owned(),
            },
            NeighborRequest::HasVehicleInEdge {
                veh_id: "v7".to_owned(),
                edge_id: "E12".to_owned(),
            },
            NeighborRequest::SetVehicleSpeed(SetSpeed {
                veh_id: "v7".to_owned(),
                speed: 13.9,
            }),
            NeighborRequest::AddVehicle(AddVehicle {
                veh_id: "v0".to_owned(),
                route_id: "R".to_owned(),
                veh_type: "car".to_owned(),
                lane_id: "E_0".to_owned(),
                lane_index: 0,
                lane_pos: 0.5,
                speed: 8.25,
            }),
        ];
        for request in requests {
            let decoded = NeighborRequest::decode(&request.encode()).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn sync_request_roundtrip_test() {
        for request in [
            SyncRequest::Barrier,
            SyncRequest::BarrierStep {
                maybe_finished: true,
            },
            SyncRequest::BarrierStep {
                maybe_finished: false,
            },
            SyncRequest::Finished,
        ] {
            assert_eq!(SyncRequest::decode(&request.encode()).unwrap(), request);
        }
    }

    #[test]
    fn add_vehicle_layout_test() {
        // Byte layout: [i32 4][i32 0][f64 0.0][f64 10.0][i32 4]["v0\0R\0car\0E_0\0"].
        let encoded = NeighborRequest::AddVehicle(AddVehicle {
            veh_id: "v0".to_owned(),
            route_id: "R".to_owned(),
            veh_type: "car".to_owned(),
            lane_id: "E_0".to_owned(),
            lane_index: 0,
            lane_pos: 0.0,
            speed: 10.0,
        })
        .encode();
        assert_eq!(&encoded[0..4], &4i32.to_le_bytes());
        assert_eq!(&encoded[4..8], &0i32.to_le_bytes());
        assert_eq!(&encoded[8..16], &0.0f64.to_le_bytes());
        assert_eq!(&encoded[16..24], &10.0f64.to_le_bytes());
        assert_eq!(&encoded[24..28], &4i32.to_le_bytes());
        assert_eq!(&encoded[28..], b"v0\0R\0car\0E_0\0");
    }

    #[test]
    fn barrier_step_layout_test() {
        let encoded = SyncRequest::BarrierStep {
            maybe_finished: true,
        }
        .encode();
        assert_eq!(encoded, [1, 0, 0, 0, 1]);
    }

    #[test]
    fn malformed_messages_test() {
        assert!(matches!(
            NeighborRequest::decode(&99i32.to_le_bytes()),
            Err(CodecError::UnknownOpcode(99))
        ));
        assert!(matches!(
            NeighborRequest::decode(&[0, 0]),
            Err(CodecError::Truncated(_))
        ));
        // GET_EDGE_VEHICLES with a string missing its terminator.
        let mut bytes = 0i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"E12");
        assert!(matches!(
            NeighborRequest::decode(&bytes),
            Err(CodecError::UnterminatedString)
        ));
    }

    #[test]
    fn ok_reply_is_two_bytes_test() {
        assert_eq!(OK_REPLY.len(), 2);
    }
}
