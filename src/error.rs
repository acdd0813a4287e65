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

//! Error taxonomy of the runtime.
//!
//! Transport errors are fatal at startup and treated as process death in
//! steady state; protocol errors are logged and answered with a sentinel
//! payload; Sim errors are classified into read failures (treated as "no
//! data") and write failures (logged, the tick continues).
use std::io;

use thiserror::Error;

/// A malformed or unrepresentable wire message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame truncated at byte {0}")]
    Truncated(usize),
    #[error("unknown opcode {0}")]
    UnknownOpcode(i32),
    #[error("string is missing its null terminator")]
    UnterminatedString,
    #[error("invalid string count {0}")]
    BadCount(i32),
    #[error("string is not valid UTF-8")]
    BadUtf8,
}

/// A transport-level failure on an endpoint or socket.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to bind `{uri}`")]
    Bind {
        uri: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to `{uri}`")]
    Connect {
        uri: String,
        #[source]
        source: io::Error,
    },
    #[error("send failed")]
    Send(#[source] io::Error),
    #[error("recv failed")]
    Recv(#[source] io::Error),
    #[error("poll failed")]
    Poll(#[source] io::Error),
    #[error("peer closed the connection")]
    Disconnected,
    #[error("socket is not connected")]
    NotConnected,
    #[error("oversized frame ({0} bytes)")]
    Oversized(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A classified failure of the embedded simulator.
#[derive(Debug, Error)]
pub enum SimError {
    /// The simulation failed to load.
    #[error("sim failed to load: {0}")]
    Load(String),
    /// A read operation failed (e.g. a getter on a non-existent id).
    #[error("sim read failed: {0}")]
    Read(String),
    /// A write operation failed (e.g. inserting a duplicate vehicle).
    #[error("sim write failed: {0}")]
    Write(String),
}
