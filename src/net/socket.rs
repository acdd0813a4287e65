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

//! Framed request/reply sockets and in-process control signaling.
//!
//! Sockets stay in blocking mode; readiness is observed through a
//! [Poller] so that a control message on an in-process pair can interrupt
//! a wait. Each message of [crate::net::frame] travels inside a
//! `u32`-length-prefixed frame, restoring the message boundaries the
//! framing layer expects from the transport.
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::debug;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::error::NetError;
use crate::net::endpoint::Endpoint;

/// Upper bound on a single frame; larger frames are a protocol error.
const MAX_FRAME_LEN: usize = 16 << 20;
/// Delay between connection attempts while a peer is still binding.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A connected stream of either transport.
#[derive(Debug)]
pub enum Stream {
    Ipc(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Stream::Ipc(stream) => stream.set_nonblocking(nonblocking),
            Stream::Tcp(stream) => stream.set_nonblocking(nonblocking),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Ipc(stream) => stream.as_raw_fd(),
            Stream::Tcp(stream) => stream.as_raw_fd(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Ipc(stream) => stream.read(buf),
            Stream::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Ipc(stream) => stream.write(buf),
            Stream::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Ipc(stream) => stream.flush(),
            Stream::Tcp(stream) => stream.flush(),
        }
    }
}

/// A bound, listening endpoint.
///
/// IPC endpoints unlink their socket file again when dropped so that no
/// stale rendezvous files survive a run.
#[derive(Debug)]
pub enum Listener {
    Ipc { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl Listener {
    /// Binds the endpoint, replacing a stale socket file if one is left
    /// over from an earlier run.
    pub fn bind(endpoint: &Endpoint) -> Result<Self, NetError> {
        let bind_err = |source| NetError::Bind {
            uri: endpoint.uri(),
            source,
        };
        match endpoint {
            Endpoint::Ipc(path) => {
                if path.exists() {
                    std::fs::remove_file(path).map_err(bind_err)?;
                }
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                Ok(Listener::Ipc {
                    listener,
                    path: path.clone(),
                })
            }
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr).map_err(bind_err)?)),
        }
    }

    /// Accepts the single pending connection of the peer socket.
    pub fn accept(&self) -> Result<Stream, NetError> {
        match self {
            Listener::Ipc { listener, .. } => {
                let (stream, _) = listener.accept().map_err(NetError::Recv)?;
                Ok(Stream::Ipc(stream))
            }
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().map_err(NetError::Recv)?;
                stream.set_nodelay(true).map_err(NetError::Recv)?;
                Ok(Stream::Tcp(stream))
            }
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Ipc { listener, .. } => listener.as_raw_fd(),
            Listener::Tcp(listener) => listener.as_raw_fd(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Ipc { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn write_frame(stream: &mut Stream, payload: &[u8]) -> Result<(), NetError> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).map_err(NetError::Send)?;
    stream.flush().map_err(NetError::Send)
}

fn read_rest(stream: &mut Stream, buf: &mut [u8]) -> Result<(), NetError> {
    stream.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            NetError::Disconnected
        } else {
            NetError::Recv(e)
        }
    })
}

/// Reads one whole frame, blocking until it arrives.
fn read_frame(stream: &mut Stream) -> Result<Vec<u8>, NetError> {
    let mut len_buf = [0u8; 4];
    read_rest(stream, &mut len_buf)?;
    read_frame_body(stream, len_buf)
}

fn read_frame_body(stream: &mut Stream, len_buf: [u8; 4]) -> Result<Vec<u8>, NetError> {
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetError::Oversized(len));
    }
    let mut payload = vec![0u8; len];
    read_rest(stream, &mut payload)?;
    Ok(payload)
}

/// Attempts to read one frame without blocking when no data is pending.
///
/// Once the first byte of a frame is in, the remainder is read in blocking
/// mode: peers always write whole frames.
fn try_read_frame(stream: &mut Stream) -> Result<Option<Vec<u8>>, NetError> {
    stream.set_nonblocking(true).map_err(NetError::Recv)?;
    let mut len_buf = [0u8; 4];
    let first = stream.read(&mut len_buf);
    stream.set_nonblocking(false).map_err(NetError::Recv)?;
    let read = match first {
        Ok(0) => return Err(NetError::Disconnected),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
        Err(e) => return Err(NetError::Recv(e)),
    };
    if read < len_buf.len() {
        read_rest(stream, &mut len_buf[read..])?;
    }
    read_frame_body(stream, len_buf).map(Some)
}

/// The requesting end of a request/reply pair.
///
/// The single [ReqSocket::request] operation keeps send and recv strictly
/// alternating.
#[derive(Debug)]
pub struct ReqSocket {
    stream: Stream,
    uri: String,
}

impl ReqSocket {
    /// Connects to a bound endpoint.
    pub fn connect(endpoint: &Endpoint) -> Result<Self, NetError> {
        let connect_err = |source| NetError::Connect {
            uri: endpoint.uri(),
            source,
        };
        let stream = match endpoint {
            Endpoint::Ipc(path) => Stream::Ipc(UnixStream::connect(path).map_err(connect_err)?),
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).map_err(connect_err)?;
                stream.set_nodelay(true).map_err(connect_err)?;
                Stream::Tcp(stream)
            }
        };
        Ok(ReqSocket {
            stream,
            uri: endpoint.uri(),
        })
    }

    /// Connects to an endpoint, retrying while the peer is still binding.
    pub fn connect_retry(endpoint: &Endpoint, timeout: Duration) -> Result<Self, NetError> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::connect(endpoint) {
                Ok(socket) => return Ok(socket),
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(err);
                    }
                    debug!("Connection to `{endpoint}` not ready yet, retrying");
                    std::thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        }
    }

    /// Sends a request and blocks until the reply body arrives.
    pub fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, NetError> {
        write_frame(&mut self.stream, payload)?;
        read_frame(&mut self.stream)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// The replying end of a request/reply pair, wrapping one accepted stream.
#[derive(Debug)]
pub struct RepSocket {
    stream: Stream,
}

impl RepSocket {
    pub fn new(stream: Stream) -> Self {
        RepSocket { stream }
    }

    /// Returns the next pending request, or `None` when no data has
    /// arrived yet.
    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        try_read_frame(&mut self.stream)
    }

    /// Sends a reply body for the last received request.
    pub fn reply(&mut self, payload: &[u8]) -> Result<(), NetError> {
        write_frame(&mut self.stream, payload)
    }
}

impl AsRawFd for RepSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Sending half of an in-process control pair.
///
/// A control message is a single 4-byte little-endian word. Its arrival is
/// what matters for wake/stop signaling; the watchdog additionally uses the
/// word to carry an exit status.
#[derive(Debug)]
pub struct ControlSender(UnixStream);

impl ControlSender {
    pub fn send(&self, word: i32) -> Result<(), NetError> {
        (&self.0)
            .write_all(&word.to_le_bytes())
            .map_err(NetError::Send)
    }
}

/// Receiving half of an in-process control pair.
#[derive(Debug)]
pub struct ControlReceiver(UnixStream);

impl ControlReceiver {
    pub fn recv(&self) -> Result<i32, NetError> {
        let mut buf = [0u8; 4];
        (&self.0).read_exact(&mut buf).map_err(NetError::Recv)?;
        Ok(i32::from_le_bytes(buf))
    }
}

impl AsRawFd for ControlReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Creates a connected in-process control pair.
pub fn control_pair() -> Result<(ControlSender, ControlReceiver), NetError> {
    let (sender, receiver) = UnixStream::pair().map_err(NetError::Send)?;
    Ok((ControlSender(sender), ControlReceiver(receiver)))
}

/// Readiness poller over a small, fixed set of file descriptors.
#[derive(Debug)]
pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new() -> Result<Self, NetError> {
        Ok(Poller {
            poll: Poll::new().map_err(NetError::Poll)?,
            events: Events::with_capacity(64),
        })
    }

    pub fn register(&self, fd: RawFd, token: usize) -> Result<(), NetError> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(token), Interest::READABLE)
            .map_err(NetError::Poll)
    }

    pub fn deregister(&self, fd: RawFd) -> Result<(), NetError> {
        self.poll
            .registry()
            .deregister(&mut SourceFd(&fd))
            .map_err(NetError::Poll)
    }

    /// Blocks until at least one registered descriptor is readable and
    /// returns the ready tokens.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<usize>, NetError> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetError::Poll(e)),
            }
        }
        Ok(self.events.iter().map(|event| event.token().0).collect())
    }
}
