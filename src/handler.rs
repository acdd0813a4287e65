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

//! Inbound request handling for one specific neighbor.
//!
//! Each handler runs a dedicated listener thread. Read requests are served
//! directly against the shared partition core; write requests are buffered
//! and replayed by the main thread between ticks, so they can never race
//! the simulator step or the border scans. The listener is stopped between
//! ticks by a control message on an in-process pair: a flag alone would
//! not wake the blocking poll.
use std::os::fd::AsRawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, error};

use crate::error::NetError;
use crate::net::endpoint::{Endpoint, Transport};
use crate::net::frame::{
    encode_bool_reply, encode_strings_reply, NeighborRequest, ERR_REPLY, OK_REPLY,
};
use crate::net::socket::{control_pair, ControlReceiver, ControlSender, Listener, Poller, RepSocket};
use crate::ops::OperationQueue;
use crate::partition::PartitionCore;
use crate::types::{AddVehicle, PartitionId, SetSpeed};

const TOKEN_REQUEST: usize = 0;
const TOKEN_CONTROL: usize = 1;

#[derive(Debug, Default)]
struct OperationBuffers {
    add_vehicle: OperationQueue<AddVehicle>,
    set_speed: OperationQueue<SetSpeed>,
}

#[derive(Debug, Default)]
struct ListenerState {
    /// The listener should serve requests.
    listening: bool,
    /// The current listening period should end.
    stop: bool,
    /// The listener thread should exit.
    term: bool,
    /// The listener thread is parked in its idle wait.
    waiting: bool,
    /// The listener thread has exited.
    dead: bool,
}

struct HandlerShared {
    core: Arc<PartitionCore>,
    client_id: PartitionId,
    buffers: Mutex<OperationBuffers>,
    state: Mutex<ListenerState>,
    signal: Condvar,
}

/// Serves the requests of one neighbor partition.
///
/// Listener state machine: `Idle` until [NeighborHandler::listen_on],
/// `Listening` until a control message sends it back to `Idle`,
/// `Terminated` after [NeighborHandler::stop].
pub struct NeighborHandler {
    shared: Arc<HandlerShared>,
    control: ControlSender,
    thread: Option<JoinHandle<()>>,
}

impl NeighborHandler {
    /// Binds the request endpoint of the `(client, owner)` pair and starts
    /// the listener thread, initially idle.
    pub fn start(
        core: Arc<PartitionCore>,
        client_id: PartitionId,
        transport: Transport,
        data_dir: &std::path::Path,
    ) -> Result<Self, NetError> {
        let owner_id = core.id();
        let endpoint = Endpoint::neighbor(transport, data_dir, client_id, owner_id);
        let listener = Listener::bind(&endpoint)?;
        let (control_tx, control_rx) = control_pair()?;
        let shared = Arc::new(HandlerShared {
            core,
            client_id,
            buffers: Mutex::new(OperationBuffers::default()),
            state: Mutex::new(ListenerState::default()),
            signal: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(format!("nb{client_id}-{owner_id}"))
            .spawn(move || {
                if let Err(e) = listener_loop(&thread_shared, listener, control_rx) {
                    error!(
                        "Handler {}<-{}: listener failed: {e}",
                        thread_shared.core.id(),
                        thread_shared.client_id
                    );
                }
                let mut state = thread_shared.state.lock().unwrap();
                state.dead = true;
                thread_shared.signal.notify_all();
            })
            .map_err(NetError::Send)?;
        Ok(NeighborHandler {
            shared,
            control: control_tx,
            thread: Some(thread),
        })
    }

    pub fn client_id(&self) -> PartitionId {
        self.shared.client_id
    }

    /// Enables request serving. Idempotent; must not be called after
    /// [NeighborHandler::stop].
    pub fn listen_on(&self) {
        let mut state = self.shared.state.lock().unwrap();
        debug_assert!(!state.term, "listen_on after stop");
        if state.term || state.listening {
            return;
        }
        state.listening = true;
        state.stop = false;
        self.shared.signal.notify_all();
    }

    /// Asks the listener to return to idle after the current poll
    /// iteration. Buffered operations are kept.
    pub fn listen_off(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.listening {
            return;
        }
        state.stop = true;
        drop(state);
        if let Err(e) = self.control.send(0) {
            debug!(
                "Handler {}<-{}: control send failed during listen_off: {e}",
                self.shared.core.id(),
                self.shared.client_id
            );
        }
    }

    /// Blocks until the listener thread is parked in its idle wait.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.waiting && !state.dead {
            state = self.shared.signal.wait(state).unwrap();
        }
    }

    /// Replays the buffered writes into the simulator: insertions first,
    /// then speed changes, each in FIFO order. The caller quiesces the
    /// listener first.
    pub fn apply_mutable_operations(&self) {
        let (adds, speeds) = {
            let mut buffers = self.shared.buffers.lock().unwrap();
            (buffers.add_vehicle.take(), buffers.set_speed.take())
        };
        for op in adds {
            if let Err(e) = self.shared.core.add_vehicle(&op) {
                error!(
                    "Manager {}: error in addVehicle({}) from partition {}: {e}",
                    self.shared.core.id(),
                    op.veh_id,
                    self.shared.client_id
                );
            }
        }
        for op in speeds {
            if let Err(e) = self.shared.core.set_vehicle_speed(&op.veh_id, op.speed) {
                error!(
                    "Manager {}: error in setVehicleSpeed({}, {}) from partition {}: {e}",
                    self.shared.core.id(),
                    op.veh_id,
                    op.speed,
                    self.shared.client_id
                );
            }
        }
    }

    /// Terminates the listener thread; [NeighborHandler::join] afterwards.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.term = true;
            state.stop = true;
        }
        let _ = self.control.send(0);
        self.shared.signal.notify_all();
    }

    /// Joins the terminated listener thread.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(
                    "Handler {}<-{}: listener thread panicked",
                    self.shared.core.id(),
                    self.shared.client_id
                );
            }
        }
    }
}

fn listener_loop(
    shared: &HandlerShared,
    listener: Listener,
    control: ControlReceiver,
) -> Result<(), NetError> {
    let mut poller = Poller::new()?;
    poller.register(listener.as_raw_fd(), TOKEN_REQUEST)?;
    poller.register(control.as_raw_fd(), TOKEN_CONTROL)?;
    let mut listener = Some(listener);
    let mut conn: Option<RepSocket> = None;

    loop {
        // Idle: wait until the runtime enables listening or terminates.
        {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.term {
                    return Ok(());
                }
                if state.listening {
                    break;
                }
                state.waiting = true;
                shared.signal.notify_all();
                state = shared.signal.wait(state).unwrap();
            }
            state.waiting = false;
        }
        // Listening: serve requests until a control message ends the
        // period.
        loop {
            for token in poller.wait(None)? {
                match token {
                    TOKEN_CONTROL => {
                        control.recv()?;
                    }
                    TOKEN_REQUEST => {
                        if conn.is_none() {
                            let Some(bound) = listener.take() else {
                                continue;
                            };
                            let stream = bound.accept()?;
                            poller.deregister(bound.as_raw_fd())?;
                            poller.register(stream.as_raw_fd(), TOKEN_REQUEST)?;
                            conn = Some(RepSocket::new(stream));
                        }
                        // Drain every buffered request: with an
                        // edge-triggered poll, one left behind would not
                        // raise another event.
                        while let Some(socket) = conn.as_mut() {
                            match socket.try_recv() {
                                Ok(Some(request)) => serve(shared, socket, &request)?,
                                Ok(None) => break,
                                Err(NetError::Disconnected) => {
                                    debug!(
                                        "Handler {}<-{}: peer disconnected",
                                        shared.core.id(),
                                        shared.client_id
                                    );
                                    poller.deregister(socket.as_raw_fd())?;
                                    conn = None;
                                }
                                Err(e) => return Err(e),
                            }
                        }
                    }
                    _ => {}
                }
            }
            let mut state = shared.state.lock().unwrap();
            if state.stop || state.term {
                state.stop = false;
                state.listening = false;
                break;
            }
        }
    }
}

/// Decodes and dispatches one request, sending the reply.
fn serve(
    shared: &HandlerShared,
    socket: &mut RepSocket,
    payload: &[u8],
) -> Result<(), NetError> {
    shared.core.count_message_in();
    let request = match NeighborRequest::decode(payload) {
        Ok(request) => request,
        Err(e) => {
            error!(
                "Handler {}<-{}: malformed request: {e}",
                shared.core.id(),
                shared.client_id
            );
            return socket.reply(ERR_REPLY);
        }
    };
    match request {
        NeighborRequest::GetEdgeVehicles { edge_id } => {
            let vehicles = shared.core.edge_vehicles(&edge_id);
            socket.reply(&encode_strings_reply(&vehicles))
        }
        NeighborRequest::HasVehicle { veh_id } => {
            socket.reply(&encode_bool_reply(shared.core.has_vehicle(&veh_id)))
        }
        NeighborRequest::HasVehicleInEdge { veh_id, edge_id } => socket.reply(&encode_bool_reply(
            shared.core.has_vehicle_in_edge(&veh_id, &edge_id),
        )),
        NeighborRequest::SetVehicleSpeed(op) => {
            let buffered = shared.buffers.lock().unwrap().set_speed.push(op);
            if !buffered {
                error!(
                    "Handler {}<-{}: set-speed buffer full, dropping operation",
                    shared.core.id(),
                    shared.client_id
                );
            }
            socket.reply(OK_REPLY)
        }
        NeighborRequest::AddVehicle(op) => {
            let buffered = shared.buffers.lock().unwrap().add_vehicle.push(op);
            if !buffered {
                error!(
                    "Handler {}<-{}: add-vehicle buffer full, dropping operation",
                    shared.core.id(),
                    shared.client_id
                );
            }
            socket.reply(OK_REPLY)
        }
    }
}
