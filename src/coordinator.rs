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

//! The coordinator process.
//!
//! Binds one sync endpoint per partition and serves two barriers (startup
//! and per-tick) plus the termination rendezvous over a unified poll. A
//! watchdog thread reaps the partition child processes; a partition dying
//! with an error before the run completed makes the coordinator kill the
//! survivors and propagate the status.
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use log::{debug, error, info, warn};

use crate::error::NetError;
use crate::io::cleanup_sockets_dir;
use crate::net::endpoint::{Endpoint, Transport};
use crate::net::frame::{encode_bool_reply, SyncRequest, ERR_REPLY, OK_REPLY, REPEATED_REPLY};
use crate::net::socket::{control_pair, ControlSender, Listener, Poller, RepSocket};
use crate::types::PartitionId;

/// How often the watchdog sweeps the children for exits.
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration of the coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub data_dir: PathBuf,
    pub transport: Transport,
    /// Simulation time the partitions end at; negative means termination
    /// is driven by all partitions becoming empty.
    pub end_time: i32,
    pub num_partitions: usize,
}

/// A spawned partition worker process.
#[derive(Debug)]
pub struct PartitionProcess {
    pub part_id: PartitionId,
    pub child: Child,
}

#[derive(Debug)]
struct SyncSlot {
    listener: Option<Listener>,
    conn: Option<RepSocket>,
    reached_barrier: bool,
    reached_step_barrier: bool,
    empty: bool,
    stopped: bool,
}

impl SyncSlot {
    fn new(listener: Listener) -> Self {
        SyncSlot {
            listener: Some(listener),
            conn: None,
            reached_barrier: false,
            reached_step_barrier: false,
            empty: false,
            stopped: false,
        }
    }
}

/// Barrier coordinator over all partitions of a run.
pub struct Coordinator {
    opts: CoordinatorOptions,
    slots: Vec<SyncSlot>,
    steps: Arc<AtomicUsize>,
    all_finished: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(opts: CoordinatorOptions) -> Self {
        Coordinator {
            opts,
            slots: Vec::new(),
            steps: Arc::new(AtomicUsize::new(0)),
            all_finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of per-tick barriers released so far.
    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::Relaxed)
    }

    /// Binds one sync endpoint per partition. Must run before the workers
    /// are spawned so that their connection attempts find the sockets.
    pub fn bind(&mut self) -> Result<()> {
        ensure!(self.slots.is_empty(), "coordinator already bound");
        for i in 0..self.opts.num_partitions {
            let endpoint = Endpoint::sync(self.opts.transport, &self.opts.data_dir, i as PartitionId);
            let listener = Listener::bind(&endpoint)
                .with_context(|| format!("Coordinator failed to bind sync socket {i}"))?;
            self.slots.push(SyncSlot::new(listener));
        }
        debug!("Coordinator: bound {} sync sockets", self.opts.num_partitions);
        Ok(())
    }

    /// Runs the coordination loop until every partition signaled
    /// `FINISHED`, or a partition process died with an error.
    ///
    /// Returns the exit status for the whole run: `0` on clean completion,
    /// otherwise the status of the failing partition.
    pub fn run(&mut self, children: Vec<PartitionProcess>) -> Result<i32> {
        let n = self.opts.num_partitions;
        ensure!(self.slots.len() == n, "coordinator is not bound");
        let mut slots = std::mem::take(&mut self.slots);

        let mut poller = Poller::new()?;
        for (token, slot) in slots.iter().enumerate() {
            if let Some(listener) = slot.listener.as_ref() {
                poller.register(listener.as_raw_fd(), token)?;
            }
        }
        let control_token = n;
        let (control_tx, control_rx) = control_pair()?;
        poller.register(control_rx.as_raw_fd(), control_token)?;

        let watchdog = {
            let steps = Arc::clone(&self.steps);
            let all_finished = Arc::clone(&self.all_finished);
            let end_time = self.opts.end_time;
            std::thread::Builder::new()
                .name("part-watchdog".to_owned())
                .spawn(move || watch_partitions(children, control_tx, steps, all_finished, end_time))
                .map_err(NetError::Send)?
        };

        let mut progress =
            crate::progress::StepProgress::new((self.opts.end_time > -1).then(|| self.opts.end_time as u64));
        let mut barrier_count = 0usize;
        let mut step_count = 0usize;
        let mut stopped_count = 0usize;
        let mut start_time: Option<Instant> = None;
        let mut status = 0i32;

        'main: loop {
            for token in poller.wait(None)? {
                if token == control_token {
                    match control_rx.recv() {
                        Ok(exit_status) => {
                            debug!("Coordinator: received control message {exit_status}");
                            if exit_status != 0 {
                                status = exit_status;
                                break 'main;
                            }
                        }
                        // The watchdog is gone; nothing more will arrive
                        // on the pair.
                        Err(_) => poller.deregister(control_rx.as_raw_fd())?,
                    }
                    continue;
                }

                let slot = &mut slots[token];
                if slot.conn.is_none() {
                    if let Some(listener) = slot.listener.take() {
                        let stream = listener.accept()?;
                        poller.deregister(listener.as_raw_fd())?;
                        poller.register(stream.as_raw_fd(), token)?;
                        slot.conn = Some(RepSocket::new(stream));
                    } else {
                        continue;
                    }
                }
                // Drain everything that is already buffered: with an
                // edge-triggered poll, a message left behind would not
                // raise another event.
                let mut payloads = Vec::new();
                while let Some(socket) = slot.conn.as_mut() {
                    match socket.try_recv() {
                        Ok(Some(payload)) => payloads.push(payload),
                        Ok(None) => break,
                        Err(NetError::Disconnected) => {
                            debug!("Coordinator: partition {token} closed its sync socket");
                            poller.deregister(socket.as_raw_fd())?;
                            slot.conn = None;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                for payload in payloads {
                    let Some(socket) = slot.conn.as_mut() else { break };
                    match SyncRequest::decode(&payload) {
                        Ok(SyncRequest::Barrier) => {
                            if !slot.reached_barrier {
                                slot.reached_barrier = true;
                                barrier_count += 1;
                                debug!(
                                    "Coordinator: partition {token} reached barrier ({barrier_count}/{n})"
                                );
                            } else {
                                error!(
                                    "Coordinator: partition {token} sent the barrier message twice"
                                );
                                socket.reply(REPEATED_REPLY)?;
                            }
                        }
                        Ok(SyncRequest::BarrierStep { maybe_finished }) => {
                            if !slot.reached_step_barrier {
                                slot.reached_step_barrier = true;
                                slot.empty = maybe_finished;
                                step_count += 1;
                                debug!(
                                    "Coordinator: partition {token} reached step barrier ({step_count}/{n})"
                                );
                            } else {
                                error!(
                                    "Coordinator: partition {token} sent the step barrier message twice"
                                );
                                socket.reply(REPEATED_REPLY)?;
                            }
                        }
                        Ok(SyncRequest::Finished) => {
                            if !slot.stopped {
                                slot.stopped = true;
                                stopped_count += 1;
                                // Stopping never blocks the signaling
                                // partition, so respond immediately.
                                socket.reply(OK_REPLY)?;
                            } else {
                                error!(
                                    "Coordinator: partition {token} sent the finished message twice"
                                );
                                socket.reply(REPEATED_REPLY)?;
                            }
                        }
                        Err(e) => {
                            error!(
                                "Coordinator: malformed sync message from partition {token}: {e}"
                            );
                            socket.reply(ERR_REPLY)?;
                        }
                    }
                }
            }

            if stopped_count >= n {
                self.all_finished.store(true, Ordering::Relaxed);
                break;
            }
            if barrier_count >= n {
                debug!("Coordinator: all partitions reached the barrier");
                barrier_count = 0;
                for slot in slots.iter_mut() {
                    slot.reached_barrier = false;
                }
                for slot in slots.iter_mut() {
                    if let Some(socket) = slot.conn.as_mut() {
                        socket.reply(OK_REPLY)?;
                    }
                }
                // The wall clock starts at the first release.
                start_time.get_or_insert_with(Instant::now);
            }
            if step_count >= n {
                let all_empty = slots.iter().all(|slot| slot.empty);
                step_count = 0;
                for slot in slots.iter_mut() {
                    slot.reached_step_barrier = false;
                }
                self.steps.fetch_add(1, Ordering::Relaxed);
                progress.inc();
                if all_empty {
                    debug!("Coordinator: all partitions empty after step");
                }
                for slot in slots.iter_mut() {
                    if let Some(socket) = slot.conn.as_mut() {
                        socket.reply(&encode_bool_reply(all_empty))?;
                    }
                }
                start_time.get_or_insert_with(Instant::now);
            }
        }

        progress.finish();
        drop(slots);
        if watchdog.join().is_err() {
            error!("Coordinator: watchdog thread panicked");
        }
        cleanup_sockets_dir(&self.opts.data_dir);

        if status == 0 {
            if let Some(start) = start_time {
                info!(
                    "Parallel simulation took {:.1}ms",
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
        }
        Ok(status)
    }
}

/// Maps an exit status to the code propagated to the user, turning a
/// signal death into the conventional `128 + signo`.
fn exit_status_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Reaps the partition processes.
///
/// A child dying with an error before the run completed gets the
/// surviving children killed and its status posted on the control pair.
fn watch_partitions(
    mut children: Vec<PartitionProcess>,
    control: ControlSender,
    steps: Arc<AtomicUsize>,
    all_finished: Arc<AtomicBool>,
    end_time: i32,
) {
    while !children.is_empty() {
        let mut index = 0;
        while index < children.len() {
            match children[index].child.try_wait() {
                Ok(Some(exit)) => {
                    let part = children.remove(index);
                    let status = exit_status_code(exit);
                    let step = steps.load(Ordering::Relaxed);
                    if end_time >= 0 {
                        info!(
                            "Coordinator: partition {} [pid {}] exited with status {status} at step {step}/{end_time}",
                            part.part_id,
                            part.child.id()
                        );
                    } else {
                        info!(
                            "Coordinator: partition {} [pid {}] exited with status {status} at step {step}",
                            part.part_id,
                            part.child.id()
                        );
                    }
                    if status != 0 {
                        if !all_finished.load(Ordering::Relaxed) {
                            error!(
                                "Coordinator: partition {} ended with an error, stopping the remaining partitions",
                                part.part_id
                            );
                            for other in &mut children {
                                let _ = other.child.kill();
                                let _ = other.child.wait();
                            }
                            if let Err(e) = control.send(status) {
                                error!("Coordinator: failed to post exit status: {e}");
                            }
                            return;
                        }
                        warn!(
                            "Coordinator: partition {} ended with an error, but everything finished",
                            part.part_id
                        );
                    }
                }
                Ok(None) => index += 1,
                Err(e) => {
                    warn!(
                        "Coordinator: failed to poll partition {}: {e}",
                        children[index].part_id
                    );
                    index += 1;
                }
            }
        }
        std::thread::sleep(REAP_INTERVAL);
    }
}
