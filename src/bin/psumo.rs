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

//! Binary to run a partitioned simulation: spawns one worker process per
//! partition and coordinates their barriers.
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use psumo::coordinator::{Coordinator, CoordinatorOptions, PartitionProcess};
use psumo::net::Transport;
use psumo::types::PartitionId;
use psumo::{io, logging};

/// Parallel-Sumo coordinator.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Number of partitions to run
    #[arg(short = 'N', long = "num-parts", default_value_t = 4)]
    num_parts: usize,
    /// Simulation time to end at (negative: run until all partitions are
    /// empty)
    #[arg(short = 'T', long = "end-time", default_value_t = -1, allow_negative_numbers = true)]
    end_time: i32,
    /// Directory with the partitioner output
    #[arg(long = "data-dir", default_value = "data")]
    data_dir: PathBuf,
    /// Use loopback TCP instead of Unix-domain sockets
    #[arg(long)]
    tcp: bool,
    /// Log debug messages to the terminal
    #[arg(short, long)]
    verbose: bool,
    /// Write per-partition simulation and communication times
    #[arg(long)]
    measure_times: bool,
    /// Write a per-tick vehicle-count CSV per partition
    #[arg(long)]
    log_step_vehicles: bool,
    /// Write a per-tick message-count CSV per partition
    #[arg(long)]
    log_msg_counts: bool,
    /// Pass-through arguments for the embedded simulator
    #[arg(last = true)]
    sim_args: Vec<String>,
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(0) => {}
        Ok(status) => {
            info!("Got finish status {status}, exiting");
            std::process::exit(status);
        }
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<i32> {
    logging::initialize_logging(&args.data_dir, "log.txt", args.verbose)?;

    // The partitioner may have produced fewer non-empty partitions than
    // requested.
    let mut num_parts = args.num_parts;
    if num_parts > 1 {
        match io::read_num_partitions(&args.data_dir) {
            Ok(n) => {
                if n != num_parts {
                    info!("Set partition count to {n} from the partitioner output");
                    num_parts = n;
                }
            }
            Err(e) => warn!("Could not read the partition count: {e:#}"),
        }
    }
    if num_parts == 1 {
        info!("Running in single-partition mode (check --num-parts if not intended)");
    }
    if args.end_time >= 0 {
        info!("Will end at time {}", args.end_time);
    } else {
        info!("Will check for empty partitions to end");
    }

    io::prepare_sockets_dir(&args.data_dir)?;
    let transport = if args.tcp { Transport::Tcp } else { Transport::Ipc };
    let mut coordinator = Coordinator::new(CoordinatorOptions {
        data_dir: args.data_dir.clone(),
        transport,
        end_time: args.end_time,
        num_partitions: num_parts,
    });
    // Bind before spawning so the workers find the sync sockets.
    coordinator.bind()?;
    let children = spawn_partitions(args, num_parts)?;
    coordinator.run(children)
}

fn spawn_partitions(args: &Args, num_parts: usize) -> Result<Vec<PartitionProcess>> {
    let exe = std::env::current_exe().context("Failed to locate the current executable")?;
    let part_exe = exe
        .parent()
        .context("Executable has no parent directory")?
        .join("psumo-part");
    (0..num_parts)
        .map(|i| {
            let mut command = Command::new(&part_exe);
            command
                .arg("-P")
                .arg(i.to_string())
                .arg("-T")
                .arg(args.end_time.to_string())
                .arg("-N")
                .arg(num_parts.to_string())
                .arg("--data-dir")
                .arg(&args.data_dir);
            if args.tcp {
                command.arg("--tcp");
            }
            if args.verbose {
                command.arg("--verbose");
            }
            if args.measure_times {
                command.arg("--measure-times");
            }
            if args.log_step_vehicles {
                command.arg("--log-step-vehicles");
            }
            if args.log_msg_counts {
                command.arg("--log-msg-counts");
            }
            if !args.sim_args.is_empty() {
                command.arg("--").args(&args.sim_args);
            }
            let child = command
                .spawn()
                .with_context(|| format!("Failed to spawn partition {i}"))?;
            info!("Created partition {i} on pid {}", child.id());
            Ok(PartitionProcess {
                part_id: i as PartitionId,
                child,
            })
        })
        .collect()
}
