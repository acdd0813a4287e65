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

//! Binary running one partition worker: a single embedded simulator plus
//! the border-crossing runtime around it.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Result};
use clap::Parser;
use log::{error, info};
use psumo::error::NetError;
use psumo::io::{self, PartitionData};
use psumo::net::endpoint::sockets_dir;
use psumo::net::Transport;
use psumo::partition::{PartitionRuntime, RuntimeOptions};
use psumo::sim::ScriptedSim;
use psumo::types::PartitionId;
use psumo::logging;

/// Exit status for failures before the simulation could run.
const SETUP_FAILURE_STATUS: i32 = 2;

/// Parallel-Sumo partition worker.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Id of this partition
    #[arg(short = 'P', long = "part-id")]
    part_id: PartitionId,
    /// Simulation time to end at (negative: run until all partitions are
    /// empty)
    #[arg(short = 'T', long = "end-time", default_value_t = -1, allow_negative_numbers = true)]
    end_time: i32,
    /// Total number of partitions of the run
    #[arg(short = 'N', long = "num-parts", default_value_t = 1)]
    num_parts: usize,
    /// Directory with the partitioner output
    #[arg(long = "data-dir", default_value = "data")]
    data_dir: PathBuf,
    /// Simulator configuration override (default: `part<i>.sumocfg` in the
    /// data directory)
    #[arg(long)]
    cfg: Option<PathBuf>,
    /// Use loopback TCP instead of Unix-domain sockets
    #[arg(long)]
    tcp: bool,
    /// Log debug messages to the terminal
    #[arg(short, long)]
    verbose: bool,
    /// Write simulation and communication time measurements
    #[arg(long)]
    measure_times: bool,
    /// Write a per-tick vehicle-count CSV
    #[arg(long)]
    log_step_vehicles: bool,
    /// Write a per-tick message-count CSV
    #[arg(long)]
    log_msg_counts: bool,
    /// Pass-through arguments for the embedded simulator
    #[arg(last = true)]
    sim_args: Vec<String>,
}

fn main() {
    let args = Args::parse();
    if let Err(e) =
        logging::initialize_logging(&args.data_dir, &format!("log{}.txt", args.part_id), args.verbose)
    {
        eprintln!("ERROR: {e:#}");
        std::process::exit(SETUP_FAILURE_STATUS);
    }
    if let Err(e) = run(&args) {
        error!(
            "Partition {} terminating because of an error: {e:#}",
            args.part_id
        );
        let status = if e.downcast_ref::<NetError>().is_some() {
            SETUP_FAILURE_STATUS
        } else {
            1
        };
        std::process::exit(status);
    }
}

fn run(args: &Args) -> Result<()> {
    std::fs::create_dir_all(sockets_dir(&args.data_dir))?;

    let data = if args.num_parts > 1 {
        let data = io::read_partition_data(&args.data_dir, args.part_id)?;
        ensure!(
            data.id == args.part_id,
            "partData{}.json names partition {}",
            args.part_id,
            data.id
        );
        data
    } else {
        info!("Starting partition in single-partition mode (more or less a plain simulator run)");
        PartitionData {
            id: args.part_id,
            ..Default::default()
        }
    };
    let cfg = args
        .cfg
        .clone()
        .unwrap_or_else(|| io::partition_cfg_file(&args.data_dir, args.part_id));

    let mut opts = RuntimeOptions::new(args.data_dir.clone());
    opts.transport = if args.tcp { Transport::Tcp } else { Transport::Ipc };
    opts.end_time = args.end_time;
    opts.measure_times = args.measure_times;
    opts.log_step_vehicles = args.log_step_vehicles;
    opts.log_msg_counts = args.log_msg_counts;
    opts.sim_args = args.sim_args.clone();

    let sim = Arc::new(ScriptedSim::new());
    let mut runtime = PartitionRuntime::new(sim, &data, cfg, opts)?;
    runtime.run()
}
