// efleet: resilient simulation of electric bus fleets under disruptions
// Copyright (C) 2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use efleet::{
    config::{SimulationConfig, SimulationMode},
    data::load_network,
    sim::{SimulationEngine, SimulationLogger},
};

/// Run the fleet simulation over a network loaded from CSV files.
#[derive(Debug, Parser)]
struct Cli {
    /// Directory holding routes.csv, chargers.csv, depots.csv and schedule.csv.
    #[clap(long = "data", short = 'd', default_value = "data")]
    data_dir: PathBuf,
    /// Optional TOML configuration file; defaults apply for everything not set.
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,
    /// Simulated duration in hours.
    #[clap(long, short = 't', default_value_t = 2.0)]
    duration: f64,
    /// Override the temporal model from the configuration.
    #[clap(long, short = 'm', value_enum)]
    mode: Option<SimulationMode>,
    /// Override the master random seed.
    #[clap(long, short = 's')]
    seed: Option<u64>,
    /// Override the log output path.
    #[clap(long, short = 'o')]
    log_file: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let args = Cli::parse();
    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_toml_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.hybrid.mode = mode;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(log_file) = args.log_file {
        config.log_file = log_file;
    }

    let mut state = load_network(&args.data_dir, &config)?;
    info!(
        "Simulating {} buses over {} routes for {} hours",
        state.buses.len(),
        state.routes.len(),
        args.duration
    );

    let logger = SimulationLogger::new(&config.log_file)?;
    let mut engine = SimulationEngine::new(config, logger)?;
    engine.run(&mut state, args.duration)?;
    Ok(())
}
