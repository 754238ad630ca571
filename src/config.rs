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

//! All tunables of the simulation, grouped per subsystem. Every field has a sensible default, so
//! an empty TOML file (or no file at all) yields a runnable configuration.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

/// Error raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be parsed as TOML.
    #[error("Cannot parse the configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Temporal model used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    /// Advance the clock by a fixed step and run the optimizer every `mip.interval_steps` ticks.
    FixedInterval,
    /// Iterate the pre-built hybrid schedule (event batches + adaptive steps); the optimizer runs
    /// on batch entries only.
    HybridAdaptive,
}

/// Top-level configuration. All sub-sections are optional in the TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Energy drawn per driven kilometer, in kWh.
    pub energy_kwh_per_km: f64,
    /// Default battery capacity for buses without an explicit one, in kWh.
    pub battery_capacity_kwh: f64,
    /// SoC (in percent) below which a bus diverts to the nearest compatible charger.
    pub critical_soc_percent: f64,
    /// Minimum dwell time for a bus-initiated charging session, in seconds.
    pub charging_min_seconds: f64,
    /// Average commercial speed, in meters per second.
    pub average_speed_mps: f64,
    /// Step size of the fixed-interval mode, in seconds.
    pub step_seconds: f64,
    /// Master seed for every source of randomness (random disruptions, traffic delay).
    pub seed: u64,
    /// Upper bound on the number of worker threads for the per-tick bus fan-out.
    pub workers: usize,
    /// Directory holding the persistent distance-matrix cache.
    pub cache_dir: PathBuf,
    /// Path of the CSV log produced by the simulation.
    pub log_file: PathBuf,
    /// Rolling-horizon optimizer settings.
    pub mip: MipConfig,
    /// Random disruption settings.
    pub disruption: DisruptionConfig,
    /// Hybrid event-driven/time-stepped scheduler settings.
    pub hybrid: HybridConfig,
    /// Flood hazard settings.
    pub flood: FloodConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            energy_kwh_per_km: 1.4,
            battery_capacity_kwh: 250.0,
            critical_soc_percent: 22.0,
            charging_min_seconds: 120.0,
            average_speed_mps: 5.0,
            step_seconds: 60.0,
            seed: 42,
            workers: 8,
            cache_dir: PathBuf::from("."),
            log_file: PathBuf::from("simulation_log.csv"),
            mip: Default::default(),
            disruption: Default::default(),
            hybrid: Default::default(),
            flood: Default::default(),
        }
    }
}

impl SimulationConfig {
    /// Read the configuration from a TOML file. Missing sections and fields fall back to their
    /// defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&raw)?)
    }

    /// SoC percentage drained per driven kilometer for a battery of the given capacity. Both the
    /// bus agent and the optimizer use this same derivation.
    pub fn soc_percent_per_km(&self, battery_capacity_kwh: f64) -> f64 {
        self.energy_kwh_per_km / battery_capacity_kwh * 100.0
    }
}

/// Settings of the rolling-horizon optimizer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MipConfig {
    /// Whether central optimization runs at all. When disabled, buses act autonomously.
    pub enabled: bool,
    /// Planning horizon, in minutes. The model is discretized per minute.
    pub horizon_minutes: usize,
    /// Wall-clock budget handed to the solver, in seconds.
    pub time_limit_seconds: u64,
    /// Relative MIP gap at which the solver may stop.
    pub gap_rel: f64,
    /// Cost per unit of unserved demand (doubled while any disruption is active).
    pub unserved_demand_cost: f64,
    /// Penalty weight on battery drain.
    pub battery_drain_penalty: f64,
    /// Run the optimizer every this many ticks in fixed-interval mode.
    pub interval_steps: usize,
}

impl Default for MipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_minutes: 5,
            time_limit_seconds: 10,
            gap_rel: 0.20,
            unserved_demand_cost: 10.0,
            battery_drain_penalty: 0.2,
            interval_steps: 10,
        }
    }
}

/// Settings of the random disruption generator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisruptionConfig {
    /// Whether random disruptions are generated.
    pub random_enabled: bool,
    /// Per-tick probability of a new random disruption.
    pub probability: f64,
    /// Minimum number of consecutive stops affected.
    pub min_stops: usize,
    /// Maximum number of consecutive stops affected.
    pub max_stops: usize,
    /// Minimum duration, in minutes.
    pub min_minutes: u64,
    /// Maximum duration, in minutes.
    pub max_minutes: u64,
}

impl Default for DisruptionConfig {
    fn default() -> Self {
        Self {
            random_enabled: true,
            probability: 0.05,
            min_stops: 1,
            max_stops: 3,
            min_minutes: 5,
            max_minutes: 15,
        }
    }
}

/// Settings of the hybrid event-driven/time-stepped scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HybridConfig {
    /// Which temporal model the engine runs.
    pub mode: SimulationMode,
    /// Events within this window of the earliest pending event form one batch, in seconds.
    pub batch_threshold_seconds: f64,
    /// Step size while an event is near, in seconds.
    pub fine_step_seconds: f64,
    /// Step size during quiet periods, in seconds.
    pub coarse_step_seconds: f64,
    /// Gaps larger than this switch to the coarse step, in seconds.
    pub gap_threshold_seconds: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            mode: SimulationMode::FixedInterval,
            batch_threshold_seconds: 30.0,
            fine_step_seconds: 60.0,
            coarse_step_seconds: 300.0,
            gap_threshold_seconds: 300.0,
        }
    }
}

/// Settings of the flood hazard map.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FloodConfig {
    /// Whether flood hazards are simulated at all.
    pub enabled: bool,
    /// Path to the depth raster (ESRI ASCII grid, centimeters). `None` disables the map.
    pub raster_file: Option<PathBuf>,
    /// Water depth at which a component counts as flooded, in meters.
    pub threshold_m: f64,
    /// Rainfall accumulation rate, in centimeters per hour.
    pub precipitation_cm_per_hr: f64,
    /// Drainage rate, in centimeters per hour.
    pub recession_cm_per_hr: f64,
    /// Duration of an emitted flood disruption, in minutes.
    pub duration_minutes: u64,
    /// Whether flooded route stops produce disruptions.
    pub disrupt_routes: bool,
    /// Whether flooded stops are tracked individually.
    pub disrupt_stops: bool,
    /// Whether flooded charging stations become non-operational.
    pub disrupt_chargers: bool,
    /// Whether flooded depots are tracked.
    pub disrupt_depots: bool,
    /// Whether flooded buses become stranded.
    pub disrupt_buses: bool,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            raster_file: None,
            threshold_m: 0.5,
            precipitation_cm_per_hr: 0.0,
            recession_cm_per_hr: 0.0,
            duration_minutes: 120,
            disrupt_routes: true,
            disrupt_stops: true,
            disrupt_chargers: true,
            disrupt_depots: true,
            disrupt_buses: true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: SimulationConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.battery_capacity_kwh, 250.0);
        assert_eq!(cfg.mip.horizon_minutes, 5);
        assert_eq!(cfg.hybrid.mode, SimulationMode::FixedInterval);
        assert!(!cfg.flood.enabled);
    }

    #[test]
    fn partial_section_overrides() {
        let cfg: SimulationConfig = toml::from_str(
            r#"
            critical_soc_percent = 30.0

            [mip]
            horizon_minutes = 15

            [hybrid]
            mode = "hybrid_adaptive"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.critical_soc_percent, 30.0);
        assert_eq!(cfg.mip.horizon_minutes, 15);
        // untouched fields keep their defaults
        assert_eq!(cfg.mip.time_limit_seconds, 10);
        assert_eq!(cfg.hybrid.mode, SimulationMode::HybridAdaptive);
    }

    #[test]
    fn soc_drain_derivation() {
        let cfg = SimulationConfig::default();
        // 1.4 kWh/km on a 250 kWh pack is 0.56 % per km
        assert!((cfg.soc_percent_per_km(250.0) - 0.56).abs() < 1e-9);
    }
}
