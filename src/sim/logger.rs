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

//! The CSV log sink: one row per bus per tick.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use itertools::Itertools;

use super::state::SimulationState;

/// Column headers of the log.
const FIELDS: [&str; 13] = [
    "timestamp",
    "sim_time",
    "bus_id",
    "status",
    "latitude",
    "longitude",
    "soc",
    "delay_seconds",
    "unserved_demand",
    "current_route",
    "current_stop_index",
    "charging_station",
    "active_disruptions",
];

/// Writes the per-tick fleet state to a CSV file.
pub struct SimulationLogger {
    /// The open CSV writer.
    writer: csv::Writer<File>,
    /// Where the log is written.
    path: PathBuf,
}

impl std::fmt::Debug for SimulationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationLogger")
            .field("path", &self.path)
            .finish()
    }
}

impl SimulationLogger {
    /// Create the log file and write the header row.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, csv::Error> {
        let path = path.as_ref().to_path_buf();
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(FIELDS)?;
        writer.flush()?;
        Ok(Self { writer, path })
    }

    /// Where the log is written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row per bus for the tick at `now`.
    pub fn log_step(&mut self, now: f64, state: &SimulationState) -> Result<(), csv::Error> {
        let disruptions = state
            .active_disruptions
            .iter()
            .map(|d| format!("{}:{}", d.route_id, d.affected_stop_ids.iter().join(",")))
            .join("; ");
        let disruptions = if disruptions.is_empty() {
            "None".to_string()
        } else {
            disruptions
        };
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let sim_time = DateTime::from_timestamp(now as i64, 0)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| format!("{now}"));

        for bus in &state.buses {
            let route_name = bus
                .current_route
                .as_ref()
                .and_then(|id| state.routes.get(id))
                .map(|r| r.name.clone())
                .unwrap_or_else(|| "None".to_string());
            let station_name = bus
                .charging
                .as_ref()
                .map(|c| c.station.clone())
                .unwrap_or_else(|| "None".to_string());
            let row = [
                timestamp.clone(),
                sim_time.clone(),
                bus.bus_id.clone(),
                bus.status.to_string(),
                bus.current_location.lat.to_string(),
                bus.current_location.lon.to_string(),
                format!("{:.2}", bus.soc()),
                format!("{:.1}", bus.delay_seconds),
                format!("{:.2}", bus.unserved_demand),
                route_name,
                bus.current_stop_index.to_string(),
                station_name,
                disruptions.clone(),
            ];
            self.writer.write_record(&row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        fleet::Bus,
        model::{Depot, Location},
    };
    use std::collections::BTreeMap;

    #[test]
    fn one_row_per_bus_plus_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut logger = SimulationLogger::new(&path).unwrap();

        let depot = Depot::new("Main", Location::new(8.5, 76.9));
        let buses = vec![
            Bus::new("Bus_1", &depot, 250.0, "Default", 42),
            Bus::new("Bus_2", &depot, 250.0, "Default", 42),
        ];
        let state = SimulationState::new(
            BTreeMap::new(),
            BTreeMap::new(),
            Vec::new(),
            BTreeMap::from([("Main".to_string(), depot)]),
            buses,
        );
        logger.log_step(600.0, &state).unwrap();
        logger.log_step(660.0, &state).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1 + 4);
        assert!(lines[0].starts_with("timestamp,sim_time,bus_id,status"));
        assert!(lines[1].contains("Bus_1"));
        assert!(lines[1].contains("in_depot"));
        assert!(lines[1].contains("100.00"));
        assert!(lines[1].ends_with("None"));
        // sim_time renders as HH:MM:SS
        assert!(lines[1].contains("00:10:00"));
    }
}
