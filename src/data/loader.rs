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

//! CSV ingestion of the network: routes and stops, charging stations, depots, and the bus
//! schedules.
//!
//! A missing file or column is an error; a malformed row is not. Bad rows (and rows referencing
//! unknown routes or depots) are logged with their line number and skipped, and the simulation
//! runs on whatever loaded cleanly.

use std::{
    collections::BTreeMap,
    path::Path,
};

use chrono::{NaiveTime, Utc};
use csv::StringRecord;
use log::{info, warn};
use thiserror::Error;

use crate::{
    config::SimulationConfig,
    fleet::{Bus, Trip},
    model::{ChargingStation, Depot, Location, Route, Stop},
    sim::SimulationState,
};

/// File name of the routes CSV inside the data directory.
pub const ROUTES_CSV: &str = "routes.csv";
/// File name of the chargers CSV inside the data directory.
pub const CHARGERS_CSV: &str = "chargers.csv";
/// File name of the depots CSV inside the data directory.
pub const DEPOTS_CSV: &str = "depots.csv";
/// File name of the schedule CSV inside the data directory.
pub const SCHEDULE_CSV: &str = "schedule.csv";

/// Error raised while loading network data.
#[derive(Debug, Error)]
pub enum DataError {
    /// The file could not be opened or read as CSV.
    #[error("Cannot read {file}: {source}")]
    Csv {
        /// The offending file.
        file: String,
        /// The underlying CSV error.
        source: csv::Error,
    },
    /// A required column is missing from the header row.
    #[error("{file}: missing column '{column}'")]
    MissingColumn {
        /// The offending file.
        file: String,
        /// The missing column.
        column: String,
    },
}

/// Open a CSV reader for `path`.
fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, DataError> {
    csv::Reader::from_path(path).map_err(|source| DataError::Csv {
        file: path.display().to_string(),
        source,
    })
}

/// Index of a required column (matched after trimming).
fn required(headers: &StringRecord, path: &Path, column: &str) -> Result<usize, DataError> {
    optional(headers, column).ok_or_else(|| DataError::MissingColumn {
        file: path.display().to_string(),
        column: column.to_string(),
    })
}

/// Index of an optional column.
fn optional(headers: &StringRecord, column: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == column)
}

/// Trimmed cell content, `None` when absent or empty.
fn cell<'r>(record: &'r StringRecord, column: usize) -> Option<&'r str> {
    record.get(column).map(str::trim).filter(|s| !s.is_empty())
}

/// Load stops and routes from the routes CSV. Stops are unique and shared across routes; rows of
/// one route are ordered by their sequence number, and pre-computed consecutive distances are
/// attached to the segments.
pub fn load_stops_and_routes(
    path: &Path,
) -> Result<(BTreeMap<String, Stop>, BTreeMap<String, Route>), DataError> {
    let mut reader = open(path)?;
    let headers = reader
        .headers()
        .map_err(|source| DataError::Csv {
            file: path.display().to_string(),
            source,
        })?
        .clone();
    let c_route_id = required(&headers, path, "Route id")?;
    let c_route_name = required(&headers, path, "Route Name")?;
    let c_stop_id = required(&headers, path, "Stop Id")?;
    let c_stop_name = required(&headers, path, "Stop Name")?;
    let c_lat = required(&headers, path, "Stop lat")?;
    let c_lon = required(&headers, path, "Stop lon")?;
    let c_seq = required(&headers, path, "Seq Number")?;
    let c_dist = optional(&headers, "Consecutive Distance(m)");
    let c_stage = optional(&headers, "isStage");
    let c_demand = optional(&headers, "demand");

    let mut stops: BTreeMap<String, Stop> = BTreeMap::new();
    // per route: (name, rows as (seq, stop_id, distance))
    let mut pending: BTreeMap<String, (String, Vec<(i64, String, Option<f64>)>)> = BTreeMap::new();

    for (line, record) in reader.records().enumerate() {
        let line = line + 2; // header is line 1
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("{}:{line}: skipping unreadable row: {e}", path.display());
                continue;
            }
        };
        let parsed = (|| {
            let route_id = cell(&record, c_route_id)?.to_string();
            let route_name = cell(&record, c_route_name)?.to_string();
            let stop_id = cell(&record, c_stop_id)?.to_string();
            let stop_name = cell(&record, c_stop_name)?.to_string();
            let lat: f64 = cell(&record, c_lat)?.parse().ok()?;
            let lon: f64 = cell(&record, c_lon)?.parse().ok()?;
            let seq: i64 = cell(&record, c_seq)?.parse().ok()?;
            let dist = c_dist
                .and_then(|c| cell(&record, c))
                .and_then(|s| s.parse::<f64>().ok());
            let is_stage = c_stage
                .and_then(|c| cell(&record, c))
                .map(|s| matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false);
            let demand = c_demand
                .and_then(|c| cell(&record, c))
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(1.0);
            Some((route_id, route_name, stop_id, stop_name, lat, lon, seq, dist, is_stage, demand))
        })();
        let Some((route_id, route_name, stop_id, stop_name, lat, lon, seq, dist, is_stage, demand)) =
            parsed
        else {
            warn!("{}:{line}: skipping malformed row", path.display());
            continue;
        };

        stops.entry(stop_id.clone()).or_insert_with(|| Stop {
            stop_id: stop_id.clone(),
            name: stop_name,
            location: Location::new(lat, lon),
            is_stage,
            demand,
        });
        pending
            .entry(route_id)
            .or_insert_with(|| (route_name, Vec::new()))
            .1
            .push((seq, stop_id, dist));
    }

    let mut routes = BTreeMap::new();
    for (route_id, (name, mut rows)) in pending {
        rows.sort_by_key(|(seq, _, _)| *seq);
        let mut route = Route::new(route_id.clone(), name);
        for (_, stop_id, dist) in rows {
            route.push_stop(stops[&stop_id].clone(), dist);
        }
        routes.insert(route_id, route);
    }
    Ok((stops, routes))
}

/// Load charging stations from the chargers CSV.
pub fn load_charging_stations(path: &Path) -> Result<Vec<ChargingStation>, DataError> {
    let mut reader = open(path)?;
    let headers = reader
        .headers()
        .map_err(|source| DataError::Csv {
            file: path.display().to_string(),
            source,
        })?
        .clone();
    let c_name = required(&headers, path, "Location Name")?;
    let c_lat = required(&headers, path, "Latitude")?;
    let c_lon = required(&headers, path, "Longitude")?;
    let c_capacity = optional(&headers, "Charger Capacity (kW)");
    let c_slots = optional(&headers, "Number of Chargers");
    let c_companies = optional(&headers, "Compatible Companies");

    let mut stations = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let line = line + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("{}:{line}: skipping unreadable row: {e}", path.display());
                continue;
            }
        };
        let parsed = (|| {
            let name = cell(&record, c_name)?.to_string();
            let lat: f64 = cell(&record, c_lat)?.parse().ok()?;
            let lon: f64 = cell(&record, c_lon)?.parse().ok()?;
            Some((name, lat, lon))
        })();
        let Some((name, lat, lon)) = parsed else {
            warn!("{}:{line}: skipping malformed row", path.display());
            continue;
        };
        let capacity_kw = c_capacity
            .and_then(|c| cell(&record, c))
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(50.0);
        let total_slots = c_slots
            .and_then(|c| cell(&record, c))
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(1);
        let companies: Vec<String> = c_companies
            .and_then(|c| cell(&record, c))
            .map(|s| s.split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_else(|| vec!["Default".to_string()]);
        stations.push(ChargingStation::new(
            name,
            Location::new(lat, lon),
            capacity_kw,
            total_slots,
            companies,
        ));
    }
    Ok(stations)
}

/// Load depots from the depots CSV.
pub fn load_depots(path: &Path) -> Result<BTreeMap<String, Depot>, DataError> {
    let mut reader = open(path)?;
    let headers = reader
        .headers()
        .map_err(|source| DataError::Csv {
            file: path.display().to_string(),
            source,
        })?
        .clone();
    let c_name = required(&headers, path, "Depot Name")?;
    let c_lat = required(&headers, path, "Latitude")?;
    let c_lon = required(&headers, path, "Longitude")?;

    let mut depots = BTreeMap::new();
    for (line, record) in reader.records().enumerate() {
        let line = line + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("{}:{line}: skipping unreadable row: {e}", path.display());
                continue;
            }
        };
        let parsed = (|| {
            let name = cell(&record, c_name)?.to_string();
            let lat: f64 = cell(&record, c_lat)?.parse().ok()?;
            let lon: f64 = cell(&record, c_lon)?.parse().ok()?;
            Some((name, lat, lon))
        })();
        let Some((name, lat, lon)) = parsed else {
            warn!("{}:{line}: skipping malformed row", path.display());
            continue;
        };
        depots.insert(name.clone(), Depot::new(name, Location::new(lat, lon)));
    }
    Ok(depots)
}

/// Load the schedule CSV and create one bus per duty number, with its trips sorted
/// chronologically. Departure and arrival are `HH:MM` anchored to today; an arrival before the
/// departure crosses midnight and gains a day.
pub fn load_bus_schedules(
    path: &Path,
    routes: &BTreeMap<String, Route>,
    depots: &BTreeMap<String, Depot>,
    config: &SimulationConfig,
) -> Result<Vec<Bus>, DataError> {
    let mut reader = open(path)?;
    let headers = reader
        .headers()
        .map_err(|source| DataError::Csv {
            file: path.display().to_string(),
            source,
        })?
        .clone();
    let c_duty = required(&headers, path, "Duty Number")?;
    let c_route = required(&headers, path, "Route Id")?;
    let c_departure = required(&headers, path, "Departure Time")?;
    let c_arrival = required(&headers, path, "Arrival Time")?;
    let c_depot = required(&headers, path, "Depot Name")?;

    let today = Utc::now().date_naive();
    let mut buses: BTreeMap<String, Bus> = BTreeMap::new();

    for (line, record) in reader.records().enumerate() {
        let line = line + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!("{}:{line}: skipping unreadable row: {e}", path.display());
                continue;
            }
        };
        let parsed = (|| {
            let duty = cell(&record, c_duty)?.to_string();
            let route_id = cell(&record, c_route)?.to_string();
            let departure = NaiveTime::parse_from_str(cell(&record, c_departure)?, "%H:%M").ok()?;
            let arrival = NaiveTime::parse_from_str(cell(&record, c_arrival)?, "%H:%M").ok()?;
            let depot_name = cell(&record, c_depot)?.to_string();
            Some((duty, route_id, departure, arrival, depot_name))
        })();
        let Some((duty, route_id, departure, arrival, depot_name)) = parsed else {
            warn!("{}:{line}: skipping malformed row", path.display());
            continue;
        };

        if !routes.contains_key(&route_id) {
            warn!(
                "{}:{line}: route '{route_id}' not found for duty {duty}, skipping trip",
                path.display()
            );
            continue;
        }
        let Some(depot) = depots.get(&depot_name) else {
            warn!(
                "{}:{line}: depot '{depot_name}' not found for duty {duty}, skipping",
                path.display()
            );
            continue;
        };

        let start_time = today.and_time(departure).and_utc().timestamp() as f64;
        let mut end_time = today.and_time(arrival).and_utc().timestamp() as f64;
        if end_time < start_time {
            // overnight trip
            end_time += 24.0 * 3600.0;
        }

        let bus = buses.entry(duty.clone()).or_insert_with(|| {
            Bus::new(
                format!("Bus_{duty}"),
                depot,
                config.battery_capacity_kwh,
                "Default",
                config.seed,
            )
        });
        bus.daily_schedule.push(Trip {
            route_id,
            start_time,
            end_time,
            depot: depot_name,
        });
    }

    let mut fleet: Vec<Bus> = buses.into_values().collect();
    for bus in &mut fleet {
        bus.daily_schedule
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    }
    fleet.sort_by(|a, b| a.bus_id.cmp(&b.bus_id));
    info!("Created {} buses with scheduled trips", fleet.len());
    Ok(fleet)
}

/// Load the whole network from a directory with the standard file names and assemble the
/// simulation state.
pub fn load_network(dir: &Path, config: &SimulationConfig) -> Result<SimulationState, DataError> {
    let (stops, routes) = load_stops_and_routes(&dir.join(ROUTES_CSV))?;
    let stations = load_charging_stations(&dir.join(CHARGERS_CSV))?;
    let depots = load_depots(&dir.join(DEPOTS_CSV))?;
    let buses = load_bus_schedules(&dir.join(SCHEDULE_CSV), &routes, &depots, config)?;
    info!(
        "Loaded {} stops, {} routes, {} stations, {} depots, {} buses",
        stops.len(),
        routes.len(),
        stations.len(),
        depots.len(),
        buses.len()
    );
    Ok(SimulationState::new(routes, stops, stations, depots, buses))
}
