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

//! The disruption manager: lifecycle of random and flood-driven disruptions.
//!
//! The update cycle per tick is fixed: expire old events, roll for a random disruption, scan the
//! flood map, then apply the impacts (station operational flags, stranded buses). It runs before
//! the optimizer and the bus fan-out, so every consumer within the tick observes the same
//! disruption set.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::SimulationConfig,
    fleet::{Bus, BusStatus},
    model::{ChargingStation, Depot, DisruptionEvent, Route},
};

use super::{flood::FloodHazardMap, random::generate_random_disruption};

/// Tracks all active disruptions and the currently flooded components.
#[derive(Debug)]
pub struct DisruptionManager {
    /// Simulation tunables.
    config: SimulationConfig,
    /// Currently active disruption events.
    active: Vec<DisruptionEvent>,
    /// The flood hazard map (possibly disabled).
    flood: FloodHazardMap,
    /// Generator for random disruptions, seeded from the master seed.
    rng: StdRng,
    /// Names of currently flooded stations.
    flooded_stations: BTreeSet<String>,
    /// Names of currently flooded depots.
    flooded_depots: BTreeSet<String>,
    /// Ids of currently flooded buses.
    flooded_buses: BTreeSet<String>,
}

impl DisruptionManager {
    /// Create a manager (and load the flood raster, if configured).
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            active: Vec::new(),
            flood: FloodHazardMap::new(&config.flood),
            rng: StdRng::seed_from_u64(config.seed),
            flooded_stations: BTreeSet::new(),
            flooded_depots: BTreeSet::new(),
            flooded_buses: BTreeSet::new(),
            config: config.clone(),
        }
    }

    /// The disruptions active right now.
    pub fn active_disruptions(&self) -> &[DisruptionEvent] {
        &self.active
    }

    /// Names of the currently flooded stations.
    pub fn flooded_stations(&self) -> &BTreeSet<String> {
        &self.flooded_stations
    }

    /// Names of the currently flooded depots.
    pub fn flooded_depots(&self) -> &BTreeSet<String> {
        &self.flooded_depots
    }

    /// Ids of the currently flooded buses.
    pub fn flooded_buses(&self) -> &BTreeSet<String> {
        &self.flooded_buses
    }

    /// Add a scripted disruption (scenario replay and tests).
    pub fn inject(&mut self, event: DisruptionEvent) {
        self.active.push(event);
    }

    /// Run one update cycle at simulation time `now`.
    pub fn update(
        &mut self,
        routes: &BTreeMap<String, Route>,
        stations: &[ChargingStation],
        depots: &BTreeMap<String, Depot>,
        buses: &mut [Bus],
        now: f64,
    ) {
        // 1. expire
        self.active.retain(|d| d.end_time > now);

        // 2. random disruption
        if self.config.disruption.random_enabled {
            if let Some(event) =
                generate_random_disruption(routes, now, &self.config.disruption, &mut self.rng)
            {
                self.active.push(event);
            }
        }

        // 3. + 4. flood scan and impacts
        if self.flood.is_loaded() {
            self.update_flood(routes, stations, depots, buses, now);
        }

        if !self.active.is_empty() {
            debug!("[t={now}] active disruptions: {}", self.active.len());
        }
    }

    /// Scan the flood map for every enabled category and apply the impacts.
    fn update_flood(
        &mut self,
        routes: &BTreeMap<String, Route>,
        stations: &[ChargingStation],
        depots: &BTreeMap<String, Depot>,
        buses: &mut [Bus],
        now: f64,
    ) {
        let threshold = self.config.flood.threshold_m;
        let duration = self.config.flood.duration_minutes as f64 * 60.0;

        // route stops: one event per affected route. An event is only (re-)emitted when no
        // active flood event already covers the same route with the same stop set, so a standing
        // flood keeps exactly one live event and a drained one emits nothing.
        if self.config.flood.disrupt_routes || self.config.flood.disrupt_stops {
            for route in routes.values() {
                let mut flooded = BTreeSet::new();
                for stop in route.stops() {
                    let depth =
                        self.flood
                            .effective_depth_m(stop.location.lon, stop.location.lat, now);
                    if depth >= threshold {
                        flooded.insert(stop.stop_id.clone());
                    }
                }
                if flooded.is_empty() {
                    continue;
                }
                let covered = self.active.iter().any(|d| {
                    d.route_id == route.route_id
                        && d.affected_stop_ids == flooded
                        && d.description.starts_with("Flood")
                });
                if !covered {
                    info!(
                        "[t={now}] FLOOD: route {} stops {:?} under water",
                        route.name, flooded
                    );
                    self.active.push(DisruptionEvent {
                        route_id: route.route_id.clone(),
                        affected_stop_ids: flooded,
                        start_time: now,
                        end_time: now + duration,
                        description: format!("Flood disruption on {}", route.name),
                    });
                }
            }
        }

        // charging stations: the operational flag tracks the water level both ways
        if self.config.flood.disrupt_chargers {
            self.flooded_stations.clear();
            for station in stations {
                let depth = self.flood.effective_depth_m(
                    station.location.lon,
                    station.location.lat,
                    now,
                );
                let is_flooded = depth >= threshold;
                station.set_operational(!is_flooded);
                if is_flooded {
                    self.flooded_stations.insert(station.name.clone());
                }
            }
            if !self.flooded_stations.is_empty() {
                info!(
                    "[t={now}] FLOOD: stations out of service: {:?}",
                    self.flooded_stations
                );
            }
        }

        // depots: tracked for consumers, no state to flip
        if self.config.flood.disrupt_depots {
            self.flooded_depots.clear();
            for depot in depots.values() {
                let depth =
                    self.flood
                        .effective_depth_m(depot.location.lon, depot.location.lat, now);
                if depth >= threshold {
                    self.flooded_depots.insert(depot.name.clone());
                }
            }
        }

        // buses: a flooded bus is stranded, which is terminal
        if self.config.flood.disrupt_buses {
            self.flooded_buses.clear();
            for bus in buses.iter_mut() {
                let depth = self.flood.effective_depth_m(
                    bus.current_location.lon,
                    bus.current_location.lat,
                    now,
                );
                if depth >= threshold {
                    self.flooded_buses.insert(bus.bus_id.clone());
                    if bus.status != BusStatus::Stranded {
                        warn!("[t={now}] FLOOD: {} stranded by high water", bus.bus_id);
                        bus.status = BusStatus::Stranded;
                    }
                }
            }
        }
    }
}
