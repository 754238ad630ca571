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

//! The bus agent: per-tick local behavior of a single vehicle.
//!
//! A bus never owns a route, depot, or station. It stores identifiers and resolves them through
//! the read-only [`StepContext`] handed to [`Bus::step`], which makes the parallel fan-out safe:
//! every agent mutates only itself, except for the CAS-guarded station slot counters.

use std::{
    collections::{BTreeMap, HashMap},
    hash::{Hash, Hasher},
};

use log::{debug, error, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    config::SimulationConfig,
    model::{ChargingStation, Depot, DisruptionEvent, Location, Route},
    optimization::MipDecision,
};

/// Lifecycle state of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusStatus {
    /// Parked at a depot, available for dispatch.
    InDepot,
    /// Available outside a depot (e.g., after finishing a charge at the station site).
    Idle,
    /// Serving a trip, moving along its route.
    OnRoute,
    /// Ordered towards a charger by the optimizer, not yet plugged in.
    HeadingToCharger,
    /// Plugged in at a station.
    Charging,
    /// Ordered back to its depot.
    ReturningToDepot,
    /// Out of energy with no reachable charger or depot. Terminal.
    Stranded,
}

impl BusStatus {
    /// Whether the bus can accept a new trip.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, BusStatus::InDepot | BusStatus::Idle)
    }
}

impl std::fmt::Display for BusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BusStatus::InDepot => "in_depot",
            BusStatus::Idle => "idle",
            BusStatus::OnRoute => "on_route",
            BusStatus::HeadingToCharger => "heading_to_charger",
            BusStatus::Charging => "charging",
            BusStatus::ReturningToDepot => "returning_to_depot",
            BusStatus::Stranded => "stranded",
        })
    }
}

/// One scheduled trip of a bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    /// Route the trip serves.
    pub route_id: String,
    /// Scheduled departure (epoch seconds).
    pub start_time: f64,
    /// Scheduled arrival (epoch seconds), strictly after `start_time` (overnight trips are
    /// shifted by a day at load time).
    pub end_time: f64,
    /// Depot the trip is operated from.
    pub depot: String,
}

/// An ongoing charging session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargingState {
    /// Name of the occupied station.
    pub station: String,
    /// When the session started (epoch seconds).
    pub start_time: f64,
    /// When the session ends and the slot is released (epoch seconds).
    pub end_time: f64,
}

/// Read-only view of the world handed to every bus step within one tick. All buses of a tick
/// observe the same snapshot.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Current simulation time (epoch seconds).
    pub now: f64,
    /// All routes by id.
    pub routes: &'a BTreeMap<String, Route>,
    /// All depots by name.
    pub depots: &'a BTreeMap<String, Depot>,
    /// All charging stations.
    pub stations: &'a [ChargingStation],
    /// Synthetic charger node id (`CS_<name>_<index>`) to index into `stations`.
    pub station_nodes: &'a HashMap<String, usize>,
    /// Disruptions active at `now`.
    pub disruptions: &'a [DisruptionEvent],
    /// Simulation tunables.
    pub config: &'a SimulationConfig,
}

impl<'a> StepContext<'a> {
    /// Find a station by its unique name.
    pub fn station_by_name(&self, name: &str) -> Option<&'a ChargingStation> {
        self.stations.iter().find(|s| s.name == name)
    }
}

/// A battery-electric bus.
#[derive(Debug)]
pub struct Bus {
    /// Unique identifier (e.g. `Bus_12`).
    pub bus_id: String,
    /// Depot the bus returns to.
    pub home_depot: String,
    /// Depot the bus is assigned to for the day.
    pub depot: String,
    /// Battery capacity in kWh.
    pub battery_capacity_kwh: f64,
    /// State of charge in percent, always within `[0, 100]`.
    soc_percent: f64,
    /// Operating company, matched against station compatibility.
    pub company: String,
    /// Current position.
    pub current_location: Location,
    /// Route currently served, if any.
    pub current_route: Option<String>,
    /// Index of the NEXT stop to visit on the current route.
    pub current_stop_index: usize,
    /// Lifecycle state.
    pub status: BusStatus,
    /// Accumulated traffic delay in seconds.
    pub delay_seconds: f64,
    /// Accumulated demand units of skipped stops.
    pub unserved_demand: f64,
    /// Trips of the day, sorted by start time.
    pub daily_schedule: Vec<Trip>,
    /// Index of the next trip to dispatch.
    pub current_trip_index: usize,
    /// Ongoing charging session, present iff `status == Charging`.
    pub charging: Option<ChargingState>,
    /// Decision handed down by the optimizer, consumed on the next step.
    pub pending_decision: Option<MipDecision>,
    /// Traffic-delay generator, derived from the master seed and the bus id so the parallel
    /// fan-out stays deterministic.
    rng: StdRng,
}

impl Bus {
    /// Create a bus parked at `depot` with a full battery.
    pub fn new(
        bus_id: impl Into<String>,
        depot: &Depot,
        battery_capacity_kwh: f64,
        company: impl Into<String>,
        seed: u64,
    ) -> Self {
        let bus_id = bus_id.into();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        bus_id.hash(&mut hasher);
        Self {
            rng: StdRng::seed_from_u64(seed ^ hasher.finish()),
            bus_id,
            home_depot: depot.name.clone(),
            depot: depot.name.clone(),
            battery_capacity_kwh,
            soc_percent: 100.0,
            company: company.into(),
            current_location: depot.location,
            current_route: None,
            current_stop_index: 0,
            status: BusStatus::InDepot,
            delay_seconds: 0.0,
            unserved_demand: 0.0,
            daily_schedule: Vec::new(),
            current_trip_index: 0,
            charging: None,
            pending_decision: None,
        }
    }

    /// State of charge in percent.
    pub fn soc(&self) -> f64 {
        self.soc_percent
    }

    /// Set the state of charge, clamped to `[0, 100]`.
    pub fn set_soc(&mut self, value: f64) {
        self.soc_percent = value.clamp(0.0, 100.0);
    }

    /// Drain the battery for `distance_km` driven kilometers.
    pub fn update_soc(&mut self, distance_km: f64, config: &SimulationConfig) {
        let drop = distance_km * config.soc_percent_per_km(self.battery_capacity_kwh);
        self.set_soc(self.soc_percent - drop);
    }

    /// Whether the SoC is below the critical threshold.
    pub fn is_critical_soc(&self, config: &SimulationConfig) -> bool {
        self.soc_percent < config.critical_soc_percent
    }

    /// Distance in meters to the next stop of `route`: the pre-loaded segment distance if the
    /// source data carried one, the great-circle distance from the current position otherwise.
    fn distance_to_next_stop(&self, route: &Route) -> Option<f64> {
        let next_stop = route.stop_at(self.current_stop_index)?;
        let precomputed = self
            .current_stop_index
            .checked_sub(1)
            .and_then(|seg| route.distance_to_next_stop(seg));
        Some(precomputed.unwrap_or_else(|| self.current_location.distance_m(next_stop.location)))
    }

    /// Index of the nearest station (by great-circle distance) that is operational, has a free
    /// slot, and accepts this bus's company.
    pub fn find_nearest_charger(&self, stations: &[ChargingStation]) -> Option<usize> {
        stations
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_available(&self.company))
            .min_by(|(_, a), (_, b)| {
                self.current_location
                    .distance_m(a.location)
                    .total_cmp(&self.current_location.distance_m(b.location))
            })
            .map(|(i, _)| i)
    }

    /// Try to start a charging session at `stations[index]`. Returns `false` if the slot race was
    /// lost; the caller re-plans on the next tick.
    pub fn start_charging(&mut self, index: usize, ctx: &StepContext<'_>) -> bool {
        let station = &ctx.stations[index];
        if !station.try_occupy() {
            debug!(
                "[t={}] {} lost the slot race at {}",
                ctx.now, self.bus_id, station.name
            );
            return false;
        }
        let required_kwh = (100.0 - self.soc_percent) / 100.0 * self.battery_capacity_kwh;
        let duration = (required_kwh / station.capacity_kw * 3600.0)
            .max(ctx.config.charging_min_seconds);
        self.charging = Some(ChargingState {
            station: station.name.clone(),
            start_time: ctx.now,
            end_time: ctx.now + duration,
        });
        self.current_location = station.location;
        self.status = BusStatus::Charging;
        info!(
            "[t={}] {} started charging at {} for {:.0}s",
            ctx.now, self.bus_id, station.name, duration
        );
        true
    }

    /// Complete the ongoing charging session: release the slot and become available again.
    fn finish_charging(&mut self, ctx: &StepContext<'_>) {
        if let Some(charging) = self.charging.take() {
            match ctx.station_by_name(&charging.station) {
                Some(station) => station.release(),
                None => error!(
                    "[t={}] {}: charging station {} vanished",
                    ctx.now, self.bus_id, charging.station
                ),
            }
        }
        self.set_soc(100.0);
        self.status = BusStatus::InDepot;
        info!("[t={}] {} finished charging", ctx.now, self.bus_id);
    }

    /// Drive back to the home depot, or strand if the battery cannot cover the distance.
    fn return_to_depot(&mut self, ctx: &StepContext<'_>) {
        let Some(depot) = ctx.depots.get(&self.home_depot) else {
            error!(
                "[t={}] {}: home depot {} is unknown",
                ctx.now, self.bus_id, self.home_depot
            );
            return;
        };
        let dist_km = self.current_location.distance_km(depot.location);
        let available_kwh = self.soc_percent * self.battery_capacity_kwh / 100.0;
        if available_kwh < dist_km * ctx.config.energy_kwh_per_km {
            self.status = BusStatus::Stranded;
            warn!(
                "[t={}] {} stranded - cannot reach depot {} ({:.1} km away at {:.1}% SoC)",
                ctx.now, self.bus_id, self.home_depot, dist_km, self.soc_percent
            );
            return;
        }
        self.update_soc(dist_km, ctx.config);
        self.current_location = depot.location;
        self.status = BusStatus::InDepot;
        info!("[t={}] {} returned to depot", ctx.now, self.bus_id);
    }

    /// Consume the pending optimizer decision, if any. Only the deferred charge order (set while
    /// heading to a charger) is handled here; everything else is applied centrally before the
    /// fan-out. Returns `true` if the step is complete.
    fn apply_pending_decision(&mut self, ctx: &StepContext<'_>) -> bool {
        let Some(decision) = self.pending_decision.take() else {
            return false;
        };
        match decision {
            MipDecision::Charge { station_id } => {
                if let Some(&index) = ctx.station_nodes.get(&station_id) {
                    if ctx.stations[index].is_available(&self.company)
                        && self.start_charging(index, ctx)
                    {
                        return true;
                    }
                    warn!(
                        "[t={}] {}: station {} became unavailable, abandoning charge",
                        ctx.now, self.bus_id, station_id
                    );
                } else {
                    warn!(
                        "[t={}] {}: unknown charger node {}, dropping decision",
                        ctx.now, self.bus_id, station_id
                    );
                }
                // the order failed: fall back to autonomous behavior
                if self.status == BusStatus::HeadingToCharger {
                    self.status = BusStatus::Idle;
                }
            }
            other => {
                debug!(
                    "[t={}] {}: dropping stale decision {}",
                    ctx.now, self.bus_id, other
                );
            }
        }
        false
    }

    /// Advance the bus by one tick.
    pub fn step(&mut self, ctx: &StepContext<'_>) {
        // 1. finish (or continue) an ongoing charging session
        if self.status == BusStatus::Charging {
            if self
                .charging
                .as_ref()
                .is_some_and(|c| c.end_time <= ctx.now)
            {
                self.finish_charging(ctx);
            }
            return;
        }

        if self.status == BusStatus::Stranded {
            return;
        }

        // 2. apply a pending optimizer decision
        if self.apply_pending_decision(ctx) {
            return;
        }

        // 3. dispatch the next scheduled trip
        if self.status.is_dispatchable() {
            if let Some(trip) = self.daily_schedule.get(self.current_trip_index) {
                if ctx.now >= trip.start_time {
                    if ctx.routes.contains_key(&trip.route_id) {
                        info!(
                            "[t={}] {} dispatched on {}",
                            ctx.now, self.bus_id, trip.route_id
                        );
                        self.current_route = Some(trip.route_id.clone());
                        self.current_stop_index = 0;
                        self.status = BusStatus::OnRoute;
                        self.current_trip_index += 1;
                    } else {
                        error!(
                            "[t={}] {}: scheduled route {} is unknown, skipping trip",
                            ctx.now, self.bus_id, trip.route_id
                        );
                        self.current_trip_index += 1;
                    }
                    return;
                }
            }
        }

        // 4. on-route movement
        if self.status == BusStatus::OnRoute {
            self.step_on_route(ctx);
            return;
        }

        // 5. complete an ordered depot return
        if self.status == BusStatus::ReturningToDepot {
            self.return_to_depot(ctx);
        }
    }

    /// One movement step along the current route.
    fn step_on_route(&mut self, ctx: &StepContext<'_>) {
        let Some(route_id) = self.current_route.clone() else {
            warn!(
                "[t={}] {} is on route without a route, going idle",
                ctx.now, self.bus_id
            );
            self.status = BusStatus::Idle;
            return;
        };
        let Some(route) = ctx.routes.get(&route_id) else {
            error!(
                "[t={}] {}: current route {} is unknown, going idle",
                ctx.now, self.bus_id, route_id
            );
            self.current_route = None;
            self.status = BusStatus::Idle;
            return;
        };

        // skip the next stop if it is disrupted
        if let Some(next_stop) = route.stop_at(self.current_stop_index) {
            let disrupted = ctx
                .disruptions
                .iter()
                .any(|d| d.blocks(&route_id, &next_stop.stop_id, ctx.now));
            if disrupted {
                info!(
                    "[t={}] {} skipping disrupted stop {}",
                    ctx.now, self.bus_id, next_stop.name
                );
                self.unserved_demand += next_stop.demand;
                self.current_stop_index += 1;
                return;
            }
        }

        // trip complete
        if self.current_stop_index >= route.len() {
            self.current_route = None;
            self.current_stop_index = 0;
            self.return_to_depot(ctx);
            return;
        }

        let Some(distance_m) = self.distance_to_next_stop(route) else {
            return;
        };
        let distance_km = distance_m / 1000.0;

        // divert to a charger before the battery runs critical
        let projected =
            self.soc_percent - distance_km * ctx.config.soc_percent_per_km(self.battery_capacity_kwh);
        if projected < ctx.config.critical_soc_percent {
            match self.find_nearest_charger(ctx.stations) {
                Some(index) => {
                    if !self.start_charging(index, ctx) {
                        self.return_to_depot(ctx);
                    }
                }
                None => self.return_to_depot(ctx),
            }
            return;
        }

        // normal move
        self.update_soc(distance_km, ctx.config);
        let next_stop = &route.stops()[self.current_stop_index];
        self.current_location = next_stop.location;
        self.current_stop_index += 1;
        self.delay_seconds += self.rng.gen_range(5..=30) as f64;
        debug!(
            "[t={}] {} arrived at {}, SoC={:.1}%",
            ctx.now, self.bus_id, next_stop.name, self.soc_percent
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Stop;
    use maplit::btreeset;

    /// A small world: one route A -> B -> C, one depot at A, one compatible station next to B.
    struct World {
        routes: BTreeMap<String, Route>,
        depots: BTreeMap<String, Depot>,
        stations: Vec<ChargingStation>,
        station_nodes: HashMap<String, usize>,
        disruptions: Vec<DisruptionEvent>,
        config: SimulationConfig,
    }

    impl World {
        fn new() -> Self {
            let mut route = Route::new("R1", "Line 1");
            route.push_stop(Stop::new("A", "A", Location::new(8.50, 76.90)), None);
            route.push_stop(Stop::new("B", "B", Location::new(8.51, 76.90)), None);
            route.push_stop(Stop::new("C", "C", Location::new(8.52, 76.90)), None);
            let mut routes = BTreeMap::new();
            routes.insert("R1".to_string(), route);

            let mut depots = BTreeMap::new();
            depots.insert(
                "Main".to_string(),
                Depot::new("Main", Location::new(8.50, 76.90)),
            );

            let stations = vec![ChargingStation::new(
                "CS1",
                Location::new(8.505, 76.90),
                150.0,
                1,
                ["Default".to_string()],
            )];
            let station_nodes = HashMap::from([("CS_CS1_0".to_string(), 0)]);

            Self {
                routes,
                depots,
                stations,
                station_nodes,
                disruptions: Vec::new(),
                config: SimulationConfig::default(),
            }
        }

        fn ctx(&self, now: f64) -> StepContext<'_> {
            StepContext {
                now,
                routes: &self.routes,
                depots: &self.depots,
                stations: &self.stations,
                station_nodes: &self.station_nodes,
                disruptions: &self.disruptions,
                config: &self.config,
            }
        }

        fn bus(&self) -> Bus {
            let mut bus = Bus::new("Bus_1", &self.depots["Main"], 250.0, "Default", 42);
            bus.daily_schedule.push(Trip {
                route_id: "R1".to_string(),
                start_time: 300.0,
                end_time: 1500.0,
                depot: "Main".to_string(),
            });
            bus
        }
    }

    #[test]
    fn dispatches_on_schedule() {
        let world = World::new();
        let mut bus = world.bus();
        bus.step(&world.ctx(200.0));
        assert_eq!(bus.status, BusStatus::InDepot);
        bus.step(&world.ctx(300.0));
        assert_eq!(bus.status, BusStatus::OnRoute);
        assert_eq!(bus.current_route.as_deref(), Some("R1"));
        assert_eq!(bus.current_stop_index, 0);
        assert_eq!(bus.current_trip_index, 1);
    }

    #[test]
    fn moves_and_drains_soc() {
        let world = World::new();
        let mut bus = world.bus();
        bus.step(&world.ctx(300.0));
        bus.step(&world.ctx(360.0));
        assert_eq!(bus.current_stop_index, 1);
        assert!(bus.soc() < 100.0);
        assert!(bus.delay_seconds >= 5.0 && bus.delay_seconds <= 30.0);
    }

    #[test]
    fn skips_disrupted_stop() {
        let mut world = World::new();
        world.disruptions.push(DisruptionEvent {
            route_id: "R1".to_string(),
            affected_stop_ids: btreeset! {"A".to_string()},
            start_time: 0.0,
            end_time: 1_000.0,
            description: "incident".to_string(),
        });
        let mut bus = world.bus();
        bus.step(&world.ctx(300.0));
        bus.step(&world.ctx(360.0));
        assert_eq!(bus.current_stop_index, 1);
        assert_eq!(bus.unserved_demand, 1.0);
        assert_eq!(bus.soc(), 100.0, "a skipped stop costs no energy");
    }

    #[test]
    fn completed_route_returns_to_depot() {
        let world = World::new();
        let mut bus = world.bus();
        bus.step(&world.ctx(300.0));
        for tick in 1..=4 {
            bus.step(&world.ctx(300.0 + 60.0 * tick as f64));
        }
        assert_eq!(bus.status, BusStatus::InDepot);
        assert_eq!(bus.current_route, None);
        assert_eq!(bus.current_stop_index, 0);
    }

    #[test]
    fn critical_soc_diverts_to_charger() {
        let world = World::new();
        let mut bus = world.bus();
        bus.step(&world.ctx(300.0));
        // the first hop (depot is at stop A) is free; the A -> B leg would go critical
        bus.set_soc(22.2);
        bus.step(&world.ctx(360.0));
        assert_eq!(bus.status, BusStatus::OnRoute);
        bus.step(&world.ctx(420.0));
        assert_eq!(bus.status, BusStatus::Charging);
        let charging = bus.charging.as_ref().unwrap();
        assert_eq!(charging.station, "CS1");
        assert!(charging.end_time - charging.start_time >= 120.0);
        assert_eq!(world.stations[0].available_slots(), 0);
    }

    #[test]
    fn charging_completes_with_full_battery() {
        let world = World::new();
        let mut bus = world.bus();
        bus.step(&world.ctx(300.0));
        bus.set_soc(22.2);
        bus.step(&world.ctx(360.0));
        bus.step(&world.ctx(420.0));
        let end = bus.charging.as_ref().unwrap().end_time;
        // before the end time nothing happens
        bus.step(&world.ctx(end - 1.0));
        assert_eq!(bus.status, BusStatus::Charging);
        bus.step(&world.ctx(end));
        assert_eq!(bus.status, BusStatus::InDepot);
        assert_eq!(bus.soc(), 100.0);
        assert_eq!(bus.charging, None);
        assert_eq!(world.stations[0].available_slots(), 1);
    }

    #[test]
    fn strands_without_compatible_charger() {
        let mut world = World::new();
        world.stations.clear();
        world.station_nodes.clear();
        // depot far away from the route
        world.depots.insert(
            "Main".to_string(),
            Depot::new("Main", Location::new(9.50, 76.90)),
        );
        let mut bus = world.bus();
        bus.status = BusStatus::OnRoute;
        bus.current_route = Some("R1".to_string());
        bus.current_stop_index = 1;
        bus.current_location = Location::new(8.51, 76.90);
        bus.set_soc(1.0);
        bus.step(&world.ctx(400.0));
        assert_eq!(bus.status, BusStatus::Stranded);
    }

    #[test]
    fn lost_slot_race_abandons_the_charge() {
        let world = World::new();
        let mut bus = world.bus();
        bus.status = BusStatus::HeadingToCharger;
        bus.pending_decision = Some(MipDecision::Charge {
            station_id: "CS_CS1_0".to_string(),
        });
        // another bus grabbed the only slot first
        assert!(world.stations[0].try_occupy());
        bus.step(&world.ctx(400.0));
        assert_eq!(bus.pending_decision, None);
        assert_eq!(bus.status, BusStatus::Idle);
    }
}
