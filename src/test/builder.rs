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

//! Small networks shared by the scenario tests.

use std::collections::BTreeMap;

use crate::{
    config::SimulationConfig,
    fleet::{Bus, Trip},
    model::{ChargingStation, Depot, Location, Route, Stop},
    sim::SimulationState,
};

/// Position of stop A (the depot sits here too).
pub fn loc_a() -> Location {
    Location::new(8.50, 76.90)
}

/// Position of stop B.
pub fn loc_b() -> Location {
    Location::new(8.51, 76.90)
}

/// Position of stop C.
pub fn loc_c() -> Location {
    Location::new(8.52, 76.90)
}

/// The test route `R1`: A -> B -> C along a meridian, demand 1 at every stop, no pre-computed
/// segment distances.
pub fn route_abc() -> Route {
    let mut route = Route::new("R1", "Line 1");
    route.push_stop(Stop::new("A", "Stop A", loc_a()), None);
    route.push_stop(Stop::new("B", "Stop B", loc_b()), None);
    route.push_stop(Stop::new("C", "Stop C", loc_c()), None);
    route
}

/// A configuration without any randomness or central optimization, for pure-agent scenarios.
pub fn quiet_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.mip.enabled = false;
    config.disruption.random_enabled = false;
    config
}

/// The depot `Main`, co-located with stop A.
pub fn depot_main() -> Depot {
    Depot::new("Main", loc_a())
}

/// A single compatible station near the route.
pub fn station_cs1() -> ChargingStation {
    ChargingStation::new(
        "CS1",
        Location::new(8.505, 76.90),
        150.0,
        2,
        ["Default".to_string()],
    )
}

/// A bus parked at `Main` with one trip on `R1` from `t = 300` to `t = 1500`.
pub fn bus_with_trip(config: &SimulationConfig) -> Bus {
    let mut bus = Bus::new(
        "Bus_1",
        &depot_main(),
        config.battery_capacity_kwh,
        "Default",
        config.seed,
    );
    bus.daily_schedule.push(Trip {
        route_id: "R1".to_string(),
        start_time: 300.0,
        end_time: 1500.0,
        depot: "Main".to_string(),
    });
    bus
}

/// Assemble a state over `R1`, the `Main` depot, and the given stations and buses.
pub fn state_abc(stations: Vec<ChargingStation>, buses: Vec<Bus>) -> SimulationState {
    let route = route_abc();
    let stops: BTreeMap<String, Stop> = route
        .stops()
        .iter()
        .map(|s| (s.stop_id.clone(), s.clone()))
        .collect();
    SimulationState::new(
        BTreeMap::from([("R1".to_string(), route)]),
        stops,
        stations,
        BTreeMap::from([("Main".to_string(), depot_main())]),
        buses,
    )
}
