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

//! Reconciling optimizer output with the actual bus state.
//!
//! The world may have moved on between model construction and decision application (slots taken,
//! stations flooded, routes finished). Every inconsistency downgrades gracefully: the decision is
//! dropped with a log line and the bus continues autonomously on its next step.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};

use crate::{
    fleet::{Bus, BusStatus, ChargingState},
    model::{ChargingStation, Route},
};

use super::{graph::Node, mip::MipOutcome, MipDecision};

/// An applier-initiated charging session is capped at one hour.
const MAX_CHARGE_SECONDS: f64 = 3600.0;

/// Apply the optimizer's immediate decisions to the fleet. Runs single-threaded before the bus
/// fan-out; failures are logged and never fatal.
pub fn apply_mip_decisions(
    buses: &mut [Bus],
    outcome: &MipOutcome,
    routes: &BTreeMap<String, Route>,
    stations: &[ChargingStation],
    station_nodes: &HashMap<String, usize>,
    now: f64,
) {
    for bus in buses.iter_mut() {
        let Some(decision) = outcome.decisions.get(&bus.bus_id) else {
            continue;
        };
        info!("[t={now}] MIP -> {}: {decision}", bus.bus_id);
        match decision {
            MipDecision::Charge { station_id } => {
                apply_charge(bus, station_id, stations, station_nodes, now);
            }
            MipDecision::ReturnDepot => {
                bus.status = BusStatus::ReturningToDepot;
                bus.pending_decision = None;
            }
            MipDecision::Move { target_node_id } => {
                apply_move(bus, target_node_id, outcome, routes, stations, station_nodes, now);
            }
        }
    }
}

/// Start a charging session right away, or drop the decision if the station is gone, busy, or
/// incompatible.
fn apply_charge(
    bus: &mut Bus,
    station_id: &str,
    stations: &[ChargingStation],
    station_nodes: &HashMap<String, usize>,
    now: f64,
) {
    bus.pending_decision = None;
    let Some(&index) = station_nodes.get(station_id) else {
        warn!(
            "[t={now}] {}: charger node {station_id} not found, ignoring charge",
            bus.bus_id
        );
        return;
    };
    let station = &stations[index];
    if !station.is_available(&bus.company) || !station.try_occupy() {
        warn!(
            "[t={now}] {}: station {station_id} unavailable, ignoring charge",
            bus.bus_id
        );
        return;
    }
    let needed_kwh = (100.0 - bus.soc()) / 100.0 * bus.battery_capacity_kwh;
    let charge_seconds = (needed_kwh / station.capacity_kw * 3600.0).min(MAX_CHARGE_SECONDS);
    bus.charging = Some(ChargingState {
        station: station.name.clone(),
        start_time: now,
        end_time: now + charge_seconds,
    });
    bus.current_location = station.location;
    bus.status = BusStatus::Charging;
    info!(
        "[t={now}] {} charging at {} until t={}",
        bus.bus_id,
        station.name,
        now + charge_seconds
    );
}

/// Steer the bus towards a node: a stop of its current route, a depot, or a charger. Unknown or
/// incompatible targets drop the decision.
fn apply_move(
    bus: &mut Bus,
    target_node_id: &str,
    outcome: &MipOutcome,
    routes: &BTreeMap<String, Route>,
    stations: &[ChargingStation],
    station_nodes: &HashMap<String, usize>,
    now: f64,
) {
    bus.pending_decision = None;
    if outcome.graph.disrupted_stop_ids().contains(target_node_id) {
        warn!(
            "[t={now}] {}: move target {target_node_id} is disrupted, ignoring",
            bus.bus_id
        );
        return;
    }
    match outcome.graph.node(target_node_id) {
        Some(Node::Stop(_)) => {
            let route = bus.current_route.as_ref().and_then(|id| routes.get(id));
            let position = route.and_then(|route| {
                route
                    .stops()
                    .iter()
                    .position(|s| s.stop_id == target_node_id)
            });
            match (route, position) {
                (Some(route), Some(index)) => {
                    let location = route.stops()[index].location;
                    bus.current_stop_index = index;
                    bus.current_location = location;
                    bus.status = BusStatus::OnRoute;
                }
                _ => warn!(
                    "[t={now}] {}: move target {target_node_id} is not on the current route, \
                     ignoring",
                    bus.bus_id
                ),
            }
        }
        Some(Node::Depot { .. }) => {
            bus.status = BusStatus::ReturningToDepot;
        }
        Some(Node::Charger { .. }) => {
            let available = station_nodes
                .get(target_node_id)
                .is_some_and(|&i| stations[i].is_available(&bus.company));
            if available {
                bus.pending_decision = Some(MipDecision::Charge {
                    station_id: target_node_id.to_string(),
                });
                bus.status = BusStatus::HeadingToCharger;
            } else {
                warn!(
                    "[t={now}] {}: charger {target_node_id} unavailable, ignoring move",
                    bus.bus_id
                );
            }
        }
        None => warn!(
            "[t={now}] {}: unknown move target {target_node_id}, ignoring",
            bus.bus_id
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        model::{Depot, Location, Stop},
        optimization::{build_flow_graph, SolveStatus},
    };
    use std::time::Duration;

    struct World {
        routes: BTreeMap<String, Route>,
        stations: Vec<ChargingStation>,
        depots: BTreeMap<String, Depot>,
        station_nodes: HashMap<String, usize>,
    }

    impl World {
        fn new() -> Self {
            let mut route = Route::new("R1", "Line 1");
            route.push_stop(Stop::new("A", "A", Location::new(8.50, 76.90)), None);
            route.push_stop(Stop::new("B", "B", Location::new(8.51, 76.90)), None);
            route.push_stop(Stop::new("C", "C", Location::new(8.52, 76.90)), None);
            Self {
                routes: BTreeMap::from([("R1".to_string(), route)]),
                stations: vec![ChargingStation::new(
                    "CS1",
                    Location::new(8.505, 76.90),
                    150.0,
                    1,
                    ["Default".to_string()],
                )],
                depots: BTreeMap::from([(
                    "Main".to_string(),
                    Depot::new("Main", Location::new(8.49, 76.90)),
                )]),
                station_nodes: HashMap::from([("CS_CS1_0".to_string(), 0)]),
            }
        }

        fn outcome(&self, bus_id: &str, decision: MipDecision) -> MipOutcome {
            MipOutcome {
                decisions: BTreeMap::from([(bus_id.to_string(), decision)]),
                graph: build_flow_graph(&self.routes, &self.stations, &self.depots, &[]),
                status: SolveStatus::Solved,
                solve_time: Duration::ZERO,
                size: Default::default(),
            }
        }

        fn bus(&self) -> Bus {
            Bus::new("Bus_1", &self.depots["Main"], 250.0, "Default", 42)
        }
    }

    #[test]
    fn charge_occupies_a_slot_and_caps_duration() {
        let world = World::new();
        let mut buses = vec![world.bus()];
        buses[0].set_soc(10.0);
        let outcome = world.outcome(
            "Bus_1",
            MipDecision::Charge {
                station_id: "CS_CS1_0".to_string(),
            },
        );
        apply_mip_decisions(
            &mut buses,
            &outcome,
            &world.routes,
            &world.stations,
            &world.station_nodes,
            1000.0,
        );
        assert_eq!(buses[0].status, BusStatus::Charging);
        let charging = buses[0].charging.as_ref().unwrap();
        assert_eq!(charging.station, "CS1");
        assert!(charging.end_time - charging.start_time <= 3600.0);
        assert_eq!(world.stations[0].available_slots(), 0);
    }

    #[test]
    fn charge_at_full_station_is_dropped() {
        let world = World::new();
        assert!(world.stations[0].try_occupy());
        let mut buses = vec![world.bus()];
        let outcome = world.outcome(
            "Bus_1",
            MipDecision::Charge {
                station_id: "CS_CS1_0".to_string(),
            },
        );
        apply_mip_decisions(
            &mut buses,
            &outcome,
            &world.routes,
            &world.stations,
            &world.station_nodes,
            1000.0,
        );
        assert_eq!(buses[0].status, BusStatus::InDepot);
        assert_eq!(buses[0].charging, None);
        assert_eq!(buses[0].pending_decision, None);
    }

    #[test]
    fn move_to_stop_jumps_the_route_index() {
        let world = World::new();
        let mut buses = vec![world.bus()];
        buses[0].status = BusStatus::OnRoute;
        buses[0].current_route = Some("R1".to_string());
        buses[0].current_stop_index = 0;
        let outcome = world.outcome(
            "Bus_1",
            MipDecision::Move {
                target_node_id: "B".to_string(),
            },
        );
        apply_mip_decisions(
            &mut buses,
            &outcome,
            &world.routes,
            &world.stations,
            &world.station_nodes,
            1000.0,
        );
        assert_eq!(buses[0].current_stop_index, 1);
        assert_eq!(buses[0].current_location, Location::new(8.51, 76.90));
        assert_eq!(buses[0].status, BusStatus::OnRoute);
    }

    #[test]
    fn move_to_depot_turns_into_a_return() {
        let world = World::new();
        let mut buses = vec![world.bus()];
        let outcome = world.outcome(
            "Bus_1",
            MipDecision::Move {
                target_node_id: "Depot_Main".to_string(),
            },
        );
        apply_mip_decisions(
            &mut buses,
            &outcome,
            &world.routes,
            &world.stations,
            &world.station_nodes,
            1000.0,
        );
        assert_eq!(buses[0].status, BusStatus::ReturningToDepot);
    }

    #[test]
    fn move_to_charger_defers_the_charge() {
        let world = World::new();
        let mut buses = vec![world.bus()];
        let outcome = world.outcome(
            "Bus_1",
            MipDecision::Move {
                target_node_id: "CS_CS1_0".to_string(),
            },
        );
        apply_mip_decisions(
            &mut buses,
            &outcome,
            &world.routes,
            &world.stations,
            &world.station_nodes,
            1000.0,
        );
        assert_eq!(buses[0].status, BusStatus::HeadingToCharger);
        assert_eq!(
            buses[0].pending_decision,
            Some(MipDecision::Charge {
                station_id: "CS_CS1_0".to_string()
            })
        );
        // the slot is only taken once the bus arrives
        assert_eq!(world.stations[0].available_slots(), 1);
    }

    #[test]
    fn unknown_target_is_dropped() {
        let world = World::new();
        let mut buses = vec![world.bus()];
        let outcome = world.outcome(
            "Bus_1",
            MipDecision::Move {
                target_node_id: "Nowhere".to_string(),
            },
        );
        apply_mip_decisions(
            &mut buses,
            &outcome,
            &world.routes,
            &world.stations,
            &world.station_nodes,
            1000.0,
        );
        assert_eq!(buses[0].status, BusStatus::InDepot);
        assert_eq!(buses[0].pending_decision, None);
    }

    #[test]
    fn off_route_stop_target_is_dropped() {
        let world = World::new();
        let mut buses = vec![world.bus()];
        // bus is idle in the depot, not serving R1
        let outcome = world.outcome(
            "Bus_1",
            MipDecision::Move {
                target_node_id: "B".to_string(),
            },
        );
        apply_mip_decisions(
            &mut buses,
            &outcome,
            &world.routes,
            &world.stations,
            &world.station_nodes,
            1000.0,
        );
        assert_eq!(buses[0].status, BusStatus::InDepot);
        assert_eq!(buses[0].current_stop_index, 0);
    }
}
