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

//! Small end-to-end solves of the rolling-horizon MIP with the CBC backend.

use std::collections::BTreeMap;

use maplit::btreeset;
use test_log::test;

use crate::{
    model::{DisruptionEvent, Route},
    optimization::{optimize_network, MipDecision, SolveStatus},
    test::builder::{bus_with_trip, depot_main, quiet_config, route_abc, station_cs1},
};

#[test]
fn full_battery_bus_is_sent_to_serve_demand() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quiet_config();
    config.cache_dir = dir.path().to_path_buf();
    config.mip.horizon_minutes = 3;

    let routes: BTreeMap<String, Route> = BTreeMap::from([("R1".to_string(), route_abc())]);
    let depots = BTreeMap::from([("Main".to_string(), depot_main())]);
    let stations = vec![station_cs1()];
    let buses = vec![bus_with_trip(&config)];

    let outcome = optimize_network(&buses, &routes, &stations, &depots, &[], 0.0, &config);
    assert_eq!(outcome.status, SolveStatus::Solved);
    assert!(outcome.size.cols > 0 && outcome.size.rows > 0);

    // serving the route demand dominates the battery penalty: the first committed action is the
    // move from the depot onto the route
    assert_eq!(
        outcome.decisions.get("Bus_1"),
        Some(&MipDecision::Move {
            target_node_id: "A".to_string()
        })
    );
}

#[test]
fn disrupted_stop_never_appears_in_a_decision() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quiet_config();
    config.cache_dir = dir.path().to_path_buf();
    config.mip.horizon_minutes = 3;

    let routes: BTreeMap<String, Route> = BTreeMap::from([("R1".to_string(), route_abc())]);
    let depots = BTreeMap::from([("Main".to_string(), depot_main())]);
    let stations = vec![station_cs1()];
    let buses = vec![bus_with_trip(&config)];
    let disruption = DisruptionEvent {
        route_id: "R1".to_string(),
        affected_stop_ids: btreeset! {"A".to_string()},
        start_time: 0.0,
        end_time: 10_000.0,
        description: "flooded".to_string(),
    };

    let outcome = optimize_network(
        &buses,
        &routes,
        &stations,
        &depots,
        std::slice::from_ref(&disruption),
        0.0,
        &config,
    );
    assert_eq!(outcome.status, SolveStatus::Solved);
    assert!(!outcome.graph.contains("A"));
    // whatever the solver commits, it can never target the pruned stop
    if let Some(MipDecision::Move { target_node_id }) = outcome.decisions.get("Bus_1") {
        assert_ne!(target_node_id, "A");
    }
}

#[test]
fn empty_network_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quiet_config();
    config.cache_dir = dir.path().to_path_buf();

    let outcome = optimize_network(
        &[],
        &BTreeMap::new(),
        &[],
        &BTreeMap::new(),
        &[],
        0.0,
        &config,
    );
    assert_eq!(outcome.status, SolveStatus::Skipped);
    assert!(outcome.decisions.is_empty());
}
