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

//! A scripted disruption over stop B while the bus serves A -> B -> C: the bus must skip B,
//! book its demand as unserved, and continue to C.

use maplit::btreeset;
use test_log::test;

use crate::{
    fleet::BusStatus,
    model::{haversine_km, DisruptionEvent},
    sim::{SimulationEngine, SimulationLogger},
};

use super::builder::{bus_with_trip, loc_a, loc_c, quiet_config, state_abc};

#[test]
fn disrupted_stop_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("log.csv");
    let config = quiet_config();

    let mut state = state_abc(Vec::new(), vec![bus_with_trip(&config)]);
    let logger = SimulationLogger::new(&log_path).unwrap();
    let mut engine = SimulationEngine::new(config.clone(), logger).unwrap();
    engine.manager_mut().inject(DisruptionEvent {
        route_id: "R1".to_string(),
        affected_stop_ids: btreeset! {"B".to_string()},
        start_time: 0.0,
        end_time: 2000.0,
        description: "scripted incident".to_string(),
    });
    engine.run(&mut state, 1500.0 / 3600.0).unwrap();

    let bus = &state.buses[0];
    assert_eq!(bus.status, BusStatus::InDepot);
    assert_eq!(bus.unserved_demand, 1.0, "stop B's demand went unserved");

    // energy: free hop onto A, skip B in place, A -> C directly, then C back to the depot at A
    let driven_km = 2.0 * haversine_km(loc_a(), loc_c());
    let expected_soc = 100.0 - driven_km * config.soc_percent_per_km(bus.battery_capacity_kwh);
    assert!(
        (bus.soc() - expected_soc).abs() < 1e-9,
        "soc {} vs expected {expected_soc}",
        bus.soc()
    );

    // the active disruption shows up in the log rows
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.lines().any(|l| l.ends_with("R1:B")));
}
