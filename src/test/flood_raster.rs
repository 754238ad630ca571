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

//! A flood patch of 600 cm over stop B that recedes at 100 cm/h: the manager must emit one
//! disruption for the route, keep it alive without duplicates while the water stands, disable
//! the co-located station, strand the bus parked there, and go quiet once the patch drains.

use std::collections::BTreeMap;

use maplit::btreeset;
use test_log::test;

use crate::{
    fleet::{Bus, BusStatus},
    hazards::DisruptionManager,
    model::{ChargingStation, Route},
    test::builder::{depot_main, loc_b, quiet_config, route_abc},
};

/// A 1x1 cell raster of 600 cm covering only stop B.
const PATCH: &str = "\
ncols 1
nrows 1
xllcorner 76.895
yllcorner 8.505
cellsize 0.01
NODATA_value -9999
600
";

#[test]
fn flood_patch_disrupts_and_recedes() {
    let dir = tempfile::tempdir().unwrap();
    let raster = dir.path().join("depth.asc");
    std::fs::write(&raster, PATCH).unwrap();

    let mut config = quiet_config();
    config.flood.enabled = true;
    config.flood.raster_file = Some(raster);
    config.flood.threshold_m = 0.5;
    config.flood.recession_cm_per_hr = 100.0;
    config.flood.duration_minutes = 120;

    let routes: BTreeMap<String, Route> = BTreeMap::from([("R1".to_string(), route_abc())]);
    let depots = BTreeMap::from([("Main".to_string(), depot_main())]);
    // the station sits in the patch next to B
    let stations = vec![ChargingStation::new(
        "Waterside",
        loc_b(),
        150.0,
        1,
        ["Default".to_string()],
    )];
    let mut buses = vec![Bus::new(
        "Bus_1",
        &depots["Main"],
        config.battery_capacity_kwh,
        "Default",
        config.seed,
    )];
    buses[0].current_location = loc_b();

    let mut manager = DisruptionManager::new(&config);

    // t = 0: the patch is 6 m deep
    manager.update(&routes, &stations, &depots, &mut buses, 0.0);
    assert_eq!(manager.active_disruptions().len(), 1);
    let event = &manager.active_disruptions()[0];
    assert_eq!(event.route_id, "R1");
    assert_eq!(event.affected_stop_ids, btreeset! {"B".to_string()});
    assert_eq!(event.end_time - event.start_time, 120.0 * 60.0);
    assert!(!stations[0].operational());
    assert!(manager.flooded_stations().contains("Waterside"));
    assert_eq!(buses[0].status, BusStatus::Stranded);
    assert!(manager.flooded_buses().contains("Bus_1"));

    // one minute later the same flood must not emit a duplicate
    manager.update(&routes, &stations, &depots, &mut buses, 60.0);
    assert_eq!(manager.active_disruptions().len(), 1);

    // after two hours the first event expired, but the water is still 4 m deep: re-emit
    manager.update(&routes, &stations, &depots, &mut buses, 2.0 * 3600.0);
    assert_eq!(manager.active_disruptions().len(), 1);
    assert_eq!(manager.active_disruptions()[0].start_time, 2.0 * 3600.0);
    assert!(!stations[0].operational());

    // after six hours the patch has drained below the threshold: the station recovers, the
    // expired event is gone, and nothing new is emitted
    manager.update(&routes, &stations, &depots, &mut buses, 6.0 * 3600.0);
    assert!(manager.active_disruptions().is_empty());
    assert!(stations[0].operational());
    assert!(manager.flooded_stations().is_empty());
}
