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

//! Random route disruptions (traffic incidents, road works).

use std::collections::BTreeMap;

use log::info;
use rand::{rngs::StdRng, seq::SliceRandom, Rng};

use crate::{
    config::DisruptionConfig,
    model::{DisruptionEvent, Route},
};

/// With probability `config.probability`, disrupt a window of consecutive stops on one randomly
/// chosen route. Returns `None` when no disruption occurs this tick.
pub fn generate_random_disruption(
    routes: &BTreeMap<String, Route>,
    now: f64,
    config: &DisruptionConfig,
    rng: &mut StdRng,
) -> Option<DisruptionEvent> {
    if rng.gen::<f64>() > config.probability {
        return None;
    }

    let candidates: Vec<&Route> = routes.values().filter(|r| !r.is_empty()).collect();
    let route = candidates.choose(rng)?;

    let max_affected = config.max_stops.min(route.len()).max(1);
    let min_affected = config.min_stops.clamp(1, max_affected);
    let num_affected = rng.gen_range(min_affected..=max_affected);
    let start_index = rng.gen_range(0..=route.len() - num_affected);
    let affected_stop_ids = route.stops()[start_index..start_index + num_affected]
        .iter()
        .map(|s| s.stop_id.clone())
        .collect();

    let duration_minutes = rng.gen_range(config.min_minutes..=config.max_minutes);
    let event = DisruptionEvent {
        route_id: route.route_id.clone(),
        affected_stop_ids,
        start_time: now,
        end_time: now + duration_minutes as f64 * 60.0,
        description: format!(
            "Random incident on {} affecting {} stops",
            route.name, num_affected
        ),
    };
    info!(
        "[t={now}] RANDOM DISRUPTION: {} stops {:?} for {duration_minutes} min",
        route.name, event.affected_stop_ids
    );
    Some(event)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Location, Stop};
    use rand::SeedableRng;

    fn routes() -> BTreeMap<String, Route> {
        let mut route = Route::new("R1", "Line 1");
        for (i, id) in ["A", "B", "C", "D"].iter().enumerate() {
            route.push_stop(
                Stop::new(*id, *id, Location::new(8.5 + i as f64 * 0.01, 76.9)),
                None,
            );
        }
        BTreeMap::from([("R1".to_string(), route)])
    }

    #[test]
    fn zero_probability_never_fires() {
        let config = DisruptionConfig {
            probability: 0.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(generate_random_disruption(&routes(), 0.0, &config, &mut rng).is_none());
        }
    }

    #[test]
    fn certain_probability_disrupts_a_window() {
        let config = DisruptionConfig {
            probability: 1.0,
            min_stops: 2,
            max_stops: 3,
            min_minutes: 5,
            max_minutes: 15,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let d = generate_random_disruption(&routes(), 100.0, &config, &mut rng).unwrap();
            assert_eq!(d.route_id, "R1");
            assert!((2..=3).contains(&d.affected_stop_ids.len()));
            let minutes = (d.end_time - d.start_time) / 60.0;
            assert!((5.0..=15.0).contains(&minutes));
            // stops are consecutive on the route
            let ids: Vec<&str> = ["A", "B", "C", "D"]
                .into_iter()
                .filter(|id| d.affected_stop_ids.contains(*id))
                .collect();
            assert_eq!(ids.len(), d.affected_stop_ids.len());
            let first = ["A", "B", "C", "D"]
                .iter()
                .position(|id| *id == ids[0])
                .unwrap();
            for (offset, id) in ids.iter().enumerate() {
                assert_eq!(["A", "B", "C", "D"][first + offset], *id);
            }
        }
    }

    #[test]
    fn empty_network_yields_nothing() {
        let config = DisruptionConfig {
            probability: 1.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert!(generate_random_disruption(&BTreeMap::new(), 0.0, &config, &mut rng).is_none());
    }

    #[test]
    fn seeded_generator_is_reproducible() {
        let config = DisruptionConfig {
            probability: 1.0,
            ..Default::default()
        };
        let a = generate_random_disruption(&routes(), 0.0, &config, &mut StdRng::seed_from_u64(3));
        let b = generate_random_disruption(&routes(), 0.0, &config, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
