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

//! Bus stops, route segments, and routes.

use super::geometry::Location;

/// A bus stop (or stage) in the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    /// Unique identifier of the stop, shared across all routes serving it.
    pub stop_id: String,
    /// Human-readable name.
    pub name: String,
    /// Position of the stop.
    pub location: Location,
    /// Whether the stop is a stage (major timing point or layover).
    pub is_stage: bool,
    /// Passenger demand units at this stop (can be fractional).
    pub demand: f64,
}

impl Stop {
    /// Create a plain stop with the default demand of one unit.
    pub fn new(stop_id: impl Into<String>, name: impl Into<String>, location: Location) -> Self {
        Self {
            stop_id: stop_id.into(),
            name: name.into(),
            location,
            is_stage: false,
            demand: 1.0,
        }
    }
}

/// The segment between two consecutive stops on a route, with the pre-computed road distance if
/// the source data carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSegment {
    /// Identifier of the segment's origin stop.
    pub from_stop: String,
    /// Identifier of the segment's destination stop.
    pub to_stop: String,
    /// Road distance in meters; `None` means it is computed on the fly.
    pub distance_meters: Option<f64>,
}

/// A fixed bus route: an ordered sequence of stops and the segments between them.
///
/// Invariant: `segments[i]` always connects `stops[i]` to `stops[i + 1]`. The segment list is
/// rebuilt whenever the stop sequence changes, preserving known segment distances.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Unique identifier of the route.
    pub route_id: String,
    /// Human-readable name.
    pub name: String,
    /// Ordered stops of the route.
    stops: Vec<Stop>,
    /// Segments between consecutive stops, kept in sync with `stops`.
    segments: Vec<RouteSegment>,
}

impl Route {
    /// Create an empty route.
    pub fn new(route_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            name: name.into(),
            stops: Vec::new(),
            segments: Vec::new(),
        }
    }

    /// The ordered stops of the route.
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// The segments between consecutive stops.
    pub fn segments(&self) -> &[RouteSegment] {
        &self.segments
    }

    /// Number of stops on the route.
    pub fn len(&self) -> usize {
        self.stops.len()
    }

    /// Whether the route has no stops.
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Identifiers of all stops in order.
    pub fn stop_ids(&self) -> impl Iterator<Item = &str> {
        self.stops.iter().map(|s| s.stop_id.as_str())
    }

    /// The first stop of the route, if any.
    pub fn first_stop(&self) -> Option<&Stop> {
        self.stops.first()
    }

    /// The stop at `index`, if it exists.
    pub fn stop_at(&self, index: usize) -> Option<&Stop> {
        self.stops.get(index)
    }

    /// Append a stop, recording the road distance from the previous stop when known. Rebuilds the
    /// segment list to keep the invariant.
    pub fn push_stop(&mut self, stop: Stop, distance_to_previous: Option<f64>) {
        self.stops.push(stop);
        self.rebuild_segments();
        if let (Some(dist), Some(last)) = (distance_to_previous, self.segments.last_mut()) {
            last.distance_meters = Some(dist);
        }
    }

    /// Pre-loaded distance in meters from `stops[segment_index]` to the next stop, if the source
    /// data carried one.
    pub fn distance_to_next_stop(&self, segment_index: usize) -> Option<f64> {
        self.segments.get(segment_index)?.distance_meters
    }

    /// Rebuild the segment list from the current stop sequence, keeping known distances for
    /// segments whose endpoints did not change.
    fn rebuild_segments(&mut self) {
        let old = std::mem::take(&mut self.segments);
        self.segments = self
            .stops
            .windows(2)
            .map(|w| RouteSegment {
                from_stop: w[0].stop_id.clone(),
                to_stop: w[1].stop_id.clone(),
                distance_meters: old
                    .iter()
                    .find(|s| s.from_stop == w[0].stop_id && s.to_stop == w[1].stop_id)
                    .and_then(|s| s.distance_meters),
            })
            .collect();
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Route {} - {} ({} stops)",
            self.route_id,
            self.name,
            self.len()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stop(id: &str, lat: f64) -> Stop {
        Stop::new(id, id, Location::new(lat, 76.9))
    }

    #[test]
    fn segments_follow_stops() {
        let mut route = Route::new("R1", "Test");
        route.push_stop(stop("A", 8.50), None);
        route.push_stop(stop("B", 8.51), Some(1200.0));
        route.push_stop(stop("C", 8.52), None);

        assert_eq!(route.segments().len(), 2);
        for (i, seg) in route.segments().iter().enumerate() {
            assert_eq!(seg.from_stop, route.stops()[i].stop_id);
            assert_eq!(seg.to_stop, route.stops()[i + 1].stop_id);
        }
        assert_eq!(route.distance_to_next_stop(0), Some(1200.0));
        assert_eq!(route.distance_to_next_stop(1), None);
        assert_eq!(route.distance_to_next_stop(2), None);
    }

    #[test]
    fn known_distances_survive_rebuild() {
        let mut route = Route::new("R1", "Test");
        route.push_stop(stop("A", 8.50), None);
        route.push_stop(stop("B", 8.51), Some(900.0));
        // appending another stop rebuilds all segments
        route.push_stop(stop("C", 8.52), Some(1100.0));
        assert_eq!(route.distance_to_next_stop(0), Some(900.0));
        assert_eq!(route.distance_to_next_stop(1), Some(1100.0));
    }
}
