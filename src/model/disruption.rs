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

//! Disruption events: a time-bounded assertion that a set of stops on one route is unusable.

use std::collections::BTreeSet;

/// A disruption of a set of stops on a single route.
#[derive(Debug, Clone, PartialEq)]
pub struct DisruptionEvent {
    /// Route whose stops are affected.
    pub route_id: String,
    /// Identifiers of the unusable stops.
    pub affected_stop_ids: BTreeSet<String>,
    /// Start of the disruption window (epoch seconds).
    pub start_time: f64,
    /// End of the disruption window (epoch seconds), never before `start_time`.
    pub end_time: f64,
    /// Human-readable cause.
    pub description: String,
}

impl DisruptionEvent {
    /// Whether the disruption is active at `now`.
    pub fn is_active(&self, now: f64) -> bool {
        self.start_time <= now && now <= self.end_time
    }

    /// Whether `stop_id` on `route_id` is blocked by this disruption at `now`.
    pub fn blocks(&self, route_id: &str, stop_id: &str, now: f64) -> bool {
        self.is_active(now) && self.route_id == route_id && self.affected_stop_ids.contains(stop_id)
    }
}
