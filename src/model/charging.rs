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

//! Charging stations with a shared slot counter.
//!
//! Stations are the only resource that buses contend for inside the parallel fan-out. The slot
//! counter is an atomic with a compare-and-swap decrement: a bus that loses the race observes zero
//! free slots, abandons the charge attempt, and re-plans on its next tick. All other station
//! mutations (the `operational` flag) happen before the fan-out starts.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use super::geometry::Location;

/// A charging station with a bounded number of identical slots.
#[derive(Debug)]
pub struct ChargingStation {
    /// Unique name of the station.
    pub name: String,
    /// Position of the station.
    pub location: Location,
    /// Power per slot, in kW.
    pub capacity_kw: f64,
    /// Total number of slots.
    pub total_slots: u32,
    /// Bus companies that may charge here.
    pub compatible_companies: HashSet<String>,
    /// Whether the station is currently operational (cleared while flooded).
    operational: AtomicBool,
    /// Currently free slots, always within `[0, total_slots]`.
    available_slots: AtomicU32,
}

impl ChargingStation {
    /// Create a station with all slots free.
    pub fn new(
        name: impl Into<String>,
        location: Location,
        capacity_kw: f64,
        total_slots: u32,
        compatible_companies: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            location,
            capacity_kw,
            total_slots,
            compatible_companies: compatible_companies.into_iter().collect(),
            operational: AtomicBool::new(true),
            available_slots: AtomicU32::new(total_slots),
        }
    }

    /// Whether the station is currently operational.
    pub fn operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    /// Set the operational flag. Called by the disruption manager before the bus fan-out.
    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Release);
    }

    /// Number of currently free slots.
    pub fn available_slots(&self) -> u32 {
        self.available_slots.load(Ordering::Acquire)
    }

    /// Whether a bus of `company` could start charging here right now.
    pub fn is_available(&self, company: &str) -> bool {
        self.operational()
            && self.available_slots() > 0
            && self.compatible_companies.contains(company)
    }

    /// Claim one slot. Returns `false` if no slot was free; the counter never drops below zero.
    pub fn try_occupy(&self) -> bool {
        self.available_slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| {
                slots.checked_sub(1)
            })
            .is_ok()
    }

    /// Return one slot. The counter never exceeds `total_slots`.
    pub fn release(&self) {
        let _ = self
            .available_slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| {
                (slots < self.total_slots).then_some(slots + 1)
            });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn station(slots: u32) -> ChargingStation {
        ChargingStation::new(
            "CS",
            Location::new(8.5, 76.9),
            150.0,
            slots,
            ["Default".to_string()],
        )
    }

    #[test]
    fn occupy_and_release_stay_in_bounds() {
        let s = station(2);
        assert!(s.try_occupy());
        assert!(s.try_occupy());
        assert!(!s.try_occupy(), "third occupy must fail");
        assert_eq!(s.available_slots(), 0);
        s.release();
        s.release();
        s.release(); // extra release is a no-op
        assert_eq!(s.available_slots(), 2);
    }

    #[test]
    fn availability_requires_everything() {
        let s = station(1);
        assert!(s.is_available("Default"));
        assert!(!s.is_available("Other"));
        s.set_operational(false);
        assert!(!s.is_available("Default"));
        s.set_operational(true);
        assert!(s.try_occupy());
        assert!(!s.is_available("Default"));
    }

    #[test]
    fn parallel_occupancy_never_oversubscribes() {
        let s = station(3);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| s.try_occupy())).collect();
            let granted = handles.into_iter().filter(|h| h.join().unwrap()).count();
            assert_eq!(granted, 3);
        });
        assert_eq!(s.available_slots(), 0);
    }
}
