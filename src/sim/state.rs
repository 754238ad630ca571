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

//! The central state container: the exclusive owner of every simulation collection.
//!
//! Buses, the optimizer, and the disruption manager all reference routes, depots, and stations
//! through identifiers resolved against this state. No entity holds a pointer to another.

use std::collections::{BTreeMap, HashMap};

use crate::{
    fleet::Bus,
    model::{ChargingStation, Depot, DisruptionEvent, Route, Stop},
    optimization::charger_node_id,
};

/// All simulation state.
#[derive(Debug)]
pub struct SimulationState {
    /// All routes by id.
    pub routes: BTreeMap<String, Route>,
    /// All stops by id, unique across routes.
    pub stops: BTreeMap<String, Stop>,
    /// All charging stations. Their position in this vector defines their synthetic node id.
    pub stations: Vec<ChargingStation>,
    /// All depots by name.
    pub depots: BTreeMap<String, Depot>,
    /// The fleet.
    pub buses: Vec<Bus>,
    /// Snapshot of the active disruptions, refreshed by the engine at the start of every tick.
    pub active_disruptions: Vec<DisruptionEvent>,
}

impl SimulationState {
    /// Assemble a state from loaded collections.
    pub fn new(
        routes: BTreeMap<String, Route>,
        stops: BTreeMap<String, Stop>,
        stations: Vec<ChargingStation>,
        depots: BTreeMap<String, Depot>,
        buses: Vec<Bus>,
    ) -> Self {
        Self {
            routes,
            stops,
            stations,
            depots,
            buses,
            active_disruptions: Vec::new(),
        }
    }

    /// Synthetic charger node id (`CS_<name>_<index>`) to station index, for every station. The
    /// same scheme the optimizer's graph uses, so its decisions resolve here.
    pub fn station_nodes(&self) -> HashMap<String, usize> {
        self.stations
            .iter()
            .enumerate()
            .map(|(index, station)| (charger_node_id(&station.name, index), index))
            .collect()
    }
}
