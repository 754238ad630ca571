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

//! # efleet: resilient simulation of electric bus fleets under disruptions
//!
//! efleet couples a hybrid discrete-event / time-stepped simulation kernel with a rolling-horizon
//! mixed-integer optimizer. Every control tick, the optimizer jointly decides movement, charging,
//! and depot returns for a fleet of battery-electric buses facing random incidents and
//! raster-driven flood disruptions, while each bus independently advances its local state and
//! reconciles with the central decisions.
//!
//! ## Structure
//!
//! The source code of this program is structured as follows:
//! - The module [`model`] holds the static domain model: stops, routes, charging stations,
//!   depots, and disruption events.
//! - The module [`data`] loads the network from its external CSV interfaces.
//! - The module [`hazards`] owns the lifecycle of disruptions: the flood hazard map
//!   ([`hazards::FloodHazardMap`]) with its time-varying depth dynamics, random route
//!   disruptions, and the [`hazards::DisruptionManager`] combining them.
//! - The module [`fleet`] is the bus agent: the per-tick local behavior of a single vehicle
//!   ([`fleet::Bus::step`]).
//! - The module [`optimization`] contains the feasibility graph, the persistent distance matrix,
//!   the MIP itself ([`optimization::optimize_network`]), and the decision applier reconciling
//!   optimizer output with the actual fleet state.
//! - The module [`sim`] is the kernel: the event queue and hybrid scheduler
//!   ([`sim::HybridScheduler`]), the state container, the CSV log sink, and the engine
//!   ([`sim::SimulationEngine`]) orchestrating every tick.
//! - The module [`config`] collects every tunable in one serde-deserializable structure.

#![deny(
    missing_docs,
    clippy::missing_docs_in_private_items,
    missing_debug_implementations,
    rust_2018_idioms
)]

pub mod config;
pub mod data;
pub mod fleet;
pub mod hazards;
pub mod model;
pub mod optimization;
pub mod sim;
#[cfg(test)]
mod test;

pub use config::SimulationConfig;
pub use sim::{SimulationEngine, SimulationState};
