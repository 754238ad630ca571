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

//! The simulation kernel: event queue, hybrid scheduler, state container, log sink, and the
//! engine that ties them together.

mod engine;
mod event_queue;
mod logger;
mod state;

pub use engine::{EngineError, SimulationEngine};
pub use event_queue::{
    EventQueue, EventType, HybridScheduler, ScheduleEntry, ScheduleStats, SimulationEvent,
    StepKind,
};
pub use logger::SimulationLogger;
pub use state::SimulationState;
