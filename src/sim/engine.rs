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

//! The simulation engine: tick orchestration over both temporal models.
//!
//! Every tick runs the same pipeline with a strict happens-before order: disruption update,
//! (optionally) central optimization and decision application, the parallel bus fan-out on a
//! bounded worker pool, and finally the log sink. The tick barrier joins all agents before the
//! log row is written and the next tick begins.

use log::{debug, info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    config::{SimulationConfig, SimulationMode},
    fleet::StepContext,
    hazards::DisruptionManager,
    optimization::{apply_mip_decisions, optimize_network},
};

use super::{
    event_queue::{EventType, HybridScheduler, SimulationEvent, StepKind},
    logger::SimulationLogger,
    state::SimulationState,
};

/// Error raised while setting up or running the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The simulation log could not be written.
    #[error("Cannot write the simulation log: {0}")]
    Log(#[from] csv::Error),
    /// The worker pool could not be built.
    #[error("Cannot build the worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// The engine driving the whole simulation.
#[derive(Debug)]
pub struct SimulationEngine {
    /// Simulation tunables.
    config: SimulationConfig,
    /// Lifecycle of random and flood disruptions.
    manager: DisruptionManager,
    /// The CSV log sink.
    logger: SimulationLogger,
    /// Bounded worker pool for the per-tick bus fan-out.
    pool: rayon::ThreadPool,
}

impl SimulationEngine {
    /// Create an engine. The worker pool is bounded by `config.workers` and the machine's core
    /// count.
    pub fn new(config: SimulationConfig, logger: SimulationLogger) -> Result<Self, EngineError> {
        let workers = config.workers.clamp(1, num_cpus::get());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()?;
        Ok(Self {
            manager: DisruptionManager::new(&config),
            config,
            logger,
            pool,
        })
    }

    /// The disruption manager, e.g. to inject scripted disruptions before a run.
    pub fn manager_mut(&mut self) -> &mut DisruptionManager {
        &mut self.manager
    }

    /// Run the simulation for `duration_hours`, starting five minutes before the earliest
    /// scheduled departure (or at `t = 0` for a fleet without trips).
    pub fn run(
        &mut self,
        state: &mut SimulationState,
        duration_hours: f64,
    ) -> Result<(), EngineError> {
        let earliest = state
            .buses
            .iter()
            .flat_map(|b| b.daily_schedule.iter().map(|t| t.start_time))
            .reduce(f64::min);
        let sim_start = match earliest {
            Some(t) => t - 300.0,
            None => {
                warn!("No scheduled trips found; simulating an idle fleet");
                0.0
            }
        };
        let sim_end = sim_start + duration_hours * 3600.0;

        match self.config.hybrid.mode {
            SimulationMode::FixedInterval => self.run_fixed_interval(state, sim_start, sim_end),
            SimulationMode::HybridAdaptive => self.run_hybrid_adaptive(state, sim_start, sim_end),
        }
    }

    /// Fixed-interval mode: a constant step size, with the optimizer every
    /// `mip.interval_steps` ticks.
    fn run_fixed_interval(
        &mut self,
        state: &mut SimulationState,
        sim_start: f64,
        sim_end: f64,
    ) -> Result<(), EngineError> {
        info!(
            "Fixed-interval simulation: [{sim_start}, {sim_end}] in {}s steps",
            self.config.step_seconds
        );
        let interval = self.config.mip.interval_steps.max(1);
        let mut now = sim_start;
        let mut step_count: usize = 0;
        while now < sim_end {
            step_count += 1;
            let run_mip = interval == 1 || step_count % interval == 1;
            self.tick(state, now, run_mip)?;
            now += self.config.step_seconds;
        }
        info!(
            "Simulation complete after {step_count} steps, log written to {}",
            self.logger.path().display()
        );
        Ok(())
    }

    /// Hybrid-adaptive mode: iterate the pre-built schedule; the optimizer runs on batches only.
    fn run_hybrid_adaptive(
        &mut self,
        state: &mut SimulationState,
        sim_start: f64,
        sim_end: f64,
    ) -> Result<(), EngineError> {
        let mut scheduler = HybridScheduler::new(&self.config.hybrid);
        scheduler.init_events(Self::build_event_list(state), sim_start, sim_end);
        info!(
            "Hybrid-adaptive simulation: [{sim_start}, {sim_end}], {}",
            scheduler.stats()
        );

        let mut mip_calls: usize = 0;
        while let Some((now, kind)) = scheduler.next_step() {
            let run_mip = kind == StepKind::Batch;
            if run_mip {
                mip_calls += 1;
                debug!(
                    "[t={now}] batch of {} events",
                    scheduler.current_batch().len()
                );
            }
            self.tick(state, now, run_mip)?;
        }
        info!(
            "Simulation complete after {mip_calls} optimizer runs, log written to {}",
            self.logger.path().display()
        );
        Ok(())
    }

    /// All trip start and end events of the fleet, time-ordered.
    fn build_event_list(state: &SimulationState) -> Vec<SimulationEvent> {
        let mut events = Vec::new();
        for bus in &state.buses {
            for (trip_index, trip) in bus.daily_schedule.iter().enumerate() {
                events.push(SimulationEvent {
                    time: trip.start_time,
                    event_type: EventType::TripStart,
                    bus_id: bus.bus_id.clone(),
                    trip_index: Some(trip_index),
                });
                events.push(SimulationEvent {
                    time: trip.end_time,
                    event_type: EventType::TripEnd,
                    bus_id: bus.bus_id.clone(),
                    trip_index: Some(trip_index),
                });
            }
        }
        events.sort();
        events
    }

    /// One tick: disruptions, optional optimization, parallel bus steps, log row.
    fn tick(
        &mut self,
        state: &mut SimulationState,
        now: f64,
        run_mip: bool,
    ) -> Result<(), EngineError> {
        // 1. hazards
        self.manager.update(
            &state.routes,
            &state.stations,
            &state.depots,
            &mut state.buses,
            now,
        );
        state.active_disruptions = self.manager.active_disruptions().to_vec();

        let station_nodes = state.station_nodes();

        // 2. central optimization, 3. decision application
        if run_mip && self.config.mip.enabled {
            let outcome = optimize_network(
                &state.buses,
                &state.routes,
                &state.stations,
                &state.depots,
                &state.active_disruptions,
                now,
                &self.config,
            );
            debug!(
                "[t={now}] optimizer status {} (size {}, {:.2}s)",
                outcome.status,
                outcome.size,
                outcome.solve_time.as_secs_f64()
            );
            apply_mip_decisions(
                &mut state.buses,
                &outcome,
                &state.routes,
                &state.stations,
                &station_nodes,
                now,
            );
        }

        // 4. parallel bus fan-out; the pool join is the tick barrier
        {
            let SimulationState {
                routes,
                stations,
                depots,
                buses,
                active_disruptions,
                ..
            } = state;
            let ctx = StepContext {
                now,
                routes: &*routes,
                depots: &*depots,
                stations: stations.as_slice(),
                station_nodes: &station_nodes,
                disruptions: &*active_disruptions,
                config: &self.config,
            };
            self.pool
                .install(|| buses.par_iter_mut().for_each(|bus| bus.step(&ctx)));
        }

        // 5. log
        self.logger.log_step(now, state)?;
        Ok(())
    }
}
