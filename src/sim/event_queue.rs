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

//! The discrete event queue and the hybrid scheduler.
//!
//! The scheduler pre-builds the whole tick sequence for a run: clusters of discrete events
//! ("batches") interleaved with adaptive fixed steps, fine while an event is near and coarse
//! through quiet periods. Emitted times are strictly non-decreasing, and events with equal
//! timestamps are ordered by bus id, so a rebuilt schedule over the same events is identical.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
};

use crate::config::HybridConfig;

/// Kind of a discrete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A scheduled trip departs.
    TripStart,
    /// A scheduled trip arrives.
    TripEnd,
    /// A charging session completes.
    ChargingEnd,
    /// A disruption window opens.
    DisruptionStart,
    /// A disruption window closes.
    DisruptionEnd,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventType::TripStart => "trip_start",
            EventType::TripEnd => "trip_end",
            EventType::ChargingEnd => "charging_end",
            EventType::DisruptionStart => "disruption_start",
            EventType::DisruptionEnd => "disruption_end",
        })
    }
}

/// A discrete event of the simulation.
#[derive(Debug, Clone)]
pub struct SimulationEvent {
    /// When the event fires (epoch seconds).
    pub time: f64,
    /// What happens.
    pub event_type: EventType,
    /// The bus concerned.
    pub bus_id: String,
    /// Index into the bus's daily schedule, for trip events.
    pub trip_index: Option<usize>,
}

impl PartialEq for SimulationEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimulationEvent {}

impl PartialOrd for SimulationEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimulationEvent {
    /// Order by time; ties break on the bus id for determinism.
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.bus_id.cmp(&other.bus_id))
    }
}

/// Min-heap of simulation events with batch clustering.
#[derive(Debug, Default)]
pub struct EventQueue {
    /// The pending events (stored reversed, [`BinaryHeap`] is a max-heap).
    heap: BinaryHeap<std::cmp::Reverse<SimulationEvent>>,
    /// Events within this window of the earliest pending event form one batch.
    batch_threshold: f64,
}

impl EventQueue {
    /// Create an empty queue with the given clustering window (seconds).
    pub fn new(batch_threshold: f64) -> Self {
        Self {
            heap: BinaryHeap::new(),
            batch_threshold,
        }
    }

    /// Add one event.
    pub fn push(&mut self, event: SimulationEvent) {
        self.heap.push(std::cmp::Reverse(event));
    }

    /// Add many events.
    pub fn extend(&mut self, events: impl IntoIterator<Item = SimulationEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Pop the earliest event together with every event within `batch_threshold` of it. Empty
    /// only if the queue is empty.
    pub fn next_batch(&mut self) -> Vec<SimulationEvent> {
        let Some(std::cmp::Reverse(first)) = self.heap.pop() else {
            return Vec::new();
        };
        let end = first.time + self.batch_threshold;
        let mut batch = vec![first];
        while self
            .heap
            .peek()
            .is_some_and(|std::cmp::Reverse(e)| e.time <= end)
        {
            batch.push(self.heap.pop().unwrap().0);
        }
        batch
    }

    /// Time of the earliest pending event.
    pub fn peek_time(&self) -> Option<f64> {
        self.heap.peek().map(|std::cmp::Reverse(e)| e.time)
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drop all pending events.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

/// Kind of an emitted schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// A cluster of discrete events; the optimizer runs on these.
    Batch,
    /// A fine fixed step (an event is near).
    FineStep,
    /// A coarse fixed step (quiet period).
    CoarseStep,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepKind::Batch => "batch",
            StepKind::FineStep => "fine_step",
            StepKind::CoarseStep => "coarse_step",
        })
    }
}

/// One emitted entry of the hybrid schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    /// Simulation time of the tick.
    pub time: f64,
    /// Kind of the tick.
    pub kind: StepKind,
    /// The events fired at this tick (batches only).
    pub batch: Vec<SimulationEvent>,
}

/// Counts over a built schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScheduleStats {
    /// Total number of entries.
    pub total_steps: usize,
    /// Number of batch entries.
    pub batches: usize,
    /// Number of fine steps.
    pub fine_steps: usize,
    /// Number of coarse steps.
    pub coarse_steps: usize,
}

impl std::fmt::Display for ScheduleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} steps ({} batches, {} fine, {} coarse)",
            self.total_steps, self.batches, self.fine_steps, self.coarse_steps
        )
    }
}

/// The hybrid scheduler: builds the full tick sequence once, then iterates it.
#[derive(Debug)]
pub struct HybridScheduler {
    /// Scheduler tunables.
    config: HybridConfig,
    /// The built schedule.
    schedule: Vec<ScheduleEntry>,
    /// Position of the next entry to emit.
    index: usize,
    /// The batch of the most recently emitted entry.
    current_batch: Vec<SimulationEvent>,
}

impl HybridScheduler {
    /// Create a scheduler with an empty schedule.
    pub fn new(config: &HybridConfig) -> Self {
        Self {
            config: config.clone(),
            schedule: Vec::new(),
            index: 0,
            current_batch: Vec::new(),
        }
    }

    /// Build the schedule for `events` over `[sim_start, sim_end]`. A batch whose events all lie
    /// before the current time fires at the current time (never earlier), which keeps emitted
    /// times non-decreasing.
    pub fn init_events(
        &mut self,
        events: Vec<SimulationEvent>,
        sim_start: f64,
        sim_end: f64,
    ) {
        let mut queue = EventQueue::new(self.config.batch_threshold_seconds);
        queue.extend(events);
        self.schedule.clear();
        self.index = 0;
        self.current_batch.clear();

        let mut now = sim_start;
        while now < sim_end && !queue.is_empty() {
            let next_time = queue.peek_time().unwrap();
            if next_time <= now + 1.0 {
                let batch = queue.next_batch();
                let batch_time = batch.last().map(|e| e.time).unwrap_or(now).max(now);
                self.schedule.push(ScheduleEntry {
                    time: batch_time,
                    kind: StepKind::Batch,
                    batch,
                });
                now = batch_time;
            } else {
                let gap = next_time - now;
                let (step, kind) = if gap > self.config.gap_threshold_seconds {
                    (self.config.coarse_step_seconds, StepKind::CoarseStep)
                } else {
                    (self.config.fine_step_seconds, StepKind::FineStep)
                };
                let time = (now + step).min(next_time).min(sim_end);
                self.schedule.push(ScheduleEntry {
                    time,
                    kind,
                    batch: Vec::new(),
                });
                now = time;
            }
        }

        // cover the remaining quiet time with coarse steps
        while now < sim_end {
            let time = (now + self.config.coarse_step_seconds).min(sim_end);
            self.schedule.push(ScheduleEntry {
                time,
                kind: StepKind::CoarseStep,
                batch: Vec::new(),
            });
            now = time;
        }
    }

    /// Emit the next schedule entry as `(time, kind)`; its batch is available through
    /// [`Self::current_batch`]. `None` once the schedule is exhausted.
    pub fn next_step(&mut self) -> Option<(f64, StepKind)> {
        let entry = self.schedule.get(self.index)?;
        self.current_batch = entry.batch.clone();
        self.index += 1;
        Some((entry.time, entry.kind))
    }

    /// The events fired by the most recently emitted batch entry.
    pub fn current_batch(&self) -> &[SimulationEvent] {
        &self.current_batch
    }

    /// The whole built schedule.
    pub fn schedule(&self) -> &[ScheduleEntry] {
        &self.schedule
    }

    /// Restart iteration from the first entry.
    pub fn reset(&mut self) {
        self.index = 0;
        self.current_batch.clear();
    }

    /// Counts over the built schedule.
    pub fn stats(&self) -> ScheduleStats {
        let mut stats = ScheduleStats {
            total_steps: self.schedule.len(),
            ..Default::default()
        };
        for entry in &self.schedule {
            match entry.kind {
                StepKind::Batch => stats.batches += 1,
                StepKind::FineStep => stats.fine_steps += 1,
                StepKind::CoarseStep => stats.coarse_steps += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn event(time: f64, bus: &str) -> SimulationEvent {
        SimulationEvent {
            time,
            event_type: EventType::TripStart,
            bus_id: bus.to_string(),
            trip_index: Some(0),
        }
    }

    fn config() -> HybridConfig {
        HybridConfig {
            batch_threshold_seconds: 30.0,
            fine_step_seconds: 60.0,
            coarse_step_seconds: 300.0,
            gap_threshold_seconds: 300.0,
            ..Default::default()
        }
    }

    #[test]
    fn batch_extraction_clusters_within_threshold() {
        let mut queue = EventQueue::new(30.0);
        queue.extend([event(100.0, "a"), event(110.0, "b"), event(120.0, "c"), event(500.0, "d")]);
        let batch = queue.next_batch();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.last().unwrap().time, 120.0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn equal_times_order_by_bus_id() {
        let mut queue = EventQueue::new(30.0);
        queue.extend([event(100.0, "z"), event(100.0, "a"), event(100.0, "m")]);
        let batch = queue.next_batch();
        let ids: Vec<&str> = batch.iter().map(|e| e.bus_id.as_str()).collect();
        assert_eq!(ids, ["a", "m", "z"]);
    }

    #[test]
    fn schedule_mixes_batches_and_adaptive_steps() {
        // events at 100/110/120 cluster; the long gap to 5000 is bridged by coarse steps that
        // tighten to fine steps as the event approaches
        let mut scheduler = HybridScheduler::new(&config());
        scheduler.init_events(
            vec![event(100.0, "a"), event(110.0, "b"), event(120.0, "c"), event(5000.0, "d")],
            0.0,
            6000.0,
        );
        let schedule = scheduler.schedule();

        // leading fine steps towards the first cluster, then the batch of three
        let batch_pos = schedule
            .iter()
            .position(|e| e.kind == StepKind::Batch)
            .unwrap();
        assert_eq!(schedule[batch_pos].time, 120.0);
        assert_eq!(schedule[batch_pos].batch.len(), 3);
        for e in &schedule[..batch_pos] {
            assert_eq!(e.kind, StepKind::FineStep);
        }

        // the long gap is coarse, the final approach fine, and the last event is its own batch
        let after: Vec<_> = schedule[batch_pos + 1..].iter().collect();
        assert!(after.iter().any(|e| e.kind == StepKind::CoarseStep));
        let last_batch = after.iter().find(|e| e.kind == StepKind::Batch).unwrap();
        assert_eq!(last_batch.time, 5000.0);
        assert_eq!(last_batch.batch.len(), 1);

        // monotone times throughout
        for w in schedule.windows(2) {
            assert!(w[0].time <= w[1].time);
        }
        // trailing coarse steps reach sim_end exactly
        assert_eq!(schedule.last().unwrap().time, 6000.0);
    }

    #[test]
    fn empty_event_list_yields_coarse_steps_to_the_end() {
        let mut scheduler = HybridScheduler::new(&config());
        scheduler.init_events(Vec::new(), 0.0, 1000.0);
        let schedule = scheduler.schedule();
        assert!(!schedule.is_empty());
        assert!(schedule.iter().all(|e| e.kind == StepKind::CoarseStep));
        assert_eq!(schedule.last().unwrap().time, 1000.0);
    }

    #[test]
    fn events_before_start_fire_at_start() {
        let mut scheduler = HybridScheduler::new(&config());
        scheduler.init_events(vec![event(10.0, "a"), event(20.0, "b")], 500.0, 1000.0);
        let first = &scheduler.schedule()[0];
        assert_eq!(first.kind, StepKind::Batch);
        assert_eq!(first.time, 500.0);
        assert_eq!(first.batch.len(), 2);
    }

    #[test]
    fn reset_replays_the_identical_sequence() {
        let mut scheduler = HybridScheduler::new(&config());
        scheduler.init_events(
            vec![event(100.0, "a"), event(400.0, "b"), event(2000.0, "c")],
            0.0,
            3000.0,
        );
        let mut first_pass = Vec::new();
        while let Some(step) = scheduler.next_step() {
            first_pass.push((step, scheduler.current_batch().to_vec()));
        }
        scheduler.reset();
        let mut second_pass = Vec::new();
        while let Some(step) = scheduler.next_step() {
            second_pass.push((step, scheduler.current_batch().to_vec()));
        }
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn stats_count_every_kind() {
        let mut scheduler = HybridScheduler::new(&config());
        scheduler.init_events(vec![event(100.0, "a"), event(5000.0, "b")], 0.0, 6000.0);
        let stats = scheduler.stats();
        assert_eq!(stats.total_steps, scheduler.schedule().len());
        assert_eq!(
            stats.batches + stats.fine_steps + stats.coarse_steps,
            stats.total_steps
        );
        assert_eq!(stats.batches, 2);
    }
}
