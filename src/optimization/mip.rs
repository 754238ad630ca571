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

//! The rolling-horizon network-flow MIP.
//!
//! Every optimization tick builds a fresh model over the feasibility graph: binary position
//! variables `x[b,s,t]`, traversal variables `y[b,e,t]` over the feasible edges only, charging
//! variables per charger node, and continuous SoC tracking. The model minimizes unserved demand
//! (weighted up while disruptions are active) plus battery drain penalties, and only the first
//! action per bus is committed.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use good_lp::{
    constraint,
    solvers::coin_cbc::coin_cbc as create_solver,
    variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
};
use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    config::SimulationConfig,
    fleet::{Bus, BusStatus},
    model::{ChargingStation, Depot, DisruptionEvent, Route},
};

use super::{
    distance_cache::distance_matrix,
    graph::{build_flow_graph, depot_node_id, FlowGraph, Node},
    solver::CbcSettings,
    MipDecision,
};

/// Outcome of one solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolveStatus {
    /// An optimal or time-limited feasible solution was found and extracted.
    Solved,
    /// The model is infeasible; no decisions were extracted.
    Infeasible,
    /// The model is unbounded; no decisions were extracted.
    Unbounded,
    /// The model was empty (no nodes or no buses) and solving was skipped.
    Skipped,
    /// The solver failed for another reason; no decisions were extracted.
    Failed,
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SolveStatus::Solved => "solved",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::Unbounded => "unbounded",
            SolveStatus::Skipped => "skipped",
            SolveStatus::Failed => "failed",
        })
    }
}

/// Size of the generated problem, logged before solving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProblemSize {
    /// Number of constraints (equations).
    pub rows: usize,
    /// Number of variables.
    pub cols: usize,
    /// Number of planning minutes.
    pub horizon: usize,
}

impl std::fmt::Display for ProblemSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}x{})", self.horizon, self.rows, self.cols)
    }
}

/// Result of one optimization tick: the committed first action per bus, the graph the model was
/// built over (for the decision applier), and solve diagnostics.
#[derive(Debug)]
pub struct MipOutcome {
    /// Immediate decision per bus id. Buses without an entry continue autonomously.
    pub decisions: BTreeMap<String, MipDecision>,
    /// The feasibility graph the model was built over.
    pub graph: FlowGraph,
    /// Solver outcome.
    pub status: SolveStatus,
    /// Wall-clock time spent in the solver.
    pub solve_time: Duration,
    /// Size of the generated model.
    pub size: ProblemSize,
}

impl MipOutcome {
    /// An outcome without any decisions.
    fn empty(graph: FlowGraph, status: SolveStatus) -> Self {
        Self {
            decisions: BTreeMap::new(),
            graph,
            status,
            solve_time: Duration::ZERO,
            size: ProblemSize::default(),
        }
    }
}

/// Dense bookkeeping over the graph for model generation: node and edge indices, per-node edge
/// adjacency, and the special node classes.
struct ModelIndex<'a> {
    /// Node ids by dense index.
    node_ids: Vec<&'a str>,
    /// Dense index per node id.
    index_of: BTreeMap<&'a str, usize>,
    /// Feasible edges as (from, to) node indices.
    edges: Vec<(usize, usize)>,
    /// Distance in km per edge, aligned with `edges`.
    edge_km: Vec<f64>,
    /// Outgoing edge indices per node.
    out_edges: Vec<Vec<usize>>,
    /// Incoming edge indices per node.
    in_edges: Vec<Vec<usize>>,
    /// Charger nodes as (node index, power in kW, slot snapshot).
    chargers: Vec<(usize, f64, u32)>,
    /// Charger position per node index.
    charger_pos: BTreeMap<usize, usize>,
    /// Stop nodes as (node index, demand).
    stops: Vec<(usize, f64)>,
}

impl<'a> ModelIndex<'a> {
    /// Build the index from a graph and its distance matrix.
    fn new(graph: &'a FlowGraph, distances: &BTreeMap<(String, String), f64>) -> Self {
        let node_ids: Vec<&str> = graph.nodes().keys().map(String::as_str).collect();
        let index_of: BTreeMap<&str, usize> =
            node_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut edges = Vec::new();
        let mut edge_km = Vec::new();
        let mut out_edges = vec![Vec::new(); node_ids.len()];
        let mut in_edges = vec![Vec::new(); node_ids.len()];
        for (from, to) in graph.edge_ids() {
            let e = edges.len();
            let (a, b) = (index_of[from], index_of[to]);
            edges.push((a, b));
            edge_km.push(
                distances
                    .get(&(from.to_string(), to.to_string()))
                    .copied()
                    .unwrap_or(0.0),
            );
            out_edges[a].push(e);
            in_edges[b].push(e);
        }

        let mut chargers = Vec::new();
        let mut charger_pos = BTreeMap::new();
        for id in graph.charger_ids() {
            if let Some(Node::Charger {
                capacity_kw,
                available_slots,
                ..
            }) = graph.node(id)
            {
                let s = index_of[id.as_str()];
                charger_pos.insert(s, chargers.len());
                chargers.push((s, *capacity_kw, *available_slots));
            }
        }

        let stops = node_ids
            .iter()
            .enumerate()
            .filter_map(|(s, &id)| match graph.node(id) {
                Some(node) if node.is_stop() => Some((s, node.demand())),
                _ => None,
            })
            .collect();

        Self {
            node_ids,
            index_of,
            edges,
            edge_km,
            out_edges,
            in_edges,
            chargers,
            charger_pos,
            stops,
        }
    }
}

/// All decision variables of the model.
struct MipVars {
    /// `x[b][s][t]`: bus `b` is at node `s` at minute `t`.
    x: Vec<Vec<Vec<Variable>>>,
    /// `y[b][e][t]`: bus `b` traverses feasible edge `e` starting at minute `t < H`.
    y: Vec<Vec<Vec<Variable>>>,
    /// `charge[b][c][t]`: bus `b` charges at charger `c` during minute `t`.
    charge: Vec<Vec<Vec<Variable>>>,
    /// `soc[b][t]`: state of charge of bus `b` at minute `t`, within `[0, 100]`.
    soc: Vec<Vec<Variable>>,
    /// `served[k]`: stop `k` (position in [`ModelIndex::stops`]) is visited at least once.
    served: Vec<Variable>,
}

/// Create all decision variables.
fn setup_vars(
    pb: &mut ProblemVariables,
    idx: &ModelIndex<'_>,
    n_buses: usize,
    horizon: usize,
) -> MipVars {
    let n_nodes = idx.node_ids.len();
    MipVars {
        x: (0..n_buses)
            .map(|_| {
                (0..n_nodes)
                    .map(|_| (0..=horizon).map(|_| pb.add(variable().binary())).collect_vec())
                    .collect_vec()
            })
            .collect_vec(),
        y: (0..n_buses)
            .map(|_| {
                idx.edges
                    .iter()
                    .map(|_| (0..horizon).map(|_| pb.add(variable().binary())).collect_vec())
                    .collect_vec()
            })
            .collect_vec(),
        charge: (0..n_buses)
            .map(|_| {
                idx.chargers
                    .iter()
                    .map(|_| (0..=horizon).map(|_| pb.add(variable().binary())).collect_vec())
                    .collect_vec()
            })
            .collect_vec(),
        soc: (0..n_buses)
            .map(|_| {
                (0..=horizon)
                    .map(|_| pb.add(variable().min(0.0).max(100.0)))
                    .collect_vec()
            })
            .collect_vec(),
        served: idx
            .stops
            .iter()
            .map(|_| pb.add(variable().binary()))
            .collect_vec(),
    }
}

/// The objective: unserved demand (weighted up under disruptions), a mid-horizon battery-comfort
/// term, and the end-of-horizon drain penalty.
fn objective(
    idx: &ModelIndex<'_>,
    vars: &MipVars,
    buses: &[Bus],
    config: &SimulationConfig,
    any_disruption: bool,
    horizon: usize,
) -> Expression {
    let alpha =
        config.mip.unserved_demand_cost * if any_disruption { 2.0 } else { 1.0 };
    let beta = config.mip.battery_drain_penalty;

    let mut objective = Expression::from(0.0);
    for (pos, &(_, demand)) in idx.stops.iter().enumerate() {
        objective += (-(demand * alpha)) * vars.served[pos] + demand * alpha;
    }
    for b in 0..buses.len() {
        for t in horizon / 2..=horizon {
            objective += (-(beta * 0.5)) * vars.soc[b][t] + 50.0 * beta * 0.5;
        }
        objective += (-beta) * vars.soc[b][horizon] + 100.0 * beta;
    }
    objective
}

/// The node a bus occupies at `t = 0`, derived from its status. `None` leaves the initial
/// position unconstrained (e.g. a stranded bus, or a bus whose position was pruned).
fn initial_node(
    bus: &Bus,
    routes: &BTreeMap<String, Route>,
    graph: &FlowGraph,
) -> Option<String> {
    match bus.status {
        BusStatus::OnRoute if bus.current_stop_index > 0 => {
            let route = routes.get(bus.current_route.as_deref()?)?;
            let prev = route.stop_at(bus.current_stop_index - 1)?;
            graph
                .contains(&prev.stop_id)
                .then(|| prev.stop_id.clone())
        }
        BusStatus::InDepot | BusStatus::Idle | BusStatus::ReturningToDepot => {
            let id = depot_node_id(&bus.depot);
            graph.contains(&id).then_some(id)
        }
        BusStatus::Charging => {
            let station = &bus.charging.as_ref()?.station;
            graph
                .charger_ids()
                .iter()
                .find(|id| {
                    matches!(graph.node(id), Some(Node::Charger { name, .. }) if name == station)
                })
                .cloned()
        }
        _ => None,
    }
}

/// Create all constraints.
fn setup_constraints(
    model: &mut impl SolverModel,
    idx: &ModelIndex<'_>,
    vars: &MipVars,
    buses: &[Bus],
    routes: &BTreeMap<String, Route>,
    graph: &FlowGraph,
    config: &SimulationConfig,
    horizon: usize,
) {
    let n_nodes = idx.node_ids.len();

    for (b, bus) in buses.iter().enumerate() {
        // initial position
        if let Some(node) = initial_node(bus, routes, graph) {
            let s0 = idx.index_of[node.as_str()];
            model.add_constraint(constraint!(vars.x[b][s0][0] == 1.0));
            for s in 0..n_nodes {
                if s != s0 {
                    model.add_constraint(constraint!(vars.x[b][s][0] == 0.0));
                }
            }
        }

        // initial SoC
        model.add_constraint(constraint!(vars.soc[b][0] == bus.soc()));

        let drain_per_km = config.soc_percent_per_km(bus.battery_capacity_kwh);
        for t in 0..horizon {
            // flow conservation: leave (or charge at) the occupied node ...
            for s in 0..n_nodes {
                let mut outgoing: Expression = idx.out_edges[s]
                    .iter()
                    .map(|&e| Expression::from(vars.y[b][e][t]))
                    .sum();
                if let Some(&c) = idx.charger_pos.get(&s) {
                    outgoing += vars.charge[b][c][t];
                }
                model.add_constraint(constraint!(outgoing == vars.x[b][s][t]));

                // ... and arrive where a traversal ends
                let incoming: Expression = idx.in_edges[s]
                    .iter()
                    .map(|&e| Expression::from(vars.y[b][e][t]))
                    .sum();
                model.add_constraint(constraint!(vars.x[b][s][t + 1] == incoming));
            }

            // SoC dynamics per minute
            let discharge: Expression = idx
                .edges
                .iter()
                .enumerate()
                .map(|(e, _)| (idx.edge_km[e] * drain_per_km) * vars.y[b][e][t])
                .sum();
            let gain: Expression = idx
                .chargers
                .iter()
                .enumerate()
                .map(|(c, &(_, capacity_kw, _))| {
                    let per_minute = capacity_kw / 60.0 * (100.0 / bus.battery_capacity_kwh);
                    per_minute * vars.charge[b][c][t]
                })
                .sum();
            let balance = Expression::from(vars.soc[b][t]) - discharge + gain;
            model.add_constraint(constraint!(vars.soc[b][t + 1] == balance));
        }

        // never visit a disrupted stop (they are pruned from the graph, so this only fires for
        // ids that survived as nodes)
        for stop_id in graph.disrupted_stop_ids() {
            if let Some(&s) = idx.index_of.get(stop_id.as_str()) {
                let visits: Expression = (0..=horizon)
                    .map(|t| Expression::from(vars.x[b][s][t]))
                    .sum();
                model.add_constraint(constraint!(visits == 0.0));
            }
        }
    }

    // demand-served indicator, with the exact visit bound as big-M
    let big_m = (buses.len() * (horizon + 1)) as f64;
    for (pos, &(s, _)) in idx.stops.iter().enumerate() {
        let mut visits = Expression::from(0.0);
        for b in 0..buses.len() {
            for t in 0..=horizon {
                visits += vars.x[b][s][t];
            }
        }
        model.add_constraint(constraint!(visits.clone() <= big_m * vars.served[pos]));
        model.add_constraint(constraint!(visits >= vars.served[pos]));
    }

    // charger capacity per minute
    for (c, &(_, _, slots)) in idx.chargers.iter().enumerate() {
        for t in 0..=horizon {
            let occupancy: Expression = (0..buses.len())
                .map(|b| Expression::from(vars.charge[b][c][t]))
                .sum();
            model.add_constraint(constraint!(occupancy <= slots as f64));
        }
    }
}

/// Extract the immediate decision of one bus: a `t = 0` charge if present, otherwise the target
/// of the `t = 0` traversal, classified by node kind.
fn extract_decision(
    solution: &impl Solution,
    idx: &ModelIndex<'_>,
    vars: &MipVars,
    graph: &FlowGraph,
    b: usize,
) -> Option<MipDecision> {
    for (c, &(s, _, _)) in idx.chargers.iter().enumerate() {
        if solution.value(vars.charge[b][c][0]) > 0.5 {
            return Some(MipDecision::Charge {
                station_id: idx.node_ids[s].to_string(),
            });
        }
    }
    for (e, &(_, to)) in idx.edges.iter().enumerate() {
        if solution.value(vars.y[b][e][0]) > 0.5 {
            let target = idx.node_ids[to];
            return Some(match graph.node(target) {
                Some(Node::Depot { .. }) => MipDecision::ReturnDepot,
                Some(Node::Charger { .. }) => MipDecision::Charge {
                    station_id: target.to_string(),
                },
                _ => MipDecision::Move {
                    target_node_id: target.to_string(),
                },
            });
        }
    }
    None
}

/// Run one rolling-horizon optimization over the current network state and return one immediate
/// action per bus. Any solver failure degrades to an empty decision map; the simulation never
/// stops here.
pub fn optimize_network(
    buses: &[Bus],
    routes: &BTreeMap<String, Route>,
    stations: &[ChargingStation],
    depots: &BTreeMap<String, Depot>,
    disruptions: &[DisruptionEvent],
    now: f64,
    config: &SimulationConfig,
) -> MipOutcome {
    info!(
        "[t={now}] Rolling-horizon optimization with {} active disruptions",
        disruptions.len()
    );

    let graph = build_flow_graph(routes, stations, depots, disruptions);
    if graph.node_count() == 0 || buses.is_empty() {
        debug!("Nothing to optimize (no nodes or no buses)");
        return MipOutcome::empty(graph, SolveStatus::Skipped);
    }

    let distances = distance_matrix(graph.nodes(), &graph.edge_set(), &config.cache_dir);
    let idx = ModelIndex::new(&graph, &distances);
    let horizon = config.mip.horizon_minutes;
    debug!(
        "Model over {} buses, {} nodes, {} edges",
        buses.len(),
        idx.node_ids.len(),
        idx.edges.len()
    );

    // variables and objective
    let mut pb = ProblemVariables::new();
    let vars = setup_vars(&mut pb, &idx, buses.len(), horizon);
    let objective = objective(&idx, &vars, buses, config, !disruptions.is_empty(), horizon);

    // build the cbc problem
    let mut model = create_solver(pb.minimise(objective));
    CbcSettings::from_config(&config.mip).apply(&mut model);

    setup_constraints(
        &mut model, &idx, &vars, buses, routes, &graph, config, horizon,
    );

    let inner = model.as_inner();
    let size = ProblemSize {
        rows: inner.num_rows() as usize,
        cols: inner.num_cols() as usize,
        horizon,
    };
    info!("Solving the MIP model of size {size}...");

    let start = Instant::now();
    let solution = match model.solve() {
        Ok(solution) => solution,
        Err(e) => {
            let status = match e {
                ResolutionError::Infeasible => SolveStatus::Infeasible,
                ResolutionError::Unbounded => SolveStatus::Unbounded,
                _ => SolveStatus::Failed,
            };
            warn!("[t={now}] MIP solve failed ({e}); buses continue autonomously");
            return MipOutcome {
                solve_time: start.elapsed(),
                size,
                ..MipOutcome::empty(graph, status)
            };
        }
    };
    let solve_time = start.elapsed();

    let mut decisions = BTreeMap::new();
    for (b, bus) in buses.iter().enumerate() {
        if let Some(decision) = extract_decision(&solution, &idx, &vars, &graph, b) {
            decisions.insert(bus.bus_id.clone(), decision);
        }
    }
    info!(
        "[t={now}] MIP solved in {:.2}s, {} decisions",
        solve_time.as_secs_f64(),
        decisions.len()
    );

    MipOutcome {
        decisions,
        graph,
        status: SolveStatus::Solved,
        solve_time,
        size,
    }
}
