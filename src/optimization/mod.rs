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

//! Central optimization: the rolling-horizon network-flow MIP, its feasibility graph, the
//! persistent distance matrix, and the decision applier.

mod decision;
mod distance_cache;
mod graph;
mod mip;
mod solver;

pub(crate) use graph::charger_node_id;

pub use decision::apply_mip_decisions;
pub use distance_cache::{
    compute_and_cache_distances, distance_matrix, load_cached_distances, DistanceMatrix,
    CACHE_FILE_NAME,
};
pub use graph::{build_flow_graph, FlowGraph, Node};
pub use mip::{optimize_network, MipOutcome, ProblemSize, SolveStatus};
pub use solver::CbcSettings;

/// The immediate action the optimizer commits for one bus: the first move of its rolling-horizon
/// plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MipDecision {
    /// Start (or head to) a charging session at the given synthetic charger node.
    Charge {
        /// Synthetic charger node id (`CS_<name>_<index>`).
        station_id: String,
    },
    /// Return to the bus's own depot.
    ReturnDepot,
    /// Move to a node of the feasibility graph.
    Move {
        /// Target node id (a stop id, depot node, or charger node).
        target_node_id: String,
    },
}

impl std::fmt::Display for MipDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MipDecision::Charge { station_id } => write!(f, "charge at {station_id}"),
            MipDecision::ReturnDepot => write!(f, "return to depot"),
            MipDecision::Move { target_node_id } => write!(f, "move to {target_node_id}"),
        }
    }
}
