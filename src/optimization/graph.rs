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

//! The feasibility graph of the optimizer: stop, depot, and charger nodes, and the directed
//! edges a bus may traverse within one planning minute.
//!
//! Disrupted stops and non-operational stations are pruned at construction time, so the MIP can
//! never route a bus through them. The `y` traversal variables of the model exist only over the
//! edges of this graph.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::{graphmap::DiGraphMap, Direction};

use crate::model::{ChargingStation, Depot, DisruptionEvent, Location, Route, Stop};

/// A node of the feasibility graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A regular (non-disrupted) bus stop.
    Stop(Stop),
    /// A synthetic depot node.
    Depot {
        /// Name of the depot.
        name: String,
        /// Position of the depot.
        location: Location,
    },
    /// A synthetic node for one operational charging station, with the slot availability
    /// snapshot taken at graph construction.
    Charger {
        /// Name of the station.
        name: String,
        /// Position of the station.
        location: Location,
        /// Power per slot, in kW.
        capacity_kw: f64,
        /// Free slots at construction time.
        available_slots: u32,
    },
}

impl Node {
    /// Position of the node.
    pub fn location(&self) -> Location {
        match self {
            Node::Stop(stop) => stop.location,
            Node::Depot { location, .. } | Node::Charger { location, .. } => *location,
        }
    }

    /// Whether this is a regular stop node.
    pub fn is_stop(&self) -> bool {
        matches!(self, Node::Stop(_))
    }

    /// Passenger demand at the node (zero for depots and chargers).
    pub fn demand(&self) -> f64 {
        match self {
            Node::Stop(stop) => stop.demand,
            _ => 0.0,
        }
    }
}

/// Synthetic node id of a depot.
pub(crate) fn depot_node_id(name: &str) -> String {
    format!("Depot_{name}")
}

/// Synthetic node id of the station at `index` within the simulation's station list.
pub(crate) fn charger_node_id(name: &str, index: usize) -> String {
    format!("CS_{name}_{index}")
}

/// The feasibility graph: tagged nodes keyed by id plus the directed feasible edges.
#[derive(Debug)]
pub struct FlowGraph {
    /// All nodes by id.
    nodes: BTreeMap<String, Node>,
    /// Node ids by dense index; the index is the node weight inside `edges`.
    ids: Vec<String>,
    /// Dense index per node id.
    indices: BTreeMap<String, u32>,
    /// The directed feasible edges.
    edges: DiGraphMap<u32, ()>,
    /// Ids of all depot nodes, in insertion order.
    depot_ids: Vec<String>,
    /// Ids of all charger nodes, in insertion order.
    charger_ids: Vec<String>,
    /// Stops excluded from the graph by an active disruption.
    disrupted_stop_ids: BTreeSet<String>,
}

impl FlowGraph {
    /// Create an empty graph with the given disrupted stops.
    fn new(disrupted_stop_ids: BTreeSet<String>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            ids: Vec::new(),
            indices: BTreeMap::new(),
            edges: DiGraphMap::new(),
            depot_ids: Vec::new(),
            charger_ids: Vec::new(),
            disrupted_stop_ids,
        }
    }

    /// Insert a node unless the id is already present.
    fn add_node(&mut self, id: String, node: Node) {
        if self.indices.contains_key(&id) {
            return;
        }
        let index = self.ids.len() as u32;
        self.edges.add_node(index);
        self.indices.insert(id.clone(), index);
        self.ids.push(id.clone());
        self.nodes.insert(id, node);
    }

    /// Insert a directed edge between two existing nodes. Unknown endpoints are ignored.
    fn add_edge(&mut self, from: &str, to: &str) {
        if let (Some(&a), Some(&b)) = (self.indices.get(from), self.indices.get(to)) {
            self.edges.add_edge(a, b, ());
        }
    }

    /// All nodes by id.
    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Whether the graph contains a node with this id.
    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    /// Ids of all depot nodes.
    pub fn depot_ids(&self) -> &[String] {
        &self.depot_ids
    }

    /// Ids of all charger nodes.
    pub fn charger_ids(&self) -> &[String] {
        &self.charger_ids
    }

    /// Stops excluded from the graph by an active disruption.
    pub fn disrupted_stop_ids(&self) -> &BTreeSet<String> {
        &self.disrupted_stop_ids
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Number of feasible edges.
    pub fn edge_count(&self) -> usize {
        self.edges.edge_count()
    }

    /// All feasible edges as id pairs, in insertion order.
    pub fn edge_ids(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.edges
            .all_edges()
            .map(|(a, b, _)| (self.ids[a as usize].as_str(), self.ids[b as usize].as_str()))
    }

    /// Whether the directed edge `from -> to` is feasible.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.indices.get(from), self.indices.get(to)) {
            (Some(&a), Some(&b)) => self.edges.contains_edge(a, b),
            _ => false,
        }
    }

    /// Successors of a node.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &str> + '_ {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Predecessors of a node.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &str> + '_ {
        self.neighbors(id, Direction::Incoming)
    }

    /// Neighbors of a node in the given direction.
    fn neighbors(&self, id: &str, dir: Direction) -> impl Iterator<Item = &str> + '_ {
        self.indices
            .get(id)
            .into_iter()
            .flat_map(move |&index| self.edges.neighbors_directed(index, dir))
            .map(|n| self.ids[n as usize].as_str())
    }

    /// The edge set as owned id pairs, the key shape of the distance cache.
    pub fn edge_set(&self) -> BTreeSet<(String, String)> {
        self.edge_ids()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }
}

/// Build the feasibility graph from the current network and the active disruptions.
///
/// Nodes: every non-disrupted stop, one `Depot_<name>` per depot, one `CS_<name>_<index>` per
/// *operational* station (the index is the station's position in `stations`). Edges: consecutive
/// route stops, every non-charger node to every charger, every charger to every depot, every
/// depot to each route's first stop, and every stop to every depot.
pub fn build_flow_graph(
    routes: &BTreeMap<String, Route>,
    stations: &[ChargingStation],
    depots: &BTreeMap<String, Depot>,
    disruptions: &[DisruptionEvent],
) -> FlowGraph {
    let disrupted: BTreeSet<String> = disruptions
        .iter()
        .flat_map(|d| d.affected_stop_ids.iter().cloned())
        .collect();
    let mut graph = FlowGraph::new(disrupted);

    // regular stops, without the disrupted ones
    for route in routes.values() {
        for stop in route.stops() {
            if !graph.disrupted_stop_ids.contains(&stop.stop_id) {
                graph.add_node(stop.stop_id.clone(), Node::Stop(stop.clone()));
            }
        }
    }

    // depots
    for depot in depots.values() {
        let id = depot_node_id(&depot.name);
        graph.add_node(
            id.clone(),
            Node::Depot {
                name: depot.name.clone(),
                location: depot.location,
            },
        );
        graph.depot_ids.push(id);
    }

    // operational charging stations
    for (index, station) in stations.iter().enumerate() {
        if !station.operational() {
            continue;
        }
        let id = charger_node_id(&station.name, index);
        graph.add_node(
            id.clone(),
            Node::Charger {
                name: station.name.clone(),
                location: station.location,
                capacity_kw: station.capacity_kw,
                available_slots: station.available_slots(),
            },
        );
        graph.charger_ids.push(id);
    }

    let depot_ids = graph.depot_ids.clone();
    let charger_ids = graph.charger_ids.clone();

    // consecutive route stops (endpoints removed by disruptions drop the edge)
    for route in routes.values() {
        for segment in route.segments() {
            graph.add_edge(&segment.from_stop, &segment.to_stop);
        }
    }

    // every non-charger node -> every charger
    let non_chargers: Vec<String> = graph
        .nodes
        .iter()
        .filter(|(_, n)| !matches!(n, Node::Charger { .. }))
        .map(|(id, _)| id.clone())
        .collect();
    for from in &non_chargers {
        for to in &charger_ids {
            graph.add_edge(from, to);
        }
    }

    // every charger -> every depot
    for from in &charger_ids {
        for to in &depot_ids {
            graph.add_edge(from, to);
        }
    }

    // every depot -> each route's first stop
    for route in routes.values() {
        if let Some(first) = route.first_stop() {
            let first = first.stop_id.clone();
            for from in &depot_ids {
                graph.add_edge(from, &first);
            }
        }
    }

    // every regular stop -> every depot (early return)
    let stop_ids: Vec<String> = graph
        .nodes
        .iter()
        .filter(|(_, n)| n.is_stop())
        .map(|(id, _)| id.clone())
        .collect();
    for from in &stop_ids {
        for to in &depot_ids {
            graph.add_edge(from, to);
        }
    }

    graph
}
