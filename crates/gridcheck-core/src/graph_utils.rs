use crate::model::NetworkCase;
use crate::{BusNumber, BusType};
use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{HashMap, HashSet, VecDeque};

/// One energised island of the in-service topology.
#[derive(Debug, Clone)]
pub struct IslandSummary {
    pub island_id: usize,
    pub bus_count: usize,
    /// Whether the island contains a swing (reference) bus.
    pub has_swing: bool,
}

/// Bus to island assignment.
#[derive(Debug, Clone)]
pub struct BusAssignment {
    pub bus: BusNumber,
    pub island_id: usize,
}

/// Aggregated island analysis result.
#[derive(Debug, Clone)]
pub struct IslandAnalysis {
    pub islands: Vec<IslandSummary>,
    pub assignments: Vec<BusAssignment>,
}

impl IslandAnalysis {
    /// Buses in islands without a reference bus, ascending.
    pub fn unsupplied_buses(&self) -> Vec<BusNumber> {
        let dead: HashSet<usize> = self
            .islands
            .iter()
            .filter(|island| !island.has_swing)
            .map(|island| island.island_id)
            .collect();
        let mut buses: Vec<BusNumber> = self
            .assignments
            .iter()
            .filter(|assignment| dead.contains(&assignment.island_id))
            .map(|assignment| assignment.bus)
            .collect();
        buses.sort();
        buses
    }

    pub fn island_count(&self) -> usize {
        self.islands.len()
    }
}

/// Builds the in-service topology: buses not isolated, connected by in-service
/// circuits, two-winding transformers and three-winding transformers (star
/// windings joined pairwise).
pub fn build_topology(case: &NetworkCase) -> (UnGraph<BusNumber, ()>, HashMap<BusNumber, NodeIndex>) {
    let mut graph = UnGraph::new_undirected();
    let mut index = HashMap::new();
    for bus in case.buses.iter().filter(|bus| bus.bus_type.in_service()) {
        index.insert(bus.number, graph.add_node(bus.number));
    }

    let mut connect = |a: BusNumber, b: BusNumber| {
        if let (Some(&na), Some(&nb)) = (index.get(&a), index.get(&b)) {
            graph.add_edge(na, nb, ());
        }
    };

    for branch in case.branches.iter().filter(|b| b.status.is_in_service()) {
        connect(branch.from, branch.to);
    }
    for tx in case.transformers_2w.iter().filter(|t| t.status.is_in_service()) {
        connect(tx.from, tx.to);
    }
    for tx in case.transformers_3w.iter().filter(|t| t.status.is_in_service()) {
        connect(tx.wind1, tx.wind2);
        connect(tx.wind2, tx.wind3);
    }

    (graph, index)
}

/// Labels connected components of the in-service topology (breadth-first
/// search) and flags the ones carrying a swing bus.
pub fn find_islands(case: &NetworkCase) -> IslandAnalysis {
    let (graph, _) = build_topology(case);
    let swings: HashSet<BusNumber> = case
        .buses
        .iter()
        .filter(|bus| bus.bus_type == BusType::Swing)
        .map(|bus| bus.number)
        .collect();

    let mut visited = HashSet::new();
    let mut islands = Vec::new();
    let mut assignments = Vec::new();
    let mut island_id = 0;
    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        let mut queue = VecDeque::new();
        queue.push_back(start);
        let mut members = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            members.push(node);
            for neighbor in graph.neighbors(node) {
                if !visited.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        if members.is_empty() {
            continue;
        }
        let has_swing = members.iter().any(|node| swings.contains(&graph[*node]));
        islands.push(IslandSummary {
            island_id,
            bus_count: members.len(),
            has_swing,
        });
        for node in members {
            assignments.push(BusAssignment {
                bus: graph[node],
                island_id,
            });
        }
        island_id += 1;
    }
    debug_assert_eq!(islands.len(), connected_components(&graph));
    assignments.sort_by_key(|assignment| assignment.bus);
    IslandAnalysis {
        islands,
        assignments,
    }
}
