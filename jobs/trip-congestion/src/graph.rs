use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

pub type NodeId = u64;

#[derive(PartialEq)]
struct HeapEntry {
    node: NodeId,
    cost: f64,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &HeapEntry) -> Ordering {
        // Reversed so the BinaryHeap pops the cheapest entry first.
        other.cost.total_cmp(&self.cost)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &HeapEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Road network as a travel-time-weighted adjacency list. Built once at
/// worker startup and only read afterwards.
#[derive(Debug, Default, Clone)]
pub struct RoadGraph {
    edges_out: HashMap<NodeId, Vec<(NodeId, f64)>>,
}

impl RoadGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (NodeId, NodeId, f64)>) -> Self {
        let mut graph = Self::new();
        for (from, to, minutes) in edges {
            graph.add_edge(from, to, minutes);
        }
        graph
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, minutes: f64) {
        self.edges_out.entry(from).or_default().push((to, minutes));
        self.edges_out.entry(to).or_default();
    }

    pub fn is_empty(&self) -> bool {
        self.edges_out.is_empty()
    }

    pub fn edge_minutes(&self, from: NodeId, to: NodeId) -> Option<f64> {
        self.edges_out
            .get(&from)?
            .iter()
            .find(|(n, _)| *n == to)
            .map(|(_, minutes)| *minutes)
    }

    /// Cheapest-travel-time path from `from` to `to`, endpoints included.
    /// `None` when `to` is unreachable or either node is unknown.
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        if !self.edges_out.contains_key(&from) || !self.edges_out.contains_key(&to) {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }

        let mut best: HashMap<NodeId, f64> = HashMap::new();
        let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
        let mut heap = BinaryHeap::new();
        best.insert(from, 0.0);
        heap.push(HeapEntry {
            node: from,
            cost: 0.0,
        });

        while let Some(HeapEntry { node, cost }) = heap.pop() {
            if node == to {
                return Some(backtrack(&prev, from, to));
            }
            if best.get(&node).is_some_and(|&b| cost > b) {
                continue;
            }
            let Some(neighbours) = self.edges_out.get(&node) else {
                continue;
            };
            for &(next, minutes) in neighbours {
                let next_cost = cost + minutes;
                if best.get(&next).is_none_or(|&b| next_cost < b) {
                    best.insert(next, next_cost);
                    prev.insert(next, node);
                    heap.push(HeapEntry {
                        node: next,
                        cost: next_cost,
                    });
                }
            }
        }
        None
    }
}

fn backtrack(prev: &HashMap<NodeId, NodeId>, from: NodeId, to: NodeId) -> Vec<NodeId> {
    let mut path = vec![to];
    let mut cursor = to;
    while cursor != from {
        match prev.get(&cursor) {
            Some(&p) => {
                path.push(p);
                cursor = p;
            }
            None => break,
        }
    }
    path.reverse();
    path
}
