//! Mixer channel graph: a DAG of send edges between channels, with a cached topological order.
//!
//! Deviation from the teacher: `rf-engine::graph::AudioGraph` discovers cycles during its DFS
//! topo-sort and silently drops the offending node from the processing order. Here, `connect`
//! proactively rejects any edge that would create a cycle and returns an error, so the mixer
//! graph is guaranteed acyclic at all times and no send is ever silently dropped.

use std::collections::{HashMap, HashSet};

use ae_core::{ChannelId, EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Edge {
    from: ChannelId,
    to: ChannelId,
}

/// Directed acyclic graph of channel routing edges (sends and the channel->bus/master chain).
pub struct ChannelGraph {
    nodes: HashSet<ChannelId>,
    edges: Vec<Edge>,
    topo_order: Vec<ChannelId>,
    dirty: bool,
}

impl ChannelGraph {
    pub fn new() -> Self {
        Self { nodes: HashSet::new(), edges: Vec::new(), topo_order: Vec::new(), dirty: true }
    }

    pub fn add_node(&mut self, id: ChannelId) {
        if self.nodes.insert(id) {
            self.dirty = true;
        }
    }

    pub fn remove_node(&mut self, id: ChannelId) {
        if self.nodes.remove(&id) {
            self.edges.retain(|e| e.from != id && e.to != id);
            self.dirty = true;
        }
    }

    /// Would adding an edge `from -> to` create a cycle, given the edges already present?
    fn would_cycle(&self, from: ChannelId, to: ChannelId) -> bool {
        if from == to {
            return true;
        }
        // reachable(to, from): if `to` can already reach `from`, adding from->to closes a cycle.
        let mut stack = vec![to];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            for edge in &self.edges {
                if edge.from == current {
                    stack.push(edge.to);
                }
            }
        }
        false
    }

    /// Connect `from -> to` (audio flows from `from` into `to`). Rejects the edge outright if it
    /// would create a cycle; never silently drops a connection.
    pub fn connect(&mut self, from: ChannelId, to: ChannelId) -> EngineResult<()> {
        if !self.nodes.contains(&from) {
            return Err(EngineError::UnknownChannel(from));
        }
        if !self.nodes.contains(&to) {
            return Err(EngineError::UnknownChannel(to));
        }
        if self.edges.iter().any(|e| e.from == from && e.to == to) {
            return Ok(());
        }
        if self.would_cycle(from, to) {
            return Err(EngineError::Cyclic);
        }
        self.edges.push(Edge { from, to });
        self.dirty = true;
        Ok(())
    }

    pub fn disconnect(&mut self, from: ChannelId, to: ChannelId) {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.from == from && e.to == to));
        if self.edges.len() != before {
            self.dirty = true;
        }
    }

    pub fn upstream_of(&self, to: ChannelId) -> impl Iterator<Item = ChannelId> + '_ {
        self.edges.iter().filter(move |e| e.to == to).map(|e| e.from)
    }

    fn rebuild_topo_order(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited: HashMap<ChannelId, bool> = HashMap::new();

        let mut ids: Vec<ChannelId> = self.nodes.iter().copied().collect();
        ids.sort_by_key(|c| c.0);

        for id in ids {
            if !visited.get(&id).copied().unwrap_or(false) {
                self.visit(id, &mut visited, &mut order);
            }
        }
        order.reverse();
        self.topo_order = order;
        self.dirty = false;
    }

    fn visit(&self, id: ChannelId, visited: &mut HashMap<ChannelId, bool>, order: &mut Vec<ChannelId>) {
        visited.insert(id, true);
        for edge in &self.edges {
            if edge.from == id && !visited.get(&edge.to).copied().unwrap_or(false) {
                self.visit(edge.to, visited, order);
            }
        }
        order.push(id);
    }

    /// Processing order: upstream channels (sources/tracks) before their downstream sends/buses.
    pub fn processing_order(&mut self) -> &[ChannelId] {
        if self.dirty {
            self.rebuild_topo_order();
        }
        &self.topo_order
    }
}

impl Default for ChannelGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_orders_upstream_first() {
        let mut graph = ChannelGraph::new();
        let (a, b, c) = (ChannelId(1), ChannelId(2), ChannelId(3));
        graph.add_node(a);
        graph.add_node(b);
        graph.add_node(c);
        graph.connect(a, b).unwrap();
        graph.connect(b, c).unwrap();

        let order = graph.processing_order();
        let pos = |id: ChannelId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn cycle_is_rejected_not_silently_dropped() {
        let mut graph = ChannelGraph::new();
        let (a, b) = (ChannelId(1), ChannelId(2));
        graph.add_node(a);
        graph.add_node(b);
        graph.connect(a, b).unwrap();
        let result = graph.connect(b, a);
        assert!(matches!(result, Err(EngineError::Cyclic)));
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut graph = ChannelGraph::new();
        let a = ChannelId(1);
        graph.add_node(a);
        assert!(matches!(graph.connect(a, a), Err(EngineError::Cyclic)));
    }
}
