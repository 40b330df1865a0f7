//! Topology graph: who may talk to whom.
//!
//! Nodes are agent ids; edges carry weights. The graph is directed or
//! undirected per construction, and the invariant maintained by the
//! simulation is that the node set always equals its agent set.
//!
//! Routing modes: `direct_only` (an edge must exist), `multi_hop` (any path),
//! `broadcast` (topology ignored).

mod build;
mod metrics;

pub use build::{build_topology, TopologySpec, TopologyType};
pub use metrics::{CentralityMeasure, CentralityMetrics, TopologyMetrics};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use thiserror::Error;

/// Topology construction/query failures.
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("unknown topology type: {0}")]
    UnknownType(String),
    #[error("invalid topology parameter: {0}")]
    InvalidParameter(String),
    #[error("agent not in topology: {0}")]
    MissingAgent(String),
}

/// Message routing policy applied on top of the graph.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    #[serde(rename = "direct")]
    DirectOnly,
    MultiHop,
    #[default]
    Broadcast,
}

/// Labeled graph over agent ids.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopologyGraph {
    directed: bool,
    topology_type: String,
    /// Out-adjacency; undirected graphs store both directions.
    adjacency: BTreeMap<String, BTreeMap<String, f64>>,
}

impl TopologyGraph {
    pub fn new(directed: bool, topology_type: impl Into<String>) -> Self {
        Self {
            directed,
            topology_type: topology_type.into(),
            adjacency: BTreeMap::new(),
        }
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    pub fn topology_type(&self) -> &str {
        &self.topology_type
    }

    pub fn add_node(&mut self, agent_id: impl Into<String>) {
        self.adjacency.entry(agent_id.into()).or_default();
    }

    pub fn remove_node(&mut self, agent_id: &str) {
        self.adjacency.remove(agent_id);
        for neighbors in self.adjacency.values_mut() {
            neighbors.remove(agent_id);
        }
    }

    pub fn add_edge(&mut self, a: impl Into<String>, b: impl Into<String>, weight: f64) {
        let a = a.into();
        let b = b.into();
        if a == b {
            return;
        }
        self.adjacency
            .entry(a.clone())
            .or_default()
            .insert(b.clone(), weight);
        self.adjacency.entry(b.clone()).or_default();
        if !self.directed {
            self.adjacency.entry(b).or_default().insert(a, weight);
        }
    }

    pub fn remove_edge(&mut self, a: &str, b: &str) {
        if let Some(neighbors) = self.adjacency.get_mut(a) {
            neighbors.remove(b);
        }
        if !self.directed {
            if let Some(neighbors) = self.adjacency.get_mut(b) {
                neighbors.remove(a);
            }
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.adjacency.contains_key(agent_id)
    }

    pub fn nodes(&self) -> Vec<String> {
        self.adjacency.keys().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Unique edges: one entry per undirected pair, or per directed edge.
    pub fn edges(&self) -> Vec<(String, String, f64)> {
        let mut edges = Vec::new();
        for (source, neighbors) in &self.adjacency {
            for (target, weight) in neighbors {
                if self.directed || source < target {
                    edges.push((source.clone(), target.clone(), *weight));
                }
            }
        }
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges().len()
    }

    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        self.adjacency
            .get(a)
            .map(|neighbors| neighbors.contains_key(b))
            .unwrap_or(false)
    }

    /// Direct neighbors (out-neighbors for directed graphs), sorted.
    pub fn neighbors(&self, agent_id: &str) -> Vec<String> {
        self.adjacency
            .get(agent_id)
            .map(|neighbors| neighbors.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any path exists from `src` to `dst`.
    pub fn can_reach(&self, src: &str, dst: &str) -> bool {
        if !self.contains(src) || !self.contains(dst) {
            return false;
        }
        if src == dst {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([src.to_string()]);
        visited.insert(src.to_string());
        while let Some(node) = queue.pop_front() {
            for neighbor in self.neighbors(&node) {
                if neighbor == dst {
                    return true;
                }
                if visited.insert(neighbor.clone()) {
                    queue.push_back(neighbor);
                }
            }
        }
        false
    }

    /// Shortest (unweighted) path, endpoints included; None when unreachable.
    pub fn shortest_path(&self, src: &str, dst: &str) -> Option<Vec<String>> {
        if !self.contains(src) || !self.contains(dst) {
            return None;
        }
        if src == dst {
            return Some(vec![src.to_string()]);
        }
        let mut parents: HashMap<String, String> = HashMap::new();
        let mut queue = VecDeque::from([src.to_string()]);
        let mut visited = BTreeSet::from([src.to_string()]);
        while let Some(node) = queue.pop_front() {
            for neighbor in self.neighbors(&node) {
                if visited.insert(neighbor.clone()) {
                    parents.insert(neighbor.clone(), node.clone());
                    if neighbor == dst {
                        let mut path = vec![dst.to_string()];
                        let mut cursor = dst.to_string();
                        while let Some(parent) = parents.get(&cursor) {
                            path.push(parent.clone());
                            cursor = parent.clone();
                        }
                        path.reverse();
                        return Some(path);
                    }
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }

    /// All nodes within `hops` of `src` (excluding `src`), sorted.
    pub fn neighborhood(&self, src: &str, hops: usize) -> Vec<String> {
        if !self.contains(src) || hops == 0 {
            return Vec::new();
        }
        let mut distances: BTreeMap<String, usize> = BTreeMap::new();
        let mut queue = VecDeque::from([(src.to_string(), 0_usize)]);
        distances.insert(src.to_string(), 0);
        while let Some((node, distance)) = queue.pop_front() {
            if distance == hops {
                continue;
            }
            for neighbor in self.neighbors(&node) {
                if !distances.contains_key(&neighbor) {
                    distances.insert(neighbor.clone(), distance + 1);
                    queue.push_back((neighbor, distance + 1));
                }
            }
        }
        distances.remove(src);
        distances.into_keys().collect()
    }

    /// Whether `src` may address `dst` under the routing mode.
    pub fn can_send(&self, src: &str, dst: &str, mode: RoutingMode) -> bool {
        if src == dst {
            return false;
        }
        match mode {
            RoutingMode::Broadcast => self.contains(src) && self.contains(dst),
            RoutingMode::DirectOnly => self.has_edge(src, dst),
            RoutingMode::MultiHop => self.can_reach(src, dst),
        }
    }

    /// Every agent `src` may address under the routing mode, sorted.
    pub fn valid_recipients(&self, src: &str, mode: RoutingMode) -> Vec<String> {
        self.nodes()
            .into_iter()
            .filter(|dst| dst != src && self.can_send(src, dst, mode))
            .collect()
    }

    /// BFS order from `start` (sorted neighbor expansion); nodes not reached
    /// are appended in sorted order.
    pub fn bfs_order(&self, start: &str) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        if self.contains(start) {
            let mut queue = VecDeque::from([start.to_string()]);
            visited.insert(start.to_string());
            while let Some(node) = queue.pop_front() {
                order.push(node.clone());
                for neighbor in self.neighbors(&node) {
                    if visited.insert(neighbor.clone()) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        for node in self.nodes() {
            if !visited.contains(&node) {
                order.push(node);
            }
        }
        order
    }

    /// Connected components on the undirected view (weak components for
    /// directed graphs), largest first.
    pub fn components(&self) -> Vec<Vec<String>> {
        let undirected = self.undirected_view();
        let mut remaining: BTreeSet<String> = undirected.adjacency.keys().cloned().collect();
        let mut components = Vec::new();
        while let Some(seed) = remaining.iter().next().cloned() {
            let mut component = Vec::new();
            let mut queue = VecDeque::from([seed.clone()]);
            remaining.remove(&seed);
            while let Some(node) = queue.pop_front() {
                component.push(node.clone());
                for neighbor in undirected.neighbors(&node) {
                    if remaining.remove(&neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
            component.sort();
            components.push(component);
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }

    /// Undirected copy (identity for undirected graphs).
    pub fn undirected_view(&self) -> TopologyGraph {
        if !self.directed {
            return self.clone();
        }
        let mut view = TopologyGraph::new(false, self.topology_type.clone());
        for node in self.nodes() {
            view.add_node(node);
        }
        for (a, b, weight) in self.edges() {
            view.add_edge(a, b, weight);
        }
        view
    }

    /// Serializes as `{type, directed, nodes, edges}`.
    pub fn to_value(&self) -> Value {
        json!({
            "type": self.topology_type,
            "directed": self.directed,
            "nodes": self.nodes(),
            "edges": self
                .edges()
                .into_iter()
                .map(|(source, target, weight)| json!({
                    "source": source,
                    "target": target,
                    "weight": weight,
                }))
                .collect::<Vec<_>>(),
        })
    }

    /// Rebuilds a graph from [`Self::to_value`] output.
    pub fn from_value(value: &Value) -> Result<Self, TopologyError> {
        let directed = value["directed"].as_bool().unwrap_or(false);
        let topology_type = value["type"].as_str().unwrap_or("custom").to_string();
        let mut graph = TopologyGraph::new(directed, topology_type);
        for node in value["nodes"].as_array().into_iter().flatten() {
            if let Some(id) = node.as_str() {
                graph.add_node(id);
            }
        }
        for edge in value["edges"].as_array().into_iter().flatten() {
            let source = edge["source"].as_str().ok_or_else(|| {
                TopologyError::InvalidParameter("edge missing source".into())
            })?;
            let target = edge["target"].as_str().ok_or_else(|| {
                TopologyError::InvalidParameter("edge missing target".into())
            })?;
            let weight = edge["weight"].as_f64().unwrap_or(1.0);
            graph.add_edge(source, target, weight);
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_plus_isolate() -> TopologyGraph {
        let mut graph = TopologyGraph::new(false, "custom");
        for node in ["a", "b", "c", "d"] {
            graph.add_node(node);
        }
        graph.add_edge("a", "b", 1.0);
        graph.add_edge("b", "c", 1.0);
        graph.add_edge("a", "c", 1.0);
        graph
    }

    /// **Scenario**: routing modes differ on the same graph.
    #[test]
    fn routing_modes() {
        let mut graph = TopologyGraph::new(false, "custom");
        for node in ["hub", "s1", "s2"] {
            graph.add_node(node);
        }
        graph.add_edge("hub", "s1", 1.0);
        graph.add_edge("hub", "s2", 1.0);

        assert_eq!(
            graph.valid_recipients("s1", RoutingMode::DirectOnly),
            vec!["hub".to_string()]
        );
        assert_eq!(
            graph.valid_recipients("s1", RoutingMode::MultiHop),
            vec!["hub".to_string(), "s2".to_string()]
        );
        assert_eq!(
            graph.valid_recipients("s1", RoutingMode::Broadcast),
            vec!["hub".to_string(), "s2".to_string()]
        );
    }

    /// **Scenario**: removing a node removes its incident edges.
    #[test]
    fn remove_node_cleans_edges() {
        let mut graph = triangle_plus_isolate();
        graph.remove_node("b");
        assert!(!graph.contains("b"));
        assert!(!graph.has_edge("a", "b"));
        assert_eq!(graph.edge_count(), 1); // only a—c remains
    }

    /// **Scenario**: shortest paths include both endpoints; unreachable is
    /// None.
    #[test]
    fn shortest_paths() {
        let graph = triangle_plus_isolate();
        assert_eq!(
            graph.shortest_path("a", "c"),
            Some(vec!["a".to_string(), "c".to_string()])
        );
        assert_eq!(graph.shortest_path("a", "d"), None);
        assert_eq!(graph.shortest_path("a", "a"), Some(vec!["a".to_string()]));
    }

    /// **Scenario**: neighborhood respects the hop bound.
    #[test]
    fn neighborhood_hops() {
        let mut graph = TopologyGraph::new(false, "custom");
        for node in ["a", "b", "c", "d"] {
            graph.add_node(node);
        }
        graph.add_edge("a", "b", 1.0);
        graph.add_edge("b", "c", 1.0);
        graph.add_edge("c", "d", 1.0);

        assert_eq!(graph.neighborhood("a", 1), vec!["b".to_string()]);
        assert_eq!(
            graph.neighborhood("a", 2),
            vec!["b".to_string(), "c".to_string()]
        );
        assert!(graph.neighborhood("a", 0).is_empty());
    }

    /// **Scenario**: components come back largest first.
    #[test]
    fn components_largest_first() {
        let graph = triangle_plus_isolate();
        let components = graph.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].len(), 3);
        assert_eq!(components[1], vec!["d".to_string()]);
    }

    /// **Scenario**: serialization round-trips type, direction, and weights.
    #[test]
    fn value_roundtrip() {
        let mut graph = TopologyGraph::new(true, "custom");
        graph.add_node("x");
        graph.add_node("y");
        graph.add_edge("x", "y", 2.5);

        let value = graph.to_value();
        let back = TopologyGraph::from_value(&value).unwrap();
        assert_eq!(back, graph);
    }
}
