//! Network metrics and centrality for topology graphs.
//!
//! Path-based metrics (diameter, average path length) fall back to the
//! largest connected component when the graph is disconnected. Eigenvector
//! centrality uses power iteration and reports as absent when it fails to
//! converge.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::topology::TopologyGraph;

/// Aggregate structure metrics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TopologyMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub is_connected: bool,
    pub clustering_coefficient: Option<f64>,
    pub avg_path_length: Option<f64>,
    pub diameter: Option<usize>,
    pub degree_distribution: BTreeMap<String, usize>,
}

/// Per-node centrality scores. `eigenvector` is None when power iteration
/// did not converge.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CentralityMetrics {
    pub degree: BTreeMap<String, f64>,
    pub betweenness: BTreeMap<String, f64>,
    pub closeness: BTreeMap<String, f64>,
    pub eigenvector: Option<BTreeMap<String, f64>>,
}

/// Which centrality a caller ranks by.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CentralityMeasure {
    Degree,
    Betweenness,
    Closeness,
    Eigenvector,
}

impl TopologyGraph {
    /// Computes the aggregate metrics.
    pub fn metrics(&self) -> TopologyMetrics {
        let n = self.node_count();
        let m = self.edge_count();

        let density = if n < 2 {
            0.0
        } else if self.is_directed() {
            m as f64 / (n as f64 * (n as f64 - 1.0))
        } else {
            m as f64 / (n as f64 * (n as f64 - 1.0) / 2.0)
        };

        let components = self.components();
        let is_connected = n == 0 || components.len() == 1;

        let mut degree_distribution = BTreeMap::new();
        let undirected = self.undirected_view();
        for node in self.nodes() {
            degree_distribution.insert(node.clone(), undirected.neighbors(&node).len());
        }

        let mut metrics = TopologyMetrics {
            node_count: n,
            edge_count: m,
            density,
            is_connected,
            clustering_coefficient: None,
            avg_path_length: None,
            diameter: None,
            degree_distribution,
        };

        if n > 1 {
            metrics.clustering_coefficient = Some(average_clustering(&undirected));

            // Disconnected graphs measure paths on the largest component.
            let scope: Vec<String> = if is_connected {
                self.nodes()
            } else {
                components.first().cloned().unwrap_or_default()
            };
            if scope.len() > 1 {
                let (avg, diameter) = path_metrics(&undirected, &scope);
                metrics.avg_path_length = avg;
                metrics.diameter = diameter;
            }
        }

        metrics
    }

    /// Computes degree, betweenness, closeness, and (when it converges)
    /// eigenvector centrality.
    pub fn centrality(&self) -> CentralityMetrics {
        let nodes = self.nodes();
        let n = nodes.len();
        if n == 0 {
            return CentralityMetrics::default();
        }

        let undirected = self.undirected_view();
        let scale = if n > 1 { (n - 1) as f64 } else { 1.0 };

        let degree: BTreeMap<String, f64> = nodes
            .iter()
            .map(|node| (node.clone(), undirected.neighbors(node).len() as f64 / scale))
            .collect();

        let closeness = closeness_centrality(&undirected, &nodes);
        let betweenness = betweenness_centrality(&undirected, &nodes);
        let eigenvector = eigenvector_centrality(&undirected, &nodes, 1000, 1e-6);

        CentralityMetrics {
            degree,
            betweenness,
            closeness,
            eigenvector,
        }
    }

    /// The k most central nodes under the measure, descending, id tiebreak.
    pub fn most_central(&self, measure: CentralityMeasure, k: usize) -> Vec<String> {
        let centrality = self.centrality();
        let scores: BTreeMap<String, f64> = match measure {
            CentralityMeasure::Degree => centrality.degree,
            CentralityMeasure::Betweenness => centrality.betweenness,
            CentralityMeasure::Closeness => centrality.closeness,
            CentralityMeasure::Eigenvector => centrality.eigenvector.unwrap_or_default(),
        };
        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|(ida, a), (idb, b)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ida.cmp(idb))
        });
        ranked.into_iter().take(k).map(|(id, _)| id).collect()
    }
}

/// BFS distances from one source, over the undirected view.
fn bfs_distances(graph: &TopologyGraph, source: &str) -> HashMap<String, usize> {
    let mut distances = HashMap::new();
    distances.insert(source.to_string(), 0);
    let mut queue = VecDeque::from([source.to_string()]);
    while let Some(node) = queue.pop_front() {
        let distance = distances[&node];
        for neighbor in graph.neighbors(&node) {
            if !distances.contains_key(&neighbor) {
                distances.insert(neighbor.clone(), distance + 1);
                queue.push_back(neighbor);
            }
        }
    }
    distances
}

fn path_metrics(graph: &TopologyGraph, scope: &[String]) -> (Option<f64>, Option<usize>) {
    let mut total = 0usize;
    let mut pairs = 0usize;
    let mut diameter = 0usize;
    for source in scope {
        let distances = bfs_distances(graph, source);
        for target in scope {
            if target == source {
                continue;
            }
            if let Some(&distance) = distances.get(target) {
                total += distance;
                pairs += 1;
                diameter = diameter.max(distance);
            }
        }
    }
    if pairs == 0 {
        (None, None)
    } else {
        (Some(total as f64 / pairs as f64), Some(diameter))
    }
}

/// Average of the per-node local clustering coefficients; nodes with fewer
/// than two neighbors contribute zero.
fn average_clustering(graph: &TopologyGraph) -> f64 {
    let nodes = graph.nodes();
    if nodes.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    for node in &nodes {
        let neighbors = graph.neighbors(node);
        let degree = neighbors.len();
        if degree < 2 {
            continue;
        }
        let mut links = 0usize;
        for (i, a) in neighbors.iter().enumerate() {
            for b in &neighbors[i + 1..] {
                if graph.has_edge(a, b) {
                    links += 1;
                }
            }
        }
        total += 2.0 * links as f64 / (degree as f64 * (degree as f64 - 1.0));
    }
    total / nodes.len() as f64
}

fn closeness_centrality(graph: &TopologyGraph, nodes: &[String]) -> BTreeMap<String, f64> {
    let n = nodes.len();
    nodes
        .iter()
        .map(|node| {
            let distances = bfs_distances(graph, node);
            let reachable = distances.len().saturating_sub(1);
            let sum: usize = distances.values().sum();
            let score = if reachable == 0 || sum == 0 {
                0.0
            } else {
                // Wasserman–Faust correction for disconnected graphs.
                let base = reachable as f64 / sum as f64;
                if n > 1 {
                    base * (reachable as f64 / (n as f64 - 1.0))
                } else {
                    base
                }
            };
            (node.clone(), score)
        })
        .collect()
}

/// Brandes' algorithm, unweighted, normalized for undirected graphs.
fn betweenness_centrality(graph: &TopologyGraph, nodes: &[String]) -> BTreeMap<String, f64> {
    let n = nodes.len();
    let mut scores: BTreeMap<String, f64> = nodes.iter().map(|id| (id.clone(), 0.0)).collect();

    for source in nodes {
        let mut stack: Vec<String> = Vec::new();
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        let mut sigma: HashMap<String, f64> = nodes.iter().map(|id| (id.clone(), 0.0)).collect();
        let mut distance: HashMap<String, i64> = nodes.iter().map(|id| (id.clone(), -1)).collect();
        sigma.insert(source.clone(), 1.0);
        distance.insert(source.clone(), 0);

        let mut queue = VecDeque::from([source.clone()]);
        while let Some(node) = queue.pop_front() {
            stack.push(node.clone());
            for neighbor in graph.neighbors(&node) {
                if distance[&neighbor] < 0 {
                    distance.insert(neighbor.clone(), distance[&node] + 1);
                    queue.push_back(neighbor.clone());
                }
                if distance[&neighbor] == distance[&node] + 1 {
                    *sigma.get_mut(&neighbor).expect("sigma entry") += sigma[&node];
                    predecessors.entry(neighbor.clone()).or_default().push(node.clone());
                }
            }
        }

        let mut delta: HashMap<String, f64> = nodes.iter().map(|id| (id.clone(), 0.0)).collect();
        while let Some(node) = stack.pop() {
            for predecessor in predecessors.get(&node).cloned().unwrap_or_default() {
                let share = sigma[&predecessor] / sigma[&node] * (1.0 + delta[&node]);
                *delta.get_mut(&predecessor).expect("delta entry") += share;
            }
            if node != *source {
                *scores.get_mut(&node).expect("score entry") += delta[&node];
            }
        }
    }

    if n > 2 {
        // Each undirected pair was counted twice; normalize to [0, 1].
        let norm = ((n - 1) * (n - 2)) as f64;
        for score in scores.values_mut() {
            *score /= norm;
        }
    }
    scores
}

fn eigenvector_centrality(
    graph: &TopologyGraph,
    nodes: &[String],
    max_iterations: usize,
    tolerance: f64,
) -> Option<BTreeMap<String, f64>> {
    let n = nodes.len();
    if n == 0 {
        return Some(BTreeMap::new());
    }

    let mut scores: HashMap<String, f64> =
        nodes.iter().map(|id| (id.clone(), 1.0 / n as f64)).collect();

    for _ in 0..max_iterations {
        // Iterate with (A + I) so bipartite graphs (stars, trees) converge.
        let mut next: HashMap<String, f64> = scores.clone();
        for node in nodes {
            for neighbor in graph.neighbors(node) {
                *next.get_mut(&neighbor).expect("next entry") += scores[node];
            }
        }
        let norm: f64 = next.values().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return None;
        }
        for value in next.values_mut() {
            *value /= norm;
        }
        let drift: f64 = nodes
            .iter()
            .map(|id| (next[id] - scores[id]).abs())
            .sum();
        scores = next;
        if drift < n as f64 * tolerance {
            return Some(scores.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::build::{build_topology, TopologySpec, TopologyType};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("a{:02}", i)).collect()
    }

    /// **Scenario**: a mesh is dense, connected, fully clustered, diameter 1.
    #[test]
    fn mesh_metrics() {
        let graph = build_topology(&TopologySpec::mesh(), &ids(5), 0).unwrap();
        let metrics = graph.metrics();
        assert_eq!(metrics.node_count, 5);
        assert_eq!(metrics.edge_count, 10);
        assert!((metrics.density - 1.0).abs() < 1e-9);
        assert!(metrics.is_connected);
        assert!((metrics.clustering_coefficient.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(metrics.diameter, Some(1));
        assert_eq!(metrics.avg_path_length, Some(1.0));
    }

    /// **Scenario**: disconnected graphs measure paths on the largest
    /// component only.
    #[test]
    fn disconnected_uses_largest_component() {
        let agents = ids(5);
        let spec = TopologySpec::custom(vec![
            (agents[0].clone(), agents[1].clone(), 1.0),
            (agents[1].clone(), agents[2].clone(), 1.0),
            (agents[3].clone(), agents[4].clone(), 1.0),
        ]);
        let graph = build_topology(&spec, &agents, 0).unwrap();
        let metrics = graph.metrics();
        assert!(!metrics.is_connected);
        assert_eq!(metrics.diameter, Some(2)); // the 3-node chain
    }

    /// **Scenario**: the hub dominates every centrality measure of a star.
    #[test]
    fn star_centrality() {
        let agents = ids(5);
        let spec = TopologySpec::hub_spoke(agents[0].clone());
        let graph = build_topology(&spec, &agents, 0).unwrap();
        let centrality = graph.centrality();

        assert!((centrality.degree[&agents[0]] - 1.0).abs() < 1e-9);
        assert!(centrality.betweenness[&agents[0]] > centrality.betweenness[&agents[1]]);
        assert!(centrality.closeness[&agents[0]] > centrality.closeness[&agents[1]]);
        let eigenvector = centrality.eigenvector.expect("star converges");
        assert!(eigenvector[&agents[0]] > eigenvector[&agents[1]]);

        assert_eq!(
            graph.most_central(CentralityMeasure::Degree, 1),
            vec![agents[0].clone()]
        );
    }

    /// **Scenario**: betweenness of a path's middle node is maximal.
    #[test]
    fn path_betweenness() {
        let agents = ids(3);
        let spec = TopologySpec::custom(vec![
            (agents[0].clone(), agents[1].clone(), 1.0),
            (agents[1].clone(), agents[2].clone(), 1.0),
        ]);
        let graph = build_topology(&spec, &agents, 0).unwrap();
        let centrality = graph.centrality();
        assert!((centrality.betweenness[&agents[1]] - 1.0).abs() < 1e-9);
        assert_eq!(centrality.betweenness[&agents[0]], 0.0);
    }

    /// **Scenario**: a hierarchical tree reports tree-like metrics.
    #[test]
    fn tree_metrics() {
        let spec = TopologySpec {
            topology_type: TopologyType::Hierarchical,
            branching_factor: Some(2),
            ..TopologySpec::default()
        };
        let graph = build_topology(&spec, &ids(7), 0).unwrap();
        let metrics = graph.metrics();
        assert_eq!(metrics.edge_count, 6);
        assert!(metrics.is_connected);
        assert_eq!(metrics.clustering_coefficient, Some(0.0));
    }
}
