//! Topology builders: mesh, hub-spoke, hierarchical, small-world,
//! scale-free, custom.
//!
//! Stochastic builders (Watts–Strogatz, Barabási–Albert) take an explicit
//! seed; the runner derives it from the master seed so the same config always
//! yields the same graph.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::topology::{TopologyError, TopologyGraph};

/// The recognized structures.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopologyType {
    #[default]
    Mesh,
    HubSpoke,
    Hierarchical,
    SmallWorld,
    ScaleFree,
    Custom,
}

impl TopologyType {
    pub fn name(&self) -> &'static str {
        match self {
            TopologyType::Mesh => "mesh",
            TopologyType::HubSpoke => "hub_spoke",
            TopologyType::Hierarchical => "hierarchical",
            TopologyType::SmallWorld => "small_world",
            TopologyType::ScaleFree => "scale_free",
            TopologyType::Custom => "custom",
        }
    }
}

/// Declarative topology request; each variant reads its own parameters.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct TopologySpec {
    #[serde(rename = "type", default)]
    pub topology_type: TopologyType,
    #[serde(default)]
    pub directed: bool,
    /// Hub for hub_spoke, root for hierarchical. Defaults to the first agent.
    #[serde(default)]
    pub hub_id: Option<String>,
    /// Children per node for hierarchical trees.
    #[serde(default)]
    pub branching_factor: Option<usize>,
    /// Nearest-neighbor count for small_world.
    #[serde(default)]
    pub k: Option<usize>,
    /// Rewiring probability for small_world.
    #[serde(default)]
    pub p: Option<f64>,
    /// Attachments per new node for scale_free.
    #[serde(default)]
    pub m: Option<usize>,
    /// Edge list for custom topologies.
    #[serde(default)]
    pub edges: Option<Vec<(String, String, f64)>>,
}

impl TopologySpec {
    pub fn mesh() -> Self {
        Self::default()
    }

    pub fn hub_spoke(hub_id: impl Into<String>) -> Self {
        Self {
            topology_type: TopologyType::HubSpoke,
            hub_id: Some(hub_id.into()),
            ..Self::default()
        }
    }

    pub fn custom(edges: Vec<(String, String, f64)>) -> Self {
        Self {
            topology_type: TopologyType::Custom,
            edges: Some(edges),
            ..Self::default()
        }
    }
}

/// Builds a topology over the given agents. `seed` drives the stochastic
/// variants only.
pub fn build_topology(
    spec: &TopologySpec,
    agent_ids: &[String],
    seed: u64,
) -> Result<TopologyGraph, TopologyError> {
    let mut graph = TopologyGraph::new(spec.directed, spec.topology_type.name());
    for agent_id in agent_ids {
        graph.add_node(agent_id.clone());
    }
    if agent_ids.is_empty() {
        return Ok(graph);
    }

    match spec.topology_type {
        TopologyType::Mesh => build_mesh(&mut graph, agent_ids),
        TopologyType::HubSpoke => build_hub_spoke(&mut graph, agent_ids, spec.hub_id.as_deref())?,
        TopologyType::Hierarchical => build_hierarchical(
            &mut graph,
            agent_ids,
            spec.branching_factor.unwrap_or(2),
            spec.hub_id.as_deref(),
        )?,
        TopologyType::SmallWorld => build_small_world(
            &mut graph,
            agent_ids,
            spec.k.unwrap_or(4),
            spec.p.unwrap_or(0.3),
            seed,
        ),
        TopologyType::ScaleFree => {
            build_scale_free(&mut graph, agent_ids, spec.m.unwrap_or(2), seed)
        }
        TopologyType::Custom => {
            for (source, target, weight) in spec.edges.iter().flatten() {
                graph.add_edge(source.clone(), target.clone(), *weight);
            }
        }
    }

    Ok(graph)
}

fn build_mesh(graph: &mut TopologyGraph, agent_ids: &[String]) {
    for (i, a) in agent_ids.iter().enumerate() {
        for b in &agent_ids[i + 1..] {
            graph.add_edge(a.clone(), b.clone(), 1.0);
            if graph.is_directed() {
                graph.add_edge(b.clone(), a.clone(), 1.0);
            }
        }
    }
}

fn build_hub_spoke(
    graph: &mut TopologyGraph,
    agent_ids: &[String],
    hub_id: Option<&str>,
) -> Result<(), TopologyError> {
    let hub = match hub_id {
        Some(hub) => {
            if !agent_ids.iter().any(|id| id == hub) {
                return Err(TopologyError::MissingAgent(hub.to_string()));
            }
            hub.to_string()
        }
        None => agent_ids[0].clone(),
    };
    for agent_id in agent_ids {
        if *agent_id != hub {
            graph.add_edge(hub.clone(), agent_id.clone(), 1.0);
            if graph.is_directed() {
                graph.add_edge(agent_id.clone(), hub.clone(), 1.0);
            }
        }
    }
    Ok(())
}

/// Balanced tree of the given branching factor. The tree height is chosen so
/// the capacity covers the agent count; agents are attached breadth-first.
/// Agents beyond the computed capacity are dropped (documented contract) with
/// a warning.
fn build_hierarchical(
    graph: &mut TopologyGraph,
    agent_ids: &[String],
    branching_factor: usize,
    root_id: Option<&str>,
) -> Result<(), TopologyError> {
    if branching_factor == 0 {
        return Err(TopologyError::InvalidParameter(
            "branching_factor must be >= 1".into(),
        ));
    }

    let mut ordered: Vec<String> = Vec::with_capacity(agent_ids.len());
    match root_id {
        Some(root) => {
            if !agent_ids.iter().any(|id| id == root) {
                return Err(TopologyError::MissingAgent(root.to_string()));
            }
            ordered.push(root.to_string());
            ordered.extend(agent_ids.iter().filter(|id| *id != root).cloned());
        }
        None => ordered.extend(agent_ids.iter().cloned()),
    }

    let n = ordered.len();
    let capacity = tree_capacity(branching_factor, n);
    if capacity < n {
        let dropped: Vec<&String> = ordered[capacity..].iter().collect();
        tracing::warn!(
            ?dropped,
            branching_factor,
            "balanced tree does not fit all agents; dropping the remainder"
        );
        for agent in &ordered[capacity..] {
            graph.remove_node(agent);
        }
    }

    let fitted = n.min(capacity);
    for index in 1..fitted {
        let parent = (index - 1) / branching_factor;
        graph.add_edge(ordered[parent].clone(), ordered[index].clone(), 1.0);
        if graph.is_directed() {
            graph.add_edge(ordered[index].clone(), ordered[parent].clone(), 1.0);
        }
    }
    Ok(())
}

/// Node capacity of the balanced tree whose height is the smallest that
/// covers `n` agents.
fn tree_capacity(branching_factor: usize, n: usize) -> usize {
    if branching_factor == 1 {
        return n;
    }
    let mut capacity = 1usize;
    let mut level = 1usize;
    while capacity < n {
        level = level.saturating_mul(branching_factor);
        capacity = capacity.saturating_add(level);
    }
    capacity
}

/// Watts–Strogatz: ring lattice of k nearest neighbors with probability-p
/// rewiring. k is rounded up to even and clamped below n; p is clamped into
/// [0, 1]. Fewer than three nodes fall back to a complete graph.
fn build_small_world(
    graph: &mut TopologyGraph,
    agent_ids: &[String],
    k: usize,
    p: f64,
    seed: u64,
) {
    let n = agent_ids.len();
    if n < 3 {
        build_mesh(graph, agent_ids);
        return;
    }

    let mut k = if k % 2 != 0 { k + 1 } else { k };
    if k >= n {
        k = if (n - 1) % 2 == 0 { n - 1 } else { n - 2 };
    }
    let k = k.max(2);
    let p = p.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);

    for i in 0..n {
        for j in 1..=(k / 2) {
            let neighbor = (i + j) % n;
            if rng.gen::<f64>() < p {
                // Rewire to a uniformly chosen non-self, non-duplicate target.
                let mut attempts = 0;
                loop {
                    let candidate = rng.gen_range(0..n);
                    if candidate != i && !graph.has_edge(&agent_ids[i], &agent_ids[candidate]) {
                        graph.add_edge(agent_ids[i].clone(), agent_ids[candidate].clone(), 1.0);
                        break;
                    }
                    attempts += 1;
                    if attempts > 4 * n {
                        graph.add_edge(agent_ids[i].clone(), agent_ids[neighbor].clone(), 1.0);
                        break;
                    }
                }
            } else {
                graph.add_edge(agent_ids[i].clone(), agent_ids[neighbor].clone(), 1.0);
            }
        }
    }
}

/// Barabási–Albert: each new node attaches to m existing nodes with
/// probability proportional to their degree. m is clamped into [1, n − 1].
fn build_scale_free(graph: &mut TopologyGraph, agent_ids: &[String], m: usize, seed: u64) {
    let n = agent_ids.len();
    if n < 2 {
        return;
    }
    let m = m.clamp(1, n - 1);
    let mut rng = StdRng::seed_from_u64(seed);

    // Attachment pool: node indices repeated once per degree.
    let mut pool: Vec<usize> = Vec::new();
    let mut targets: Vec<usize> = (0..m).collect();

    for new_node in m..n {
        for &target in &targets {
            graph.add_edge(agent_ids[new_node].clone(), agent_ids[target].clone(), 1.0);
            pool.push(new_node);
            pool.push(target);
        }
        // Sample the next target set, preferential by degree, without repeats.
        let mut next: Vec<usize> = Vec::with_capacity(m);
        let mut guard = 0;
        while next.len() < m && guard < 100 * n {
            let candidate = pool[rng.gen_range(0..pool.len())];
            if !next.contains(&candidate) {
                next.push(candidate);
            }
            guard += 1;
        }
        while next.len() < m {
            if let Some(extra) = (0..n).find(|i| !next.contains(i)) {
                next.push(extra);
            } else {
                break;
            }
        }
        targets = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("a{:02}", i)).collect()
    }

    /// **Scenario**: mesh has n(n−1)/2 undirected edges.
    #[test]
    fn mesh_edge_count() {
        let graph = build_topology(&TopologySpec::mesh(), &ids(5), 0).unwrap();
        assert_eq!(graph.edge_count(), 10);
        assert_eq!(graph.node_count(), 5);
    }

    /// **Scenario**: hub-spoke connects the hub to every other node only.
    #[test]
    fn hub_spoke_shape() {
        let agents = ids(4);
        let spec = TopologySpec::hub_spoke(agents[2].clone());
        let graph = build_topology(&spec, &agents, 0).unwrap();
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.neighbors(&agents[2]).len(), 3);
        assert_eq!(graph.neighbors(&agents[0]), vec![agents[2].clone()]);

        let missing = TopologySpec::hub_spoke("nobody");
        assert!(matches!(
            build_topology(&missing, &agents, 0),
            Err(TopologyError::MissingAgent(_))
        ));
    }

    /// **Scenario**: a branching-2 tree over 7 agents is the full balanced
    /// tree (every non-root has one parent).
    #[test]
    fn hierarchical_tree() {
        let agents = ids(7);
        let spec = TopologySpec {
            topology_type: TopologyType::Hierarchical,
            branching_factor: Some(2),
            ..TopologySpec::default()
        };
        let graph = build_topology(&spec, &agents, 0).unwrap();
        assert_eq!(graph.node_count(), 7);
        assert_eq!(graph.edge_count(), 6);
        // Root has two children; leaves have exactly one neighbor.
        assert_eq!(graph.neighbors(&agents[0]).len(), 2);
        assert_eq!(graph.neighbors(&agents[6]).len(), 1);
    }

    /// **Scenario**: small-world keeps all nodes, is deterministic under a
    /// seed, and clamps tiny networks to a mesh.
    #[test]
    fn small_world_determinism() {
        let agents = ids(10);
        let spec = TopologySpec {
            topology_type: TopologyType::SmallWorld,
            k: Some(4),
            p: Some(0.3),
            ..TopologySpec::default()
        };
        let first = build_topology(&spec, &agents, 42).unwrap();
        let second = build_topology(&spec, &agents, 42).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.node_count(), 10);
        assert!(first.edge_count() >= 10);

        let tiny = build_topology(&spec, &ids(2), 42).unwrap();
        assert_eq!(tiny.edge_count(), 1);
    }

    /// **Scenario**: scale-free clamps m and connects every node.
    #[test]
    fn scale_free_connects_all() {
        let agents = ids(12);
        let spec = TopologySpec {
            topology_type: TopologyType::ScaleFree,
            m: Some(50),
            ..TopologySpec::default()
        };
        let graph = build_topology(&spec, &agents, 7).unwrap();
        for agent in &agents {
            assert!(
                !graph.neighbors(agent).is_empty(),
                "{} has no neighbors",
                agent
            );
        }
    }

    /// **Scenario**: custom edge lists pass through with weights.
    #[test]
    fn custom_edges() {
        let agents = ids(3);
        let spec = TopologySpec::custom(vec![(agents[0].clone(), agents[1].clone(), 2.0)]);
        let graph = build_topology(&spec, &agents, 0).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.has_edge(&agents[0], &agents[1]));
        assert!(graph.contains(&agents[2]));
    }
}
