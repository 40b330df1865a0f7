//! Agent ordering strategies for step execution.
//!
//! Every strategy is deterministic given its inputs; `random` shuffles with a
//! seed derived from (master_seed, step) so re-runs reproduce the order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::topology::TopologyGraph;

/// How agents are ordered within a step.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderingStrategy {
    /// Fixed sorted order, rotated by step.
    #[default]
    RoundRobin,
    /// Deterministic shuffle seeded by (master_seed, step).
    Random,
    /// Priority score descending, id tiebreak.
    Priority,
    /// BFS from the hub (or most central node); unreached appended sorted.
    Topology,
    /// Sorted; order is irrelevant, the caller may parallelize freely.
    Simultaneous,
}

/// Inputs the strategies read from.
pub struct OrderingInputs<'a> {
    pub step: u64,
    pub master_seed: Option<u64>,
    pub priorities: &'a HashMap<String, f64>,
    pub topology: Option<&'a TopologyGraph>,
    pub hub_id: Option<&'a str>,
}

/// Stable shuffle seed from (master_seed, step).
fn step_seed(master_seed: u64, step: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(master_seed.to_be_bytes());
    hasher.update(step.to_be_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Orders agents for one step.
pub fn order_agents(
    strategy: OrderingStrategy,
    agent_ids: &[String],
    inputs: &OrderingInputs<'_>,
) -> Vec<String> {
    if agent_ids.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<String> = agent_ids.to_vec();
    sorted.sort();

    match strategy {
        OrderingStrategy::RoundRobin => {
            let rotation = (inputs.step as usize) % sorted.len();
            let mut rotated = sorted.split_off(rotation);
            rotated.extend(sorted);
            rotated
        }
        OrderingStrategy::Random => {
            let seed = match inputs.master_seed {
                Some(master) => step_seed(master, inputs.step),
                // Unseeded runs still shuffle, varying by step.
                None => step_seed(inputs.step, inputs.step.wrapping_add(1)),
            };
            let mut rng = StdRng::seed_from_u64(seed);
            sorted.shuffle(&mut rng);
            sorted
        }
        OrderingStrategy::Priority => {
            sorted.sort_by(|a, b| {
                let pa = inputs.priorities.get(a).copied().unwrap_or(0.0);
                let pb = inputs.priorities.get(b).copied().unwrap_or(0.0);
                pb.partial_cmp(&pa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            });
            sorted
        }
        OrderingStrategy::Topology => {
            let graph = match inputs.topology {
                Some(graph) => graph,
                None => return sorted,
            };
            let start = inputs
                .hub_id
                .filter(|hub| graph.contains(hub))
                .map(str::to_string)
                .or_else(|| {
                    graph
                        .most_central(crate::topology::CentralityMeasure::Degree, 1)
                        .into_iter()
                        .next()
                })
                .unwrap_or_else(|| sorted[0].clone());
            graph
                .bfs_order(&start)
                .into_iter()
                .filter(|id| agent_ids.contains(id))
                .collect()
        }
        OrderingStrategy::Simultaneous => sorted,
    }
}

/// Partitions the ordered list into batches of at most `batch_size`.
pub fn batch_agents(ordered: &[String], batch_size: usize) -> Vec<Vec<String>> {
    let batch_size = batch_size.max(1);
    ordered
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}
