//! Reliability metrics: pass^k and cross-run comparisons.
//!
//! `pass^k = C(c, k) / C(n, k)` is the probability that k trials drawn
//! without replacement from n trials with c successes are all successes —
//! the chance of k consecutive clean runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard k values reported across the engine.
pub const STANDARD_K: [u32; 4] = [1, 2, 4, 8];

/// Allowed pass^1 regression when judging an improvement.
pub const PASS1_REGRESSION_EPSILON: f64 = 0.05;

/// `pass^k` for n trials with c successes. `pass^0` is 1 by convention;
/// k > c (or k > n) is 0.
pub fn pass_k(n: u32, c: u32, k: u32) -> f64 {
    if k == 0 {
        return 1.0;
    }
    if n == 0 || k > n || k > c {
        return 0.0;
    }
    // C(c,k)/C(n,k) as a telescoping product, stable for large n.
    let mut probability = 1.0;
    for i in 0..k {
        probability *= (c - i) as f64 / (n - i) as f64;
    }
    probability
}

/// `pass^k` for the standard k set, keyed `pass_1`, `pass_2`, ….
pub fn all_pass_k(n: u32, c: u32) -> BTreeMap<String, f64> {
    STANDARD_K
        .iter()
        .map(|&k| (format!("pass_{}", k), pass_k(n, c, k)))
        .collect()
}

/// Fragility signal: a large gap means frequent-but-unreliable success.
pub fn reliability_gap(pass_1: f64, pass_8: f64) -> f64 {
    pass_1 - pass_8
}

/// Human-readable band for a (pass^1, pass^8) pair.
pub fn interpret_reliability(pass_1: f64, pass_8: f64) -> String {
    if pass_1 == 0.0 {
        return "Critical: no successes observed".into();
    }
    if pass_8 >= 0.9 {
        return "Excellent: highly reliable across repeated trials".into();
    }
    if pass_8 >= 0.7 {
        return "Good: generally reliable with occasional failures".into();
    }
    if pass_8 >= 0.5 {
        return "Moderate: some inconsistency in repeated trials".into();
    }
    let gap = reliability_gap(pass_1, pass_8);
    if gap > 0.5 {
        return format!(
            "Fragile: high success rate ({:.0}%) but low reliability ({:.0}%)",
            pass_1 * 100.0,
            pass_8 * 100.0
        );
    }
    if pass_1 >= 0.7 {
        return "Inconsistent: good single-trial performance but unreliable over time".into();
    }
    "Poor: low success rate and reliability".into()
}

/// Aggregated metrics for a set of tasks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    pub task_metrics: BTreeMap<String, BTreeMap<String, f64>>,
    pub mean_pass_1: f64,
    pub mean_pass_8: f64,
    pub mean_reliability_gap: f64,
    pub total_trials: u32,
    pub total_successes: u32,
}

impl BenchmarkMetrics {
    /// Aggregates `(task id -> (trials, successes))`.
    pub fn from_task_results(results: &BTreeMap<String, (u32, u32)>) -> Self {
        let mut task_metrics = BTreeMap::new();
        let mut pass_1_sum = 0.0;
        let mut pass_8_sum = 0.0;
        let mut total_trials = 0;
        let mut total_successes = 0;

        for (task_id, &(n, c)) in results {
            let metrics = all_pass_k(n, c);
            pass_1_sum += metrics["pass_1"];
            pass_8_sum += metrics["pass_8"];
            total_trials += n;
            total_successes += c;
            task_metrics.insert(task_id.clone(), metrics);
        }

        let count = results.len().max(1) as f64;
        let mean_pass_1 = pass_1_sum / count;
        let mean_pass_8 = pass_8_sum / count;
        Self {
            task_metrics,
            mean_pass_1,
            mean_pass_8,
            mean_reliability_gap: mean_pass_1 - mean_pass_8,
            total_trials,
            total_successes,
        }
    }

    pub fn interpretation(&self) -> String {
        interpret_reliability(self.mean_pass_1, self.mean_pass_8)
    }
}

/// Baseline-vs-variant reliability comparison.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReliabilityComparison {
    pub baseline: BTreeMap<String, f64>,
    pub variant: BTreeMap<String, f64>,
    pub pass_1_delta: f64,
    pub pass_8_delta: f64,
    pub reliability_gap_delta: f64,
}

impl ReliabilityComparison {
    pub fn compare(baseline: (u32, u32), variant: (u32, u32)) -> Self {
        let base = all_pass_k(baseline.0, baseline.1);
        let var = all_pass_k(variant.0, variant.1);
        let pass_1_delta = var["pass_1"] - base["pass_1"];
        let pass_8_delta = var["pass_8"] - base["pass_8"];
        let reliability_gap_delta = reliability_gap(var["pass_1"], var["pass_8"])
            - reliability_gap(base["pass_1"], base["pass_8"]);
        Self {
            baseline: base,
            variant: var,
            pass_1_delta,
            pass_8_delta,
            reliability_gap_delta,
        }
    }

    /// Improvement requires a pass^8 gain of at least `min_delta` with pass^1
    /// not regressing by more than the epsilon.
    pub fn is_improvement(&self, min_delta: f64) -> bool {
        self.pass_8_delta >= min_delta && self.pass_1_delta >= -PASS1_REGRESSION_EPSILON
    }
}
