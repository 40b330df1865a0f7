//! Episode wrapper: reset/step/close semantics over one app instance.
//!
//! Gives RL-style clients the usual `(observation, reward, terminated,
//! truncated, info)` step contract. Reward is pluggable; truncation fires at
//! `max_steps`; termination comes from [`AppEnvironment::mark_terminated`] or
//! from an action whose result data carries the `__terminate__` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::apps::runtime::AppInstance;
use crate::apps::{ActionResult, AppError};

/// Result data key an action sets to end the episode.
pub const TERMINATE_FLAG: &str = "__terminate__";

/// Reward signature: `(result, observation, terminated, step_count)`.
pub type RewardFn = Arc<dyn Fn(&ActionResult, &Value, bool, u64) -> f64 + Send + Sync>;

/// Per-step penalty with a success bonus on termination.
pub fn default_reward(_result: &ActionResult, _obs: &Value, terminated: bool, _step: u64) -> f64 {
    if terminated {
        0.99
    } else {
        -0.01
    }
}

/// No shaping: reward only on termination.
pub fn sparse_reward(_result: &ActionResult, _obs: &Value, terminated: bool, _step: u64) -> f64 {
    if terminated {
        1.0
    } else {
        0.0
    }
}

/// Every action costs its step penalty; termination pays the bonus net of it.
pub fn action_cost_reward(_result: &ActionResult, _obs: &Value, terminated: bool, _step: u64) -> f64 {
    if terminated {
        1.0 - 0.01
    } else {
        -0.01
    }
}

/// Result of [`AppEnvironment::reset`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResetResult {
    pub observation: Value,
    pub info: Value,
}

/// Result of one environment step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observation: Value,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Value,
}

/// State captured after one step (or the initial state at step 0).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    pub state: Value,
    pub action: Option<String>,
    pub params: Option<Map<String, Value>>,
    pub reward: f64,
}

/// One finished (or running) episode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpisodeHistory {
    pub episode_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub snapshots: Vec<StateSnapshot>,
    pub terminated: bool,
    pub truncated: bool,
    pub total_reward: f64,
}

impl EpisodeHistory {
    /// Steps taken, excluding the initial state snapshot.
    pub fn step_count(&self) -> usize {
        self.snapshots.len().saturating_sub(1)
    }

    pub fn state_at_step(&self, step: u64) -> Option<&Value> {
        self.snapshots
            .iter()
            .find(|snapshot| snapshot.step == step)
            .map(|snapshot| &snapshot.state)
    }

    /// `(state, action, reward)` triples in order.
    pub fn trajectory(&self) -> Vec<(Value, Option<String>, f64)> {
        self.snapshots
            .iter()
            .map(|s| (s.state.clone(), s.action.clone(), s.reward))
            .collect()
    }
}

/// Episode facade over one [`AppInstance`].
pub struct AppEnvironment {
    app: AppInstance,
    max_steps: u64,
    reward_fn: RewardFn,
    track_history: bool,
    step_count: u64,
    terminated: bool,
    truncated: bool,
    current: Option<EpisodeHistory>,
    finished: Vec<EpisodeHistory>,
}

impl AppEnvironment {
    pub fn new(app: AppInstance, max_steps: u64) -> Self {
        Self {
            app,
            max_steps,
            reward_fn: Arc::new(default_reward),
            track_history: false,
            step_count: 0,
            terminated: false,
            truncated: false,
            current: None,
            finished: Vec::new(),
        }
    }

    pub fn with_reward(mut self, reward_fn: RewardFn) -> Self {
        self.reward_fn = reward_fn;
        self
    }

    pub fn with_history(mut self) -> Self {
        self.track_history = true;
        self
    }

    pub fn episode_id(&self) -> Option<&str> {
        self.app.episode_id()
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn app(&self) -> &AppInstance {
        &self.app
    }

    /// Starts a fresh episode and returns the named agents' initial
    /// observation (the first agent's view).
    pub fn reset(&mut self, agents: &[(String, String)], config: Map<String, Value>) -> ResetResult {
        let observation = self.app.env_reset(agents, config);
        let episode_id = self.app.episode_id().unwrap_or_default().to_string();
        self.step_count = 0;
        self.terminated = false;
        self.truncated = false;

        if self.track_history {
            self.current = Some(EpisodeHistory {
                episode_id: episode_id.clone(),
                started_at: Utc::now(),
                ended_at: None,
                snapshots: vec![StateSnapshot {
                    step: 0,
                    timestamp: Utc::now(),
                    state: observation.clone(),
                    action: None,
                    params: None,
                    reward: 0.0,
                }],
                terminated: false,
                truncated: false,
                total_reward: 0.0,
            });
        }

        ResetResult {
            observation,
            info: json!({ "episode_id": episode_id }),
        }
    }

    /// Executes one action and returns the Gymnasium-style outcome.
    pub fn step(
        &mut self,
        agent_id: &str,
        action: &str,
        params: Map<String, Value>,
    ) -> Result<StepOutcome, AppError> {
        if !self.app.in_episode() {
            return Err(AppError::LogicRuntime(
                "no active episode; call reset first".into(),
            ));
        }

        let result = self.app.execute(agent_id, action, params.clone());
        self.step_count += 1;

        if result
            .data
            .get(TERMINATE_FLAG)
            .map(crate::apps::expression::truthy)
            .unwrap_or(false)
        {
            self.terminated = true;
        }
        if !self.terminated && self.step_count >= self.max_steps {
            self.truncated = true;
        }

        let observation = self.app.agent_view(agent_id);
        let reward = (self.reward_fn)(&result, &observation, self.terminated, self.step_count);

        if let Some(history) = self.current.as_mut() {
            history.snapshots.push(StateSnapshot {
                step: self.step_count,
                timestamp: Utc::now(),
                state: observation.clone(),
                action: Some(action.to_string()),
                params: Some(params),
                reward,
            });
            history.total_reward += reward;
            history.terminated = self.terminated;
            history.truncated = self.truncated;
        }

        Ok(StepOutcome {
            observation,
            reward,
            terminated: self.terminated,
            truncated: self.truncated,
            info: json!({
                "episode_id": self.app.episode_id(),
                "action_success": result.success,
                "error": result.error,
            }),
        })
    }

    /// Marks the episode terminated (goal achieved by an external judge).
    pub fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Finalizes the episode; history (when tracked) moves to the finished
    /// list and the counters reset.
    pub fn close(&mut self) {
        if let Some(mut history) = self.current.take() {
            history.ended_at = Some(Utc::now());
            history.terminated = self.terminated;
            history.truncated = self.truncated;
            self.finished.push(history);
        }
        self.app.env_close();
        self.step_count = 0;
        self.terminated = false;
        self.truncated = false;
    }

    /// The running episode's history, when tracking is enabled.
    pub fn episode_history(&self) -> Option<&EpisodeHistory> {
        self.current.as_ref()
    }

    /// All finished episodes, oldest first.
    pub fn all_episodes(&self) -> &[EpisodeHistory] {
        &self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::paypal::paypal_definition;

    fn env(max_steps: u64) -> AppEnvironment {
        AppEnvironment::new(AppInstance::new(paypal_definition()).unwrap(), max_steps)
    }

    fn agents() -> Vec<(String, String)> {
        vec![
            ("alice".to_string(), "Alice".to_string()),
            ("bob".to_string(), "Bob".to_string()),
        ]
    }

    /// **Scenario**: reset starts an episode and yields its id.
    #[test]
    fn reset_starts_episode() {
        let mut env = env(10);
        let result = env.reset(&agents(), Map::new());
        assert!(result.info["episode_id"].as_str().unwrap().starts_with("ep_"));
        assert_eq!(env.step_count(), 0);
        assert!(env.episode_id().is_some());
    }

    /// **Scenario**: the default reward is −0.01 per step.
    #[test]
    fn default_reward_penalizes_steps() {
        let mut env = env(10);
        env.reset(&agents(), Map::new());
        let outcome = env.step("alice", "check_balance", Map::new()).unwrap();
        assert!((outcome.reward - (-0.01)).abs() < 1e-9);
        assert!(!outcome.terminated);
        assert!(!outcome.truncated);
        assert_eq!(env.step_count(), 1);
    }

    /// **Scenario**: the episode truncates exactly at max_steps.
    #[test]
    fn truncates_at_max_steps() {
        let mut env = env(3);
        env.reset(&agents(), Map::new());
        let mut last = None;
        for _ in 0..4 {
            let outcome = env.step("alice", "check_balance", Map::new()).unwrap();
            let done = outcome.truncated;
            last = Some(outcome);
            if done {
                break;
            }
        }
        assert!(last.unwrap().truncated);
        assert_eq!(env.step_count(), 3);
    }

    /// **Scenario**: close finalizes and a new reset starts a new episode;
    /// both histories are retained.
    #[test]
    fn histories_accumulate_across_episodes() {
        let mut env = env(5).with_history();

        env.reset(&agents(), Map::new());
        env.step("alice", "check_balance", Map::new()).unwrap();
        env.close();

        env.reset(&agents(), Map::new());
        env.step("alice", "check_balance", Map::new()).unwrap();
        env.close();

        assert_eq!(env.all_episodes().len(), 2);
        // initial snapshot + one step each
        assert_eq!(env.all_episodes()[0].snapshots.len(), 2);
        assert_eq!(env.all_episodes()[0].step_count(), 1);
    }

    /// **Scenario**: a custom reward function is honored.
    #[test]
    fn custom_reward() {
        let mut env = env(10).with_reward(Arc::new(|_, _, _, _| 1.0));
        env.reset(&agents(), Map::new());
        let outcome = env.step("alice", "check_balance", Map::new()).unwrap();
        assert_eq!(outcome.reward, 1.0);
    }

    /// **Scenario**: stepping without reset is an error.
    #[test]
    fn step_requires_reset() {
        let mut env = env(10);
        assert!(env.step("alice", "check_balance", Map::new()).is_err());
    }
}
