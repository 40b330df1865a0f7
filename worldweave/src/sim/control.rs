//! Controller signals, per-agent error policy, and timeout helpers.
//!
//! External actors set signals; the scheduler reads them cooperatively
//! between batches and phases. Signals are atomic flags plus a notifier, so
//! a paused scheduler parks without spinning and wakes on resume or cancel.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

/// What to do when one agent's turn fails.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Abort the step at the first agent failure.
    FailFast,
    /// Record the failure and keep going.
    #[default]
    LogAndContinue,
    /// Retry the agent's turn with backoff, up to the configured ceiling.
    Retry,
    /// Suspend the agent after too many consecutive failures.
    SuspendAgent,
}

/// Scheduler policy for one step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepPolicy {
    pub max_concurrent_agents: usize,
    pub max_concurrent_llm_calls: usize,
    pub step_timeout_seconds: f64,
    pub agent_timeout_seconds: f64,
    pub on_agent_error: ErrorStrategy,
    /// Retry ceiling for [`ErrorStrategy::Retry`].
    pub max_retries: u32,
    /// Consecutive failures before [`ErrorStrategy::SuspendAgent`] suspends.
    pub max_consecutive_failures: u32,
    /// 0 disables periodic auto-checkpointing.
    pub checkpoint_every_n_steps: u64,
    pub auto_checkpoint_on_pause: bool,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 5,
            max_concurrent_llm_calls: 10,
            step_timeout_seconds: 60.0,
            agent_timeout_seconds: 30.0,
            on_agent_error: ErrorStrategy::LogAndContinue,
            max_retries: 2,
            max_consecutive_failures: 3,
            checkpoint_every_n_steps: 0,
            auto_checkpoint_on_pause: true,
        }
    }
}

/// Shared control surface between external actors and the scheduler.
#[derive(Default)]
pub struct SimulationController {
    paused: AtomicBool,
    cancelled: AtomicBool,
    step_requested: AtomicBool,
    notify: Notify,
    failures: Mutex<HashMap<String, u32>>,
    suspended: Mutex<HashSet<String>>,
}

impl SimulationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Allows exactly one step through while paused.
    pub fn request_step(&self) {
        self.step_requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Consumes a pending single-step request.
    pub fn take_step_request(&self) -> bool {
        self.step_requested.swap(false, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn should_terminate(&self) -> bool {
        self.is_cancelled()
    }

    /// Parks until resumed (or cancelled, or granted a single step).
    pub async fn wait_if_paused(&self) {
        loop {
            if !self.is_paused() || self.is_cancelled() || self.take_step_request() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after arming the notifier so a racing resume is not lost.
            if !self.is_paused() || self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Clears the failure streak after a success.
    pub fn record_agent_success(&self, agent_id: &str) {
        self.failures
            .lock()
            .expect("failure map poisoned")
            .remove(agent_id);
    }

    /// Bumps the failure streak; suspends and reports true at the threshold
    /// when the strategy is `SuspendAgent`.
    pub fn record_agent_failure(
        &self,
        agent_id: &str,
        strategy: ErrorStrategy,
        max_consecutive_failures: u32,
    ) -> bool {
        let count = {
            let mut failures = self.failures.lock().expect("failure map poisoned");
            let entry = failures.entry(agent_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if strategy == ErrorStrategy::SuspendAgent && count >= max_consecutive_failures {
            self.suspended
                .lock()
                .expect("suspension set poisoned")
                .insert(agent_id.to_string());
            true
        } else {
            false
        }
    }

    pub fn failure_count(&self, agent_id: &str) -> u32 {
        self.failures
            .lock()
            .expect("failure map poisoned")
            .get(agent_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_agent_suspended(&self, agent_id: &str) -> bool {
        self.suspended
            .lock()
            .expect("suspension set poisoned")
            .contains(agent_id)
    }

    pub fn suspended_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self
            .suspended
            .lock()
            .expect("suspension set poisoned")
            .iter()
            .cloned()
            .collect();
        agents.sort();
        agents
    }

    pub fn unsuspend_agent(&self, agent_id: &str) {
        self.suspended
            .lock()
            .expect("suspension set poisoned")
            .remove(agent_id);
        self.record_agent_success(agent_id);
    }

    pub fn unsuspend_all(&self) {
        self.suspended.lock().expect("suspension set poisoned").clear();
        self.failures.lock().expect("failure map poisoned").clear();
    }

    pub fn reset(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.step_requested.store(false, Ordering::SeqCst);
        self.unsuspend_all();
    }
}

/// Outcome of a bounded await.
#[derive(Clone, Debug)]
pub struct TimeoutOutcome {
    pub completed: bool,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Awaits a future under a deadline; on timeout the future is dropped and the
/// result discarded.
pub async fn with_timeout<T>(
    future: impl Future<Output = T>,
    timeout: Duration,
) -> (Option<T>, TimeoutOutcome) {
    let started = std::time::Instant::now();
    match tokio::time::timeout(timeout, future).await {
        Ok(value) => (
            Some(value),
            TimeoutOutcome {
                completed: true,
                timed_out: false,
                duration: started.elapsed(),
            },
        ),
        Err(_) => (
            None,
            TimeoutOutcome {
                completed: false,
                timed_out: true,
                duration: started.elapsed(),
            },
        ),
    }
}

/// Retries a fallible async operation with exponential backoff. Returns the
/// value and how many retries it took.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<(T, u32), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                if attempt >= max_retries {
                    return Err(error);
                }
                let delay = base_delay.mul_f64(2.0_f64.powi(attempt as i32));
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: defaults match the documented step policy.
    #[test]
    fn step_policy_defaults() {
        let policy = StepPolicy::default();
        assert_eq!(policy.max_concurrent_agents, 5);
        assert_eq!(policy.max_concurrent_llm_calls, 10);
        assert_eq!(policy.step_timeout_seconds, 60.0);
        assert_eq!(policy.agent_timeout_seconds, 30.0);
        assert_eq!(policy.on_agent_error, ErrorStrategy::LogAndContinue);
        assert_eq!(policy.max_consecutive_failures, 3);
        assert!(policy.auto_checkpoint_on_pause);
    }

    /// **Scenario**: pause/resume/cancel flags flip as signalled.
    #[test]
    fn signal_flags() {
        let controller = SimulationController::new();
        assert!(!controller.is_paused());
        controller.pause();
        assert!(controller.is_paused());
        controller.resume();
        assert!(!controller.is_paused());
        controller.cancel();
        assert!(controller.should_terminate());
        controller.reset();
        assert!(!controller.is_cancelled());
    }

    /// **Scenario**: three consecutive failures suspend under SuspendAgent; a
    /// success clears the streak.
    #[test]
    fn suspension_after_consecutive_failures() {
        let controller = SimulationController::new();
        assert!(!controller.record_agent_failure("a1", ErrorStrategy::SuspendAgent, 3));
        assert!(!controller.record_agent_failure("a1", ErrorStrategy::SuspendAgent, 3));
        assert!(controller.record_agent_failure("a1", ErrorStrategy::SuspendAgent, 3));
        assert!(controller.is_agent_suspended("a1"));
        assert_eq!(controller.suspended_agents(), vec!["a1".to_string()]);

        controller.unsuspend_agent("a1");
        assert!(!controller.is_agent_suspended("a1"));
        assert_eq!(controller.failure_count("a1"), 0);

        controller.record_agent_failure("a2", ErrorStrategy::LogAndContinue, 3);
        controller.record_agent_failure("a2", ErrorStrategy::LogAndContinue, 3);
        controller.record_agent_failure("a2", ErrorStrategy::LogAndContinue, 3);
        assert!(!controller.is_agent_suspended("a2"));
        controller.record_agent_success("a2");
        assert_eq!(controller.failure_count("a2"), 0);
    }

    /// **Scenario**: wait_if_paused parks until resume.
    #[tokio::test]
    async fn wait_until_resumed() {
        let controller = std::sync::Arc::new(SimulationController::new());
        controller.pause();

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller.wait_if_paused().await;
                true
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        controller.resume();
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap());
    }

    /// **Scenario**: with_timeout reports completion vs timeout.
    #[tokio::test]
    async fn timeout_outcomes() {
        let (value, outcome) =
            with_timeout(async { 42 }, Duration::from_secs(1)).await;
        assert_eq!(value, Some(42));
        assert!(outcome.completed);

        let (value, outcome) = with_timeout(
            tokio::time::sleep(Duration::from_secs(5)),
            Duration::from_millis(10),
        )
        .await;
        assert!(value.is_none());
        assert!(outcome.timed_out);
    }

    /// **Scenario**: retry_with_backoff succeeds after transient failures and
    /// reports the retry count.
    #[tokio::test]
    async fn retry_counts() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(u32, u32), &str> = retry_with_backoff(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        let (value, retries) = result.unwrap();
        assert_eq!(value, 2);
        assert_eq!(retries, 2);
    }
}
