//! Scheduler error strategies, timeouts, suspension, and pause/resume.

mod init_logging;

use std::sync::Arc;
use std::time::Duration;

use worldweave::agent::{Agent, TraitVector};
use worldweave::llm::{LlmError, MockProvider};
use worldweave::sim::{
    ErrorStrategy, Simulation, SimulationConfig, SimulationStatus, StepStatus,
};

fn simulation_with(provider: MockProvider, tune: impl FnOnce(&mut SimulationConfig)) -> Simulation {
    let mut config = SimulationConfig::named("control");
    config.master_seed = Some(7);
    tune(&mut config);
    let mut simulation = Simulation::new(config, Arc::new(provider));
    simulation.add_agent(Agent::new("alice", TraitVector::default()));
    simulation.add_agent(Agent::new("bob", TraitVector::default()));
    simulation
}

#[tokio::test]
async fn fail_fast_fails_the_step() {
    init_logging::init();
    let provider =
        MockProvider::new("unused").failing_first(u64::MAX, LlmError::Fatal("bad key".into()));
    let mut simulation = simulation_with(provider, |config| {
        config.step.on_agent_error = ErrorStrategy::FailFast;
    });

    let result = simulation.step().await.unwrap();
    assert_eq!(result.status, StepStatus::Failed);
    assert!(!result.errors.is_empty());
    assert!(simulation.messages().is_empty());
}

#[tokio::test]
async fn log_and_continue_records_errors_but_completes() {
    let provider =
        MockProvider::new("unused").failing_first(u64::MAX, LlmError::Fatal("bad key".into()));
    let mut simulation = simulation_with(provider, |config| {
        config.step.on_agent_error = ErrorStrategy::LogAndContinue;
    });

    let result = simulation.step().await.unwrap();
    assert_eq!(result.status, StepStatus::Completed);
    assert_eq!(result.errors.len(), 2, "one error per agent");
    assert_eq!(simulation.current_step(), 1);
}

#[tokio::test]
async fn retry_strategy_recovers_transient_failures() {
    // One transient failure, then clean replies for both agents.
    let provider = MockProvider::new("Hello.")
        .failing_first(1, LlmError::Network("connection reset".into()));
    let mut simulation = simulation_with(provider, |config| {
        config.step.on_agent_error = ErrorStrategy::Retry;
        config.step.max_retries = 3;
        config.llm.use_cache = false;
    });

    let result = simulation.step().await.unwrap();
    assert_eq!(result.status, StepStatus::Completed);
    assert_eq!(result.messages_sent, 2);
}

#[tokio::test]
async fn suspend_agent_after_consecutive_failures() {
    let provider = MockProvider::new("unused")
        .failing_first(u64::MAX, LlmError::Fatal("still broken".into()));
    let mut simulation = simulation_with(provider, |config| {
        config.step.on_agent_error = ErrorStrategy::SuspendAgent;
        config.step.max_consecutive_failures = 2;
    });

    simulation.step().await.unwrap();
    assert!(simulation.status().suspended_agents.is_empty());

    simulation.step().await.unwrap();
    assert_eq!(
        simulation.status().suspended_agents,
        vec!["alice".to_string(), "bob".to_string()]
    );

    // Suspended agents are skipped entirely.
    let result = simulation.step().await.unwrap();
    assert!(result.actions.is_empty());
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn agent_timeout_discards_partial_turn() {
    let provider = MockProvider::new("too slow").with_delay(Duration::from_millis(200));
    let mut simulation = simulation_with(provider, |config| {
        config.step.agent_timeout_seconds = 0.02;
        config.step.on_agent_error = ErrorStrategy::LogAndContinue;
    });

    let result = simulation.step().await.unwrap();
    assert_eq!(result.status, StepStatus::Completed);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].contains("timed out"));
    assert_eq!(result.messages_sent, 0);
}

#[tokio::test]
async fn step_timeout_surfaces_as_timeout_status() {
    let provider = MockProvider::new("slow").with_delay(Duration::from_millis(60));
    let mut simulation = simulation_with(provider, |config| {
        config.step.step_timeout_seconds = 0.03;
        // One agent per batch so the deadline check runs between batches.
        config.step.max_concurrent_agents = 1;
    });

    let result = simulation.step().await.unwrap();
    assert_eq!(result.status, StepStatus::Timeout);
    assert!(result.errors.iter().any(|e| e.contains("step timeout")));
}

#[tokio::test]
async fn pause_parks_the_run_until_resumed() {
    let provider = MockProvider::new("Hi.");
    let mut simulation = simulation_with(provider, |config| {
        config.max_steps = 2;
    });
    simulation.initialize().unwrap();
    simulation.pause();
    let controller = Arc::clone(simulation.controller());

    let handle = tokio::spawn(async move {
        let results = simulation.run(2).await.unwrap();
        (simulation, results)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished(), "run is parked while paused");

    controller.resume();
    let (simulation, results) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(simulation.status().status, SimulationStatus::Completed);
}

#[tokio::test]
async fn pause_auto_checkpoints_when_configured() {
    let provider = MockProvider::new("Hi.");
    let mut simulation = simulation_with(provider, |_| {});
    simulation.step().await.unwrap();

    simulation.pause();
    let checkpoints = simulation.checkpoints().list(None);
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].reason, "pause");
    assert_eq!(checkpoints[0].step, 1);
}

#[tokio::test]
async fn periodic_auto_checkpointing() {
    let provider = MockProvider::new("Hi.");
    let mut simulation = simulation_with(provider, |config| {
        config.step.checkpoint_every_n_steps = 2;
    });

    for _ in 0..4 {
        simulation.step().await.unwrap();
    }
    let checkpoints = simulation.checkpoints().list(None);
    assert_eq!(checkpoints.len(), 2, "steps 2 and 4 checkpointed");
    let reasons: Vec<&str> = checkpoints.iter().map(|c| c.reason.as_str()).collect();
    assert!(reasons.iter().all(|r| *r == "auto"));
}
