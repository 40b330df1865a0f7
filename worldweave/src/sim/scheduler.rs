//! Step scheduler: PERCEIVE → ACT → COMMIT.
//!
//! The scheduler is the sole source of concurrency. Within a batch only the
//! LLM calls run in parallel (bounded by the gateway semaphore and the batch
//! size); everything that mutates state — directive parsing, app execution,
//! message staging — applies sequentially in scheduled order, so two actions
//! on one app instance never commit concurrently and a seeded run is
//! reproducible. Controller signals are polled between phases and batches;
//! a cancelled step stages no messages into the log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::agent::Agent;
use crate::apps::parser::parse_message;
use crate::llm::{CompletionRequest, LlmCompletion};
use crate::sim::control::{retry_with_backoff, with_timeout, ErrorStrategy};
use crate::sim::ordering::{batch_agents, order_agents, OrderingInputs};
use crate::sim::runner::{SimError, Simulation, SimulationStatus};
use crate::sim::step::{AgentAction, AgentActionKind, StepContext, StepPhase, StepResult, StepStatus};
use crate::message::Message;
use sim_event::SimEvent;

impl Simulation {
    /// Executes one full step.
    pub async fn step(&mut self) -> Result<StepResult, SimError> {
        self.initialize()?;
        if matches!(
            self.status,
            SimulationStatus::Completed | SimulationStatus::Cancelled
        ) {
            return Err(SimError::Scheduler(format!(
                "simulation is {}",
                self.status
            )));
        }
        if self.status == SimulationStatus::Created {
            self.bus.emit(SimEvent::SimulationStarted);
        }
        self.status = SimulationStatus::Running;

        let step = self.current_step + 1;
        let context = StepContext {
            step,
            simulation_id: self.id.clone(),
            ordering: self.config.ordering,
            seed: self.config.master_seed,
        };
        let started = Instant::now();
        self.bus.emit(SimEvent::StepStarted { step });
        let mut result = StepResult::new(step, StepStatus::InProgress);

        // PERCEIVE: deliver last step's messages and app observations.
        self.phase_started(step, StepPhase::Perceive);
        self.perceive(step).await;
        self.phase_completed(step, StepPhase::Perceive);

        if self.controller.is_cancelled() {
            return Ok(self.finish_cancelled(step, started, result));
        }

        // ACT: ordered batches of agent turns.
        self.phase_started(step, StepPhase::Act);
        let mut staged: Vec<Message> = Vec::new();
        self.act(&context, started, &mut result, &mut staged).await;
        self.phase_completed(step, StepPhase::Act);

        if result.status == StepStatus::Cancelled {
            return Ok(self.finish_cancelled(step, started, result));
        }

        // COMMIT: messages enter the log, observations wait for the next
        // PERCEIVE, counters and checkpoints update.
        self.phase_started(step, StepPhase::Commit);
        result.messages_sent = staged.len();
        for message in &staged {
            self.bus.emit(SimEvent::MessageCreated {
                message: serde_json::to_value(message).unwrap_or(serde_json::Value::Null),
            });
        }
        self.messages.extend(staged.iter().cloned());
        self.inbox = staged;
        self.current_step = step;

        let cadence = self.config.step.checkpoint_every_n_steps;
        if cadence > 0 && step % cadence == 0 {
            let checkpoint = self.checkpoint("auto");
            self.bus.emit(SimEvent::CheckpointCreated {
                checkpoint_id: checkpoint.metadata.id,
                step,
            });
        }
        self.phase_completed(step, StepPhase::Commit);

        if result.status == StepStatus::InProgress {
            result.status = StepStatus::Completed;
        }
        result.duration_seconds = started.elapsed().as_secs_f64();
        self.bus.emit(SimEvent::StepCompleted {
            step,
            status: format!("{:?}", result.status).to_lowercase(),
        });
        Ok(result)
    }

    fn phase_started(&self, step: u64, phase: StepPhase) {
        self.bus.emit(SimEvent::PhaseStarted {
            step,
            phase: phase.name().to_string(),
        });
    }

    fn phase_completed(&self, step: u64, phase: StepPhase) {
        self.bus.emit(SimEvent::PhaseCompleted {
            step,
            phase: phase.name().to_string(),
        });
    }

    fn finish_cancelled(
        &mut self,
        step: u64,
        started: Instant,
        mut result: StepResult,
    ) -> StepResult {
        // Messages from agents that did not complete ACT are discarded;
        // nothing enters the log.
        result.status = StepStatus::Cancelled;
        result.duration_seconds = started.elapsed().as_secs_f64();
        self.status = SimulationStatus::Cancelled;
        self.bus.emit(SimEvent::StepCompleted {
            step,
            status: "cancelled".into(),
        });
        result
    }

    /// Delivers queued messages and app observations into agent memories.
    async fn perceive(&mut self, _step: u64) {
        let inbox = std::mem::take(&mut self.inbox);
        let mode = self.config.routing_mode;

        for message in inbox {
            let recipients: Vec<String> = match &message.receiver_id {
                Some(receiver) => {
                    if self.topology.can_send(&message.sender_id, receiver, mode) {
                        vec![receiver.clone()]
                    } else {
                        Vec::new()
                    }
                }
                None => self.topology.valid_recipients(&message.sender_id, mode),
            };
            let sender_name = self
                .agents
                .get(&message.sender_id)
                .map(|agent| agent.name.clone())
                .unwrap_or_else(|| message.sender_id.clone());

            for recipient in recipients {
                if let Some(memory) = self.memories.get_mut(&recipient) {
                    let observation = memory
                        .add_observation(
                            format!("{} said: {}", sender_name, message.content),
                            message.sender_id.clone(),
                            None,
                        )
                        .await;
                    self.bus.emit(SimEvent::MemoryCreated {
                        agent_id: recipient.clone(),
                        memory: serde_json::to_value(&observation)
                            .unwrap_or(serde_json::Value::Null),
                    });
                }
            }
        }

        // App observations enqueued during the previous step.
        let app_ids: Vec<String> = self.apps.keys().cloned().collect();
        let agent_ids: Vec<String> = self.agents.keys().cloned().collect();
        for app_id in app_ids {
            for agent_id in &agent_ids {
                let observations = self
                    .apps
                    .get(&app_id)
                    .map(|app| app.pop_observations(agent_id))
                    .unwrap_or_default();
                for observation in observations {
                    self.bus.emit(SimEvent::AppObservationSent {
                        app_id: app_id.clone(),
                        to_agent: agent_id.clone(),
                    });
                    if let Some(memory) = self.memories.get_mut(agent_id) {
                        let stored = memory
                            .add_observation(
                                observation.message.clone(),
                                format!("app:{}", app_id),
                                None,
                            )
                            .await;
                        self.bus.emit(SimEvent::MemoryCreated {
                            agent_id: agent_id.clone(),
                            memory: serde_json::to_value(&stored)
                                .unwrap_or(serde_json::Value::Null),
                        });
                    }
                }
            }
        }
    }

    /// Runs the ordered agent batches.
    async fn act(
        &mut self,
        context: &StepContext,
        started: Instant,
        result: &mut StepResult,
        staged: &mut Vec<Message>,
    ) {
        let step = context.step;
        let policy = self.config.step.clone();
        let step_deadline = Duration::from_secs_f64(policy.step_timeout_seconds);
        let agent_timeout = Duration::from_secs_f64(policy.agent_timeout_seconds);

        let agent_ids: Vec<String> = self.agents.keys().cloned().collect();
        let priorities: std::collections::HashMap<String, f64> = self
            .agents
            .values()
            .map(|agent| (agent.id.clone(), agent.priority))
            .collect();
        let ordered = order_agents(
            context.ordering,
            &agent_ids,
            &OrderingInputs {
                step,
                master_seed: context.seed,
                priorities: &priorities,
                topology: Some(&self.topology),
                hub_id: self.config.topology.hub_id.as_deref(),
            },
        );
        let eligible: Vec<String> = ordered
            .into_iter()
            .filter(|agent_id| !self.controller.is_agent_suspended(agent_id))
            .collect();

        for batch in batch_agents(&eligible, policy.max_concurrent_agents) {
            self.controller.wait_if_paused().await;
            if self.controller.is_cancelled() {
                result.status = StepStatus::Cancelled;
                return;
            }
            if started.elapsed() >= step_deadline {
                result.status = StepStatus::Timeout;
                result.errors.push("step timeout exceeded".into());
                return;
            }

            // Prompts are built up front; only the model calls run in
            // parallel below.
            let mut turns: Vec<(String, CompletionRequest)> = Vec::new();
            for agent_id in &batch {
                if let Some(agent) = self.agents.get(agent_id) {
                    self.bus.emit(SimEvent::AgentThinking {
                        agent_id: agent_id.clone(),
                        step,
                    });
                    turns.push((agent_id.clone(), self.build_request(agent, step)));
                }
            }

            let gateway = Arc::clone(&self.gateway);
            let retrying = policy.on_agent_error == ErrorStrategy::Retry;
            let max_retries = policy.max_retries;
            let outcomes = join_all(turns.into_iter().map(|(agent_id, request)| {
                let gateway = Arc::clone(&gateway);
                async move {
                    let call = async {
                        if retrying {
                            retry_with_backoff(
                                || gateway.complete(request.clone()),
                                max_retries,
                                Duration::from_millis(200),
                            )
                            .await
                            .map(|(completion, _)| completion)
                        } else {
                            gateway.complete(request.clone()).await
                        }
                    };
                    let (value, outcome) = with_timeout(call, agent_timeout).await;
                    (agent_id, value, outcome)
                }
            }))
            .await;

            // Effects apply in scheduled order; a timed-out agent's partial
            // results are discarded here by construction.
            for (agent_id, value, outcome) in outcomes {
                match value {
                    None => {
                        self.handle_agent_error(&agent_id, "agent turn timed out", step, result)
                    }
                    Some(Err(error)) => {
                        self.handle_agent_error(&agent_id, &error.to_string(), step, result)
                    }
                    Some(Ok(completion)) => self.handle_agent_reply(
                        &agent_id,
                        completion,
                        outcome.duration,
                        step,
                        result,
                        staged,
                    ),
                }
                if result.status == StepStatus::Failed {
                    return;
                }
            }
        }
    }

    fn handle_agent_error(
        &mut self,
        agent_id: &str,
        error: &str,
        step: u64,
        result: &mut StepResult,
    ) {
        tracing::warn!(agent = agent_id, step, error, "agent turn failed");
        result.errors.push(format!("{}: {}", agent_id, error));
        result.actions.push(AgentAction::error(agent_id, step, error));

        let policy = &self.config.step;
        match policy.on_agent_error {
            ErrorStrategy::FailFast => {
                result.status = StepStatus::Failed;
            }
            ErrorStrategy::SuspendAgent => {
                let suspended = self.controller.record_agent_failure(
                    agent_id,
                    policy.on_agent_error,
                    policy.max_consecutive_failures,
                );
                if suspended {
                    self.bus.emit(SimEvent::AgentSuspended {
                        agent_id: agent_id.to_string(),
                        step,
                    });
                }
            }
            ErrorStrategy::LogAndContinue | ErrorStrategy::Retry => {}
        }
    }

    fn handle_agent_reply(
        &mut self,
        agent_id: &str,
        completion: LlmCompletion,
        latency: Duration,
        step: u64,
        result: &mut StepResult,
        staged: &mut Vec<Message>,
    ) {
        self.controller.record_agent_success(agent_id);
        let tokens = completion.total_tokens() as u64;
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.record_usage(tokens, completion.cost);
        }
        result.tokens_used += tokens;
        result.cost += completion.cost;

        let parsed = parse_message(&completion.content);
        for error in &parsed.errors {
            result
                .errors
                .push(format!("{}: {}", agent_id, error.message));
        }

        for action in &parsed.actions {
            match self.apps.get_mut(&action.app_id) {
                None => {
                    result.errors.push(format!(
                        "{}: directive names unknown app '{}'",
                        agent_id, action.app_id
                    ));
                }
                Some(app) => {
                    self.bus.emit(SimEvent::AppActionRequested {
                        app_id: action.app_id.clone(),
                        agent_id: agent_id.to_string(),
                        action: action.action.clone(),
                    });
                    app.set_step(step);
                    let outcome = app.execute(agent_id, &action.action, action.params.clone());
                    if outcome.success {
                        self.bus.emit(SimEvent::AppActionExecuted {
                            app_id: action.app_id.clone(),
                            agent_id: agent_id.to_string(),
                            action: action.action.clone(),
                            success: true,
                        });
                    } else {
                        self.bus.emit(SimEvent::AppActionFailed {
                            app_id: action.app_id.clone(),
                            agent_id: agent_id.to_string(),
                            action: action.action.clone(),
                            error: outcome.error.clone().unwrap_or_default(),
                        });
                    }
                }
            }
        }

        let clean = parsed.message_without_actions.clone();
        let kind = if !clean.is_empty() {
            AgentActionKind::Speak
        } else if !parsed.actions.is_empty() {
            AgentActionKind::Observe
        } else {
            AgentActionKind::Idle
        };

        if !clean.is_empty() {
            self.outputs.push(clean.clone());
            staged.push(Message::new(
                self.id.clone(),
                agent_id,
                None,
                clean.clone(),
                step,
            ));
            self.bus.emit(SimEvent::AgentResponded {
                agent_id: agent_id.to_string(),
                step,
            });
        }

        let mut action = AgentAction::speak(agent_id, step, clean);
        action.kind = kind;
        action.tokens_used = tokens;
        action.cost = completion.cost;
        action.latency_ms = latency.as_millis() as u64;
        result.actions.push(action);
    }

    /// Builds an agent's memory-augmented prompt for this step.
    fn build_request(&self, agent: &Agent, step: u64) -> CompletionRequest {
        let mut sections: Vec<String> = Vec::new();

        let app_help = self.render_app_help(&agent.id);
        if !app_help.is_empty() {
            sections.push(app_help);
        }
        if let Some(memory) = self.memories.get(&agent.id) {
            let context = memory.context_for_prompt(8);
            if !context.is_empty() {
                sections.push(context);
            }
        }
        sections.push(format!(
            "It is step {} of the conversation. Reply in character with a \
             short message. Include an APP_ACTION directive line only when \
             you want to act on an app.",
            step
        ));

        let mut request = CompletionRequest::new(sections.join("\n\n"))
            .with_system_prompt(agent.system_prompt.clone())
            .with_temperature(self.config.llm.temperature)
            .attributed(agent.id.clone(), step);
        request.max_tokens = self.config.llm.max_tokens;
        request.use_cache = self.config.llm.use_cache;
        if let Some(model) = &agent.model {
            request.model = Some(model.clone());
        }
        request
    }

    fn render_app_help(&self, agent_id: &str) -> String {
        if self.apps.is_empty() {
            return String::new();
        }
        let mut lines = vec![
            "You can operate apps by writing directive lines in your reply:".to_string(),
            "APP_ACTION: <app>.<action>(key=value, ...)".to_string(),
        ];
        for (app_id, app) in &self.apps {
            lines.push(format!("- {}: {}", app_id, app.description()));
            for action in &app.definition().actions {
                let params: Vec<String> = action
                    .parameters
                    .iter()
                    .map(|p| format!("{}: {}", p.name, p.param_type.name()))
                    .collect();
                lines.push(format!("  - {}({})", action.name, params.join(", ")));
            }
            lines.push(format!(
                "  Your current {} state: {}",
                app_id,
                app.agent_view(agent_id)
            ));
        }
        lines.join("\n")
    }
}
