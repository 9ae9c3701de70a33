//! The workflow engine: drives one run through its steps.

use crate::context::RunContext;
use crate::error::StepFailure;
use crate::registry::StatusRegistry;
use crate::supervisor::CancelSignal;
use crate::workflow::{StepControl, StepDefinition, StepPolicy, Workflow};
use chrono::{DateTime, Utc};
use conductor_client::{RetryNotice, ServiceClient};
use conductor_types::{Collaborator, RunState, StatusEvent};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Client-facing message for a run stopped by cancellation.
pub const CANCELLED_MESSAGE: &str = "run cancelled";

/// Engine tuning.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    /// Artificial pause between steps, used by demo deployments to make
    /// progress visible. Zero in production.
    pub step_delay: Duration,
}

/// Final outcome of one attempted step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The collaborator's raw response.
    Success(Value),
    /// The failure text, unredacted.
    Error(String),
}

/// Record of one attempted step. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: &'static str,
    pub collaborator: Collaborator,
    pub outcome: StepOutcome,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success(_))
    }
}

/// One execution of a workflow. Owned by the engine while it runs and handed
/// back to the caller once terminal.
#[derive(Debug)]
pub struct WorkflowRun<C> {
    pub run_id: String,
    pub workflow: String,
    pub state: RunState,
    /// Attempted steps, in definition order.
    pub steps: Vec<StepResult>,
    pub context: C,
    /// Payload of the `complete` event.
    pub result: Option<Value>,
    /// Message of the `error` event.
    pub error: Option<String>,
}

impl<C: RunContext> WorkflowRun<C> {
    pub fn new(run_id: impl Into<String>, workflow: impl Into<String>, context: C) -> Self {
        Self {
            run_id: run_id.into(),
            workflow: workflow.into(),
            state: RunState::Pending,
            steps: Vec::new(),
            context,
            result: None,
            error: None,
        }
    }
}

/// Executes workflow runs, calling collaborators through a shared
/// [`ServiceClient`] and reporting progress through a [`StatusRegistry`].
///
/// Cloning is cheap. Runs share nothing but the client's connection pool and
/// the registry.
#[derive(Clone)]
pub struct Engine {
    client: ServiceClient,
    registry: StatusRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(client: ServiceClient, registry: StatusRegistry, config: EngineConfig) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    /// Runs `run` to a terminal state and returns it.
    ///
    /// Emits `start`, then `service_start` and one of `service_success` /
    /// `service_error` per attempted step, then exactly one `complete` or
    /// `error`. Steps run strictly in order. `cancel` is checked before each
    /// step.
    pub async fn execute<C: RunContext>(
        &self,
        workflow: &Workflow<C>,
        run: WorkflowRun<C>,
        cancel: CancelSignal,
    ) -> WorkflowRun<C> {
        let span = tracing::info_span!("run", run_id = %run.run_id, workflow = %workflow.name());
        self.drive(workflow, run, cancel).instrument(span).await
    }

    async fn drive<C: RunContext>(
        &self,
        workflow: &Workflow<C>,
        mut run: WorkflowRun<C>,
        cancel: CancelSignal,
    ) -> WorkflowRun<C> {
        let run_id = run.run_id.clone();
        run.state = RunState::Running;
        tracing::info!("workflow run started");
        self.emit(StatusEvent::start(&run_id, workflow.name()));

        if let Err(e) = workflow.validate(&run.context) {
            tracing::warn!("rejected run input: {}", e);
            self.abort(&mut run, format!("Invalid input: {}", e));
            return run;
        }

        for (index, step) in workflow.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(step = step.name, "run cancelled before step");
                self.abort(&mut run, CANCELLED_MESSAGE.to_string());
                return run;
            }
            if index > 0 && !self.config.step_delay.is_zero() {
                tokio::time::sleep(self.config.step_delay).await;
            }

            let collaborator = step.collaborator();
            self.emit(StatusEvent::step_start(&run_id, collaborator));
            run.state = RunState::StepRunning;

            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = self.run_step(step, &mut run.context, &run_id).await;
            let duration = clock.elapsed();
            run.state = RunState::StepDone;

            match outcome {
                Ok((response, control)) => {
                    tracing::info!(
                        step = step.name,
                        collaborator = %collaborator,
                        duration_ms = duration.as_millis() as u64,
                        "step succeeded"
                    );
                    run.steps.push(StepResult {
                        step: step.name,
                        collaborator,
                        outcome: StepOutcome::Success(response.clone()),
                        started_at,
                        duration,
                    });
                    self.emit(StatusEvent::step_success(&run_id, collaborator, response));

                    if let StepControl::ShortCircuit(result) = control {
                        tracing::info!(step = step.name, "run short-circuited");
                        self.complete(&mut run, result);
                        return run;
                    }
                }
                Err(failure) => {
                    tracing::warn!(
                        step = step.name,
                        collaborator = %collaborator,
                        policy = step.policy.as_str(),
                        duration_ms = duration.as_millis() as u64,
                        "step failed: {}",
                        failure
                    );
                    run.steps.push(StepResult {
                        step: step.name,
                        collaborator,
                        outcome: StepOutcome::Error(failure.to_string()),
                        started_at,
                        duration,
                    });
                    let summary = failure.summary();

                    match step.policy {
                        StepPolicy::Required => {
                            self.emit(StatusEvent::step_error(&run_id, collaborator, &summary));
                            self.abort(&mut run, summary);
                            return run;
                        }
                        StepPolicy::Optional => {
                            self.emit(StatusEvent::step_error(&run_id, collaborator, summary));
                        }
                        StepPolicy::Fallback => {
                            if let Some(fallback) = step.fallback {
                                fallback(&mut run.context);
                            }
                            self.emit(StatusEvent::step_error(
                                &run_id,
                                collaborator,
                                format!("{}; using fallback", summary),
                            ));
                        }
                    }
                }
            }
        }

        let result = run.context.result();
        self.complete(&mut run, result);
        run
    }

    /// Calls the step's collaborator and applies its output transform.
    ///
    /// The context is written only when the call succeeded and the transform
    /// accepted the response.
    async fn run_step<C: RunContext>(
        &self,
        step: &StepDefinition<C>,
        context: &mut C,
        run_id: &str,
    ) -> Result<(Value, StepControl), StepFailure> {
        let collaborator = step.collaborator();
        let request = (step.input)(context)
            .map_err(|source| StepFailure::Input { collaborator, source })?;

        let registry = &self.registry;
        let response = self
            .client
            .call_observed(&step.endpoint, request, |notice: &RetryNotice| {
                registry.publish(&StatusEvent::step_running(
                    run_id,
                    collaborator,
                    format!(
                        "{}; retrying (attempt {}/{})",
                        notice.reason, notice.next_attempt, notice.max_attempts
                    ),
                ));
            })
            .await?;

        let control = (step.output)(context, &response)
            .map_err(|source| StepFailure::Response { collaborator, source })?;
        Ok((response, control))
    }

    fn emit(&self, event: StatusEvent) {
        tracing::debug!(status = %event.status, "emitting status event");
        self.registry.publish(&event);
    }

    fn complete<C: RunContext>(&self, run: &mut WorkflowRun<C>, result: Value) {
        run.state = RunState::Complete;
        run.result = Some(result.clone());
        tracing::info!(steps = run.steps.len(), "workflow run complete");
        self.emit(StatusEvent::complete(&run.run_id, result));
    }

    fn abort<C: RunContext>(&self, run: &mut WorkflowRun<C>, message: String) {
        run.state = RunState::Aborted;
        run.error = Some(message.clone());
        tracing::warn!(steps = run.steps.len(), reason = %message, "workflow run aborted");
        self.emit(StatusEvent::error(&run.run_id, message));
    }
}
