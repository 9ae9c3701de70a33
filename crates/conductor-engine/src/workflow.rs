//! Workflow and step definitions.
//!
//! A workflow is a named, ordered list of steps. Definitions are immutable
//! once built and shared read-only by every run of the workflow.

use crate::error::ValidationError;
use conductor_client::{CallRequest, Endpoint};
use conductor_types::Collaborator;
use serde::Serialize;
use serde_json::Value;

/// Builds the collaborator request from the run context.
pub type InputTransform<C> = fn(&C) -> Result<CallRequest, ValidationError>;

/// Applies the collaborator response to the run context.
///
/// Implementations validate the whole response before writing anything, so
/// a rejected response leaves the context untouched.
pub type OutputTransform<C> = fn(&mut C, &Value) -> Result<StepControl, ValidationError>;

/// Writes a substitute value when a `Fallback` step fails.
pub type FallbackTransform<C> = fn(&mut C);

/// Checks run input before any step executes.
pub type InputValidator<C> = fn(&C) -> Result<(), ValidationError>;

/// What a step failure does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Failure aborts the run.
    Required,
    /// Failure is reported and the run continues without the step's outputs.
    Optional,
    /// Failure is reported, a fixed substitute is written, and the run continues.
    Fallback,
}

impl StepPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
            Self::Fallback => "fallback",
        }
    }
}

/// Flow decision returned by a successful output transform.
#[derive(Debug, Clone, PartialEq)]
pub enum StepControl {
    /// Proceed to the next step.
    Continue,
    /// Finish the run as complete with this result, skipping remaining steps.
    ShortCircuit(Value),
}

/// One step of a workflow, bound to exactly one collaborator endpoint.
pub struct StepDefinition<C> {
    /// Step label, unique within its workflow (e.g. `memory_user`).
    pub name: &'static str,
    pub endpoint: Endpoint,
    pub policy: StepPolicy,
    pub input: InputTransform<C>,
    pub output: OutputTransform<C>,
    pub fallback: Option<FallbackTransform<C>>,
}

impl<C> StepDefinition<C> {
    pub fn required(
        name: &'static str,
        endpoint: Endpoint,
        input: InputTransform<C>,
        output: OutputTransform<C>,
    ) -> Self {
        Self {
            name,
            endpoint,
            policy: StepPolicy::Required,
            input,
            output,
            fallback: None,
        }
    }

    pub fn optional(
        name: &'static str,
        endpoint: Endpoint,
        input: InputTransform<C>,
        output: OutputTransform<C>,
    ) -> Self {
        Self {
            policy: StepPolicy::Optional,
            ..Self::required(name, endpoint, input, output)
        }
    }

    /// Turns this step into a `Fallback` step that runs `fallback` on failure.
    pub fn with_fallback(mut self, fallback: FallbackTransform<C>) -> Self {
        self.policy = StepPolicy::Fallback;
        self.fallback = Some(fallback);
        self
    }

    pub fn collaborator(&self) -> Collaborator {
        self.endpoint.collaborator
    }
}

impl<C> std::fmt::Debug for StepDefinition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// A named, ordered list of steps.
pub struct Workflow<C> {
    name: String,
    steps: Vec<StepDefinition<C>>,
    validate: InputValidator<C>,
}

impl<C> Workflow<C> {
    pub fn new(name: impl Into<String>, validate: InputValidator<C>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            validate,
        }
    }

    pub fn step(mut self, step: StepDefinition<C>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepDefinition<C>] {
        &self.steps
    }

    pub fn validate(&self, context: &C) -> Result<(), ValidationError> {
        (self.validate)(context)
    }

    /// Serializable outline of the workflow for listings.
    pub fn describe(&self) -> WorkflowSummary {
        WorkflowSummary {
            name: self.name.clone(),
            steps: self
                .steps
                .iter()
                .map(|s| StepSummary {
                    name: s.name,
                    service: s.collaborator(),
                    policy: s.policy,
                })
                .collect(),
        }
    }
}

impl<C> std::fmt::Debug for Workflow<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub name: &'static str,
    pub service: Collaborator,
    pub policy: StepPolicy,
}
