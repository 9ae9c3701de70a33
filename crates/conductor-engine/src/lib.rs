//! Workflow orchestration engine for Conductor.
//!
//! Sequences calls to collaborator services, applies per-step failure
//! policy, accumulates step outputs in a typed run context, and streams
//! status events to the caller's status channel.
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | run id → status connection; best-effort delivery |
//! | [`workflow`] | step definitions and policies |
//! | [`pipeline`] | the voice pipelines and the workflow table |
//! | [`engine`] | the per-run state machine |
//! | [`supervisor`] | run tasks, duplicate rejection, cancellation, drain |
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = StatusRegistry::new();
//! let engine = Engine::new(ServiceClient::new(RetryPolicy::default())?, registry.clone(), EngineConfig::default());
//! let workflow = pipeline::audio_pipeline(&endpoints);
//!
//! let mut conn = registry.register("run-1");
//! let run = WorkflowRun::new("run-1", workflow.name(), PipelineContext::from_audio("run-1", audio));
//! let run = engine.execute(&workflow, run, CancelSignal::never()).await;
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod supervisor;
pub mod workflow;

pub use context::{PipelineContext, RunContext};
pub use engine::{Engine, EngineConfig, StepOutcome, StepResult, WorkflowRun, CANCELLED_MESSAGE};
pub use error::{SpawnError, StepFailure, ValidationError};
pub use pipeline::{PipelineEndpoints, WorkflowTable, AUDIO_PIPELINE, FALLBACK_RESPONSE, TEXT_PIPELINE};
pub use registry::{StatusConnection, StatusRegistry};
pub use supervisor::{CancelHandle, CancelSignal, RunSupervisor};
pub use workflow::{StepControl, StepDefinition, StepPolicy, Workflow, WorkflowSummary};
