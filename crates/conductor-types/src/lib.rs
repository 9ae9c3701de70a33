//! Shared types for the Conductor orchestration platform.
//!
//! This crate provides the vocabulary used across all Conductor crates:
//! collaborator names, the run state machine, and the status events that
//! are streamed to callers while a workflow run executes.
//!
//! No crate in the workspace depends on anything *except* `conductor-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// External services a workflow step can call.
///
/// Each collaborator is an independently deployed HTTP service. The
/// orchestrator only knows its request/response contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collaborator {
    /// Voice-activity detection.
    Vad,
    /// Automatic speech recognition.
    Asr,
    /// Intent classification.
    Intent,
    /// Conversation memory storage.
    Memory,
    /// Text generation.
    Llm,
    /// Speech synthesis.
    Tts,
}

impl Collaborator {
    /// All collaborators, in canonical pipeline order.
    pub const ALL: [Collaborator; 6] = [
        Self::Vad,
        Self::Asr,
        Self::Intent,
        Self::Memory,
        Self::Llm,
        Self::Tts,
    ];

    /// Returns the canonical lowercase name used in logs, config and events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vad => "vad",
            Self::Asr => "asr",
            Self::Intent => "intent",
            Self::Memory => "memory",
            Self::Llm => "llm",
            Self::Tts => "tts",
        }
    }
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collaborator {
    type Err = ParseCollaboratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vad" => Ok(Self::Vad),
            "asr" => Ok(Self::Asr),
            "intent" => Ok(Self::Intent),
            "memory" => Ok(Self::Memory),
            "llm" => Ok(Self::Llm),
            "tts" => Ok(Self::Tts),
            _ => Err(ParseCollaboratorError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown collaborator name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown collaborator: {0}")]
pub struct ParseCollaboratorError(pub String);

/// Lifecycle of a single workflow run.
///
/// `Pending → Running → {StepRunning ↔ StepDone}* → Complete | Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created but not yet scheduled.
    Pending,
    /// Scheduled; the `start` event has been emitted.
    Running,
    /// A step's collaborator call is in flight.
    StepRunning,
    /// The most recent step reached a final outcome.
    StepDone,
    /// Finished normally, including short-circuits.
    Complete,
    /// Stopped by a required-step failure, invalid input, or cancellation.
    Aborted,
}

impl RunState {
    /// Whether no further events may be emitted for the run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

/// Status values carried by [`StatusEvent`], using their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "service_start")]
    StepStart,
    #[serde(rename = "service_running")]
    StepRunning,
    #[serde(rename = "service_success")]
    StepSuccess,
    #[serde(rename = "service_error")]
    StepError,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
}

impl EventStatus {
    /// Returns the wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StepStart => "service_start",
            Self::StepRunning => "service_running",
            Self::StepSuccess => "service_success",
            Self::StepError => "service_error",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Whether this status ends a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A progress message for one run, delivered best-effort to its status
/// channel and never retained after delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: EventStatus,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Collaborator>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl StatusEvent {
    fn new(status: EventStatus, run_id: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            run_id: run_id.to_string(),
            service: None,
            message: message.into(),
            result: None,
        }
    }

    pub fn start(run_id: &str, workflow: &str) -> Self {
        Self::new(
            EventStatus::Start,
            run_id,
            format!("Starting workflow {}", workflow),
        )
    }

    pub fn step_start(run_id: &str, service: Collaborator) -> Self {
        Self {
            service: Some(service),
            ..Self::new(
                EventStatus::StepStart,
                run_id,
                format!("Calling {} service", service),
            )
        }
    }

    pub fn step_running(run_id: &str, service: Collaborator, message: impl Into<String>) -> Self {
        Self {
            service: Some(service),
            ..Self::new(EventStatus::StepRunning, run_id, message)
        }
    }

    pub fn step_success(run_id: &str, service: Collaborator, result: Value) -> Self {
        Self {
            service: Some(service),
            result: Some(result),
            ..Self::new(
                EventStatus::StepSuccess,
                run_id,
                format!("{} service completed", service),
            )
        }
    }

    pub fn step_error(run_id: &str, service: Collaborator, message: impl Into<String>) -> Self {
        Self {
            service: Some(service),
            ..Self::new(EventStatus::StepError, run_id, message)
        }
    }

    pub fn complete(run_id: &str, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::new(EventStatus::Complete, run_id, "Workflow completed")
        }
    }

    pub fn error(run_id: &str, message: impl Into<String>) -> Self {
        Self::new(EventStatus::Error, run_id, message)
    }
}

/// Immediate response to a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerAccepted {
    /// Always `"processing"`.
    pub status: String,
    pub run_id: String,
}

impl TriggerAccepted {
    pub fn processing(run_id: impl Into<String>) -> Self {
        Self {
            status: "processing".to_string(),
            run_id: run_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collaborator_round_trips_through_str() {
        for c in Collaborator::ALL {
            assert_eq!(c.as_str().parse::<Collaborator>().unwrap(), c);
        }
        assert!("gpu".parse::<Collaborator>().is_err());
    }

    #[test]
    fn step_events_use_service_wire_names() {
        let event = StatusEvent::step_success("run-1", Collaborator::Asr, json!({"text": "hi"}));
        let value = serde_json::to_value(&event).expect("serialization should not fail");

        assert_eq!(value["status"], "service_success");
        assert_eq!(value["service"], "asr");
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["result"]["text"], "hi");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = StatusEvent::error("run-2", "Speech recognition failed");
        let value = serde_json::to_value(&event).expect("serialization should not fail");

        assert_eq!(value["status"], "error");
        assert!(value.get("service").is_none());
        assert!(value.get("result").is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(EventStatus::Complete.is_terminal());
        assert!(EventStatus::Error.is_terminal());
        assert!(!EventStatus::StepError.is_terminal());
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::StepDone.is_terminal());
    }

    #[test]
    fn trigger_accepted_shape() {
        let value = serde_json::to_value(TriggerAccepted::processing("abc")).unwrap();
        assert_eq!(value, json!({"status": "processing", "run_id": "abc"}));
    }
}
