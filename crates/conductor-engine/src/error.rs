use conductor_client::CallError;
use conductor_types::Collaborator;
use thiserror::Error;

/// Run input or step input that can never succeed. Permanent; no
/// collaborator is called.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why a single step did not reach success.
#[derive(Error, Debug, Clone)]
pub enum StepFailure {
    /// The collaborator call failed after the client's retry policy.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The step's input transform could not build a request from the context.
    #[error("invalid input for {collaborator}: {source}")]
    Input {
        collaborator: Collaborator,
        source: ValidationError,
    },

    /// The collaborator answered but the payload lacks what the step needs.
    #[error("unexpected response from {collaborator}: {source}")]
    Response {
        collaborator: Collaborator,
        source: ValidationError,
    },
}

impl StepFailure {
    /// Redacted, client-facing description.
    pub fn summary(&self) -> String {
        match self {
            Self::Call(e) => e.summary(),
            Self::Input { collaborator, .. } => {
                format!("{} service could not be called: missing input", collaborator)
            }
            Self::Response { collaborator, .. } => {
                format!("{} service returned an invalid response", collaborator)
            }
        }
    }
}

/// Errors returned when scheduling a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// A run with the same id is still in flight.
    #[error("run {0} is already in progress")]
    DuplicateRun(String),

    /// The supervisor is draining and accepts no new runs.
    #[error("shutting down; not accepting new runs")]
    ShuttingDown,
}
