use conductor_types::Collaborator;
use thiserror::Error;

/// How a failed call went wrong, independent of how many attempts were made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, reset, or timed out.
    Transport,
    /// The collaborator answered with a non-2xx status.
    Collaborator,
    /// The collaborator answered 2xx with a body that is not JSON.
    Decode,
}

/// Error surfaced by [`crate::ServiceClient::call`] once retries are exhausted
/// or a permanent failure is seen.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error("{collaborator} transport error after {attempts} attempt(s): {message}")]
    Transport {
        collaborator: Collaborator,
        attempts: u32,
        timed_out: bool,
        message: String,
    },

    #[error("{collaborator} returned HTTP {status} after {attempts} attempt(s): {body}")]
    Status {
        collaborator: Collaborator,
        attempts: u32,
        status: u16,
        body: String,
    },

    #[error("{collaborator} returned an undecodable response: {message}")]
    Decode {
        collaborator: Collaborator,
        attempts: u32,
        message: String,
    },
}

impl CallError {
    pub fn collaborator(&self) -> Collaborator {
        match self {
            Self::Transport { collaborator, .. }
            | Self::Status { collaborator, .. }
            | Self::Decode { collaborator, .. } => *collaborator,
        }
    }

    /// Number of attempts made before this error was surfaced.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Transport { attempts, .. }
            | Self::Status { attempts, .. }
            | Self::Decode { attempts, .. } => *attempts,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } => FailureKind::Transport,
            Self::Status { .. } => FailureKind::Collaborator,
            Self::Decode { .. } => FailureKind::Decode,
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Transport failures and 5xx statuses are retryable. A 4xx means the
    /// request itself is wrong and repeating it cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => (500..600).contains(status),
            Self::Decode { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timed_out: true, .. })
    }

    /// Short, client-safe description that never includes collaborator output.
    pub fn summary(&self) -> String {
        let collaborator = self.collaborator();
        match self {
            Self::Transport { timed_out: true, .. } => {
                format!("{} service timed out", collaborator)
            }
            Self::Transport { .. } => format!("{} service is unavailable", collaborator),
            Self::Status { status, .. } if (400..500).contains(status) => {
                format!("{} service rejected the request", collaborator)
            }
            Self::Status { .. } => format!("{} service failed", collaborator),
            Self::Decode { .. } => {
                format!("{} service returned an invalid response", collaborator)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> CallError {
        CallError::Status {
            collaborator: Collaborator::Llm,
            attempts: 1,
            status: code,
            body: "internal detail".to_string(),
        }
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
    }

    #[test]
    fn summary_is_redacted() {
        let summary = status(500).summary();
        assert_eq!(summary, "llm service failed");
        assert!(!summary.contains("internal detail"));
    }

    #[test]
    fn timeout_summary() {
        let err = CallError::Transport {
            collaborator: Collaborator::Asr,
            attempts: 3,
            timed_out: true,
            message: "operation timed out".to_string(),
        };
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), FailureKind::Transport);
        assert_eq!(err.summary(), "asr service timed out");
    }
}
