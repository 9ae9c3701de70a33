//! HTTP client for Conductor collaborator services.
//!
//! Every collaborator (VAD, ASR, intent, memory, LLM, TTS) is an independent
//! HTTP service that accepts either raw bytes or JSON and answers with JSON.
//! [`ServiceClient`] issues one logical call with a bounded retry policy and
//! classifies the outcome:
//!
//! | Outcome | Retried | Surfaced as |
//! |---------|---------|-------------|
//! | 2xx with a JSON body | no | `Ok(Value)` |
//! | connection refused / timeout | yes | [`CallError::Transport`] |
//! | 5xx | yes | [`CallError::Status`] |
//! | 4xx | no | [`CallError::Status`] |
//! | 2xx with a non-JSON body | no | [`CallError::Decode`] |

pub mod client;
pub mod config;
pub mod error;

pub use client::{CallRequest, RetryNotice, ServiceClient};
pub use config::{Endpoint, RetryPolicy};
pub use error::{CallError, FailureKind};
