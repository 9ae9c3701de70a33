//! Typed run contexts.
//!
//! A run context accumulates the outputs of earlier steps for use as inputs
//! to later ones. Each workflow family has its own struct with named optional
//! fields; a field stays `None` when the step that writes it failed and was
//! tolerated.

use bytes::Bytes;
use serde_json::{json, Map, Value};

/// State owned by one run for the duration of its execution.
pub trait RunContext: Send + 'static {
    /// Terminal payload carried by the `complete` event.
    fn result(&self) -> Value;
}

/// Context shared by the voice pipelines.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    /// Conversation key for memory storage; the run id.
    pub session_id: String,
    /// Raw audio submitted by the caller.
    pub audio: Option<Bytes>,
    /// Written by VAD.
    pub detected_speech: Option<bool>,
    /// Recognized (ASR) or submitted text.
    pub text: Option<String>,
    /// Written by intent classification.
    pub intent: Option<String>,
    /// Generated reply, or the fallback reply when generation failed.
    pub response: Option<String>,
    /// Written by TTS; absent when synthesis failed.
    pub audio_url: Option<String>,
}

impl PipelineContext {
    pub fn from_audio(session_id: impl Into<String>, audio: Bytes) -> Self {
        Self {
            session_id: session_id.into(),
            audio: Some(audio),
            ..Self::default()
        }
    }

    pub fn from_text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

impl RunContext for PipelineContext {
    fn result(&self) -> Value {
        let mut result = Map::new();
        result.insert("text".into(), json!(self.text));
        result.insert("intent".into(), json!(self.intent));
        result.insert("response".into(), json!(self.response));
        if let Some(url) = &self.audio_url {
            result.insert("audio_url".into(), json!(url));
        }
        Value::Object(result)
    }
}
