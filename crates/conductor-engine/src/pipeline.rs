//! The voice pipelines and the workflow table that names them.
//!
//! `audio_pipeline`:
//!
//! | # | Step | Service | Policy |
//! |---|------|---------|--------|
//! | 1 | `vad` | vad | required; no speech short-circuits to complete |
//! | 2 | `asr` | asr | required |
//! | 3 | `intent` | intent | required |
//! | 4 | `memory_user` | memory | optional |
//! | 5 | `llm` | llm | fallback reply on failure |
//! | 6 | `memory_assistant` | memory | optional |
//! | 7 | `tts` | tts | optional; result omits `audio_url` on failure |
//!
//! `text_pipeline` is the same list starting at step 3.

use crate::context::PipelineContext;
use crate::error::ValidationError;
use crate::workflow::{StepControl, StepDefinition, Workflow, WorkflowSummary};
use conductor_client::{CallRequest, Endpoint};
use conductor_types::Collaborator;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const AUDIO_PIPELINE: &str = "audio_pipeline";
pub const TEXT_PIPELINE: &str = "text_pipeline";

/// Reply substituted when text generation fails.
pub const FALLBACK_RESPONSE: &str = "Sorry, I could not generate a response right now.";

/// Result of a run whose audio contained no speech.
pub fn no_speech_result() -> Value {
    json!({ "error": "No speech detected" })
}

/// Endpoints for every collaborator the pipelines call.
#[derive(Debug, Clone)]
pub struct PipelineEndpoints {
    pub vad: Endpoint,
    pub asr: Endpoint,
    pub intent: Endpoint,
    pub memory: Endpoint,
    pub llm: Endpoint,
    pub tts: Endpoint,
}

impl PipelineEndpoints {
    /// Builds endpoints from per-service base URLs and timeouts.
    pub fn from_base_urls(services: &BTreeMap<Collaborator, (String, Duration)>) -> Self {
        let endpoint = |c: Collaborator, path: &str| {
            let (url, timeout) = services
                .get(&c)
                .cloned()
                .unwrap_or_else(|| (String::new(), Duration::from_secs(10)));
            Endpoint::new(c, &url, path, timeout)
        };
        Self {
            vad: endpoint(Collaborator::Vad, "/detect"),
            asr: endpoint(Collaborator::Asr, "/transcribe"),
            intent: endpoint(Collaborator::Intent, "/classify"),
            memory: endpoint(Collaborator::Memory, "/store"),
            llm: endpoint(Collaborator::Llm, "/generate"),
            tts: endpoint(Collaborator::Tts, "/synthesize"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ValidationError> {
    value
        .as_deref()
        .ok_or_else(|| ValidationError::new(format!("missing {}", field)))
}

fn str_field<'a>(response: &'a Value, field: &str) -> Result<&'a str, ValidationError> {
    response
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::new(format!("response has no string field `{}`", field)))
}

fn audio_input(ctx: &PipelineContext) -> Result<CallRequest, ValidationError> {
    ctx.audio
        .clone()
        .map(CallRequest::Bytes)
        .ok_or_else(|| ValidationError::new("missing audio"))
}

fn vad_output(ctx: &mut PipelineContext, response: &Value) -> Result<StepControl, ValidationError> {
    let detected = response
        .get("detected_speech")
        .and_then(Value::as_bool)
        .ok_or_else(|| ValidationError::new("response has no boolean field `detected_speech`"))?;
    ctx.detected_speech = Some(detected);
    if detected {
        Ok(StepControl::Continue)
    } else {
        Ok(StepControl::ShortCircuit(no_speech_result()))
    }
}

fn asr_output(ctx: &mut PipelineContext, response: &Value) -> Result<StepControl, ValidationError> {
    let text = str_field(response, "text")?;
    ctx.text = Some(text.trim().to_string());
    Ok(StepControl::Continue)
}

fn intent_input(ctx: &PipelineContext) -> Result<CallRequest, ValidationError> {
    let text = required(&ctx.text, "text")?;
    Ok(CallRequest::Json(json!({ "text": text })))
}

fn intent_output(
    ctx: &mut PipelineContext,
    response: &Value,
) -> Result<StepControl, ValidationError> {
    ctx.intent = Some(str_field(response, "intent")?.to_string());
    Ok(StepControl::Continue)
}

fn memory_user_input(ctx: &PipelineContext) -> Result<CallRequest, ValidationError> {
    let text = required(&ctx.text, "text")?;
    Ok(CallRequest::Json(json!({
        "session_id": ctx.session_id,
        "role": "user",
        "content": text,
    })))
}

fn memory_assistant_input(ctx: &PipelineContext) -> Result<CallRequest, ValidationError> {
    let response = required(&ctx.response, "response")?;
    Ok(CallRequest::Json(json!({
        "session_id": ctx.session_id,
        "role": "assistant",
        "content": response,
    })))
}

fn memory_output(_: &mut PipelineContext, _: &Value) -> Result<StepControl, ValidationError> {
    Ok(StepControl::Continue)
}

fn llm_input(ctx: &PipelineContext) -> Result<CallRequest, ValidationError> {
    let text = required(&ctx.text, "text")?;
    Ok(CallRequest::Json(json!({
        "text": text,
        "intent": ctx.intent,
        "session_id": ctx.session_id,
    })))
}

fn llm_output(ctx: &mut PipelineContext, response: &Value) -> Result<StepControl, ValidationError> {
    ctx.response = Some(str_field(response, "response")?.to_string());
    Ok(StepControl::Continue)
}

fn llm_fallback(ctx: &mut PipelineContext) {
    ctx.response = Some(FALLBACK_RESPONSE.to_string());
}

fn tts_input(ctx: &PipelineContext) -> Result<CallRequest, ValidationError> {
    let response = required(&ctx.response, "response")?;
    Ok(CallRequest::Json(json!({ "text": response })))
}

fn tts_output(ctx: &mut PipelineContext, response: &Value) -> Result<StepControl, ValidationError> {
    ctx.audio_url = Some(str_field(response, "audio_url")?.to_string());
    Ok(StepControl::Continue)
}

fn validate_audio(ctx: &PipelineContext) -> Result<(), ValidationError> {
    match &ctx.audio {
        Some(audio) if !audio.is_empty() => Ok(()),
        _ => Err(ValidationError::new("audio payload is empty")),
    }
}

fn validate_text(ctx: &PipelineContext) -> Result<(), ValidationError> {
    match &ctx.text {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err(ValidationError::new("text is empty")),
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Steps shared by both pipelines, from intent classification onward.
fn conversation_steps(
    workflow: Workflow<PipelineContext>,
    endpoints: &PipelineEndpoints,
) -> Workflow<PipelineContext> {
    workflow
        .step(StepDefinition::required(
            "intent",
            endpoints.intent.clone(),
            intent_input,
            intent_output,
        ))
        .step(StepDefinition::optional(
            "memory_user",
            endpoints.memory.clone(),
            memory_user_input,
            memory_output,
        ))
        .step(
            StepDefinition::required("llm", endpoints.llm.clone(), llm_input, llm_output)
                .with_fallback(llm_fallback),
        )
        .step(StepDefinition::optional(
            "memory_assistant",
            endpoints.memory.clone(),
            memory_assistant_input,
            memory_output,
        ))
        .step(StepDefinition::optional(
            "tts",
            endpoints.tts.clone(),
            tts_input,
            tts_output,
        ))
}

/// VAD → ASR → intent → memory → LLM → memory → TTS.
pub fn audio_pipeline(endpoints: &PipelineEndpoints) -> Workflow<PipelineContext> {
    let workflow = Workflow::new(AUDIO_PIPELINE, validate_audio)
        .step(StepDefinition::required(
            "vad",
            endpoints.vad.clone(),
            audio_input,
            vad_output,
        ))
        .step(StepDefinition::required(
            "asr",
            endpoints.asr.clone(),
            audio_input,
            asr_output,
        ));
    conversation_steps(workflow, endpoints)
}

/// Intent → memory → LLM → memory → TTS, for callers that already have text.
pub fn text_pipeline(endpoints: &PipelineEndpoints) -> Workflow<PipelineContext> {
    conversation_steps(Workflow::new(TEXT_PIPELINE, validate_text), endpoints)
}

/// Static table of workflow name → definition.
#[derive(Debug, Clone, Default)]
pub struct WorkflowTable {
    workflows: BTreeMap<String, Arc<Workflow<PipelineContext>>>,
}

impl WorkflowTable {
    /// The table with both voice pipelines registered.
    pub fn standard(endpoints: &PipelineEndpoints) -> Self {
        let mut table = Self::default();
        table.insert(audio_pipeline(endpoints));
        table.insert(text_pipeline(endpoints));
        table
    }

    pub fn insert(&mut self, workflow: Workflow<PipelineContext>) {
        self.workflows
            .insert(workflow.name().to_string(), Arc::new(workflow));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Workflow<PipelineContext>>> {
        self.workflows.get(name).cloned()
    }

    pub fn describe(&self) -> Vec<WorkflowSummary> {
        self.workflows.values().map(|w| w.describe()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepPolicy;
    use bytes::Bytes;

    fn endpoints() -> PipelineEndpoints {
        let services = Collaborator::ALL
            .iter()
            .map(|c| (*c, (format!("http://{}:1", c), Duration::from_secs(1))))
            .collect();
        PipelineEndpoints::from_base_urls(&services)
    }

    #[test]
    fn audio_pipeline_order_and_policies() {
        let workflow = audio_pipeline(&endpoints());
        let outline: Vec<_> = workflow
            .steps()
            .iter()
            .map(|s| (s.name, s.collaborator(), s.policy))
            .collect();

        assert_eq!(
            outline,
            vec![
                ("vad", Collaborator::Vad, StepPolicy::Required),
                ("asr", Collaborator::Asr, StepPolicy::Required),
                ("intent", Collaborator::Intent, StepPolicy::Required),
                ("memory_user", Collaborator::Memory, StepPolicy::Optional),
                ("llm", Collaborator::Llm, StepPolicy::Fallback),
                ("memory_assistant", Collaborator::Memory, StepPolicy::Optional),
                ("tts", Collaborator::Tts, StepPolicy::Optional),
            ]
        );
        assert_eq!(workflow.steps()[0].endpoint.url, "http://vad:1/detect");
    }

    #[test]
    fn text_pipeline_skips_audio_steps() {
        let workflow = text_pipeline(&endpoints());
        assert_eq!(workflow.steps().len(), 5);
        assert_eq!(workflow.steps()[0].name, "intent");
    }

    #[test]
    fn vad_without_speech_short_circuits() {
        let mut ctx = PipelineContext::from_audio("s", vec![1u8].into());
        let control = vad_output(&mut ctx, &json!({"detected_speech": false})).unwrap();
        assert_eq!(control, StepControl::ShortCircuit(no_speech_result()));
        assert_eq!(ctx.detected_speech, Some(false));
    }

    #[test]
    fn rejected_response_leaves_context_untouched() {
        let mut ctx = PipelineContext::from_text("s", "hello");
        assert!(intent_output(&mut ctx, &json!({"status": "ok"})).is_err());
        assert!(ctx.intent.is_none());
    }

    #[test]
    fn validators() {
        assert!(validate_audio(&PipelineContext::from_audio("s", Bytes::new())).is_err());
        assert!(validate_audio(&PipelineContext::from_audio("s", vec![0u8; 4].into())).is_ok());
        assert!(validate_text(&PipelineContext::from_text("s", "   ")).is_err());
        assert!(validate_text(&PipelineContext::from_text("s", "hi")).is_ok());
    }

    #[test]
    fn table_lists_both_pipelines() {
        let table = WorkflowTable::standard(&endpoints());
        assert!(table.get(AUDIO_PIPELINE).is_some());
        assert!(table.get(TEXT_PIPELINE).is_some());
        assert!(table.get("video_pipeline").is_none());
        let names: Vec<_> = table.describe().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec![AUDIO_PIPELINE, TEXT_PIPELINE]);
    }
}
