//! Provider-shaped completion payload
//!
//! The upstream wire format uses `speaker`/`text` message pairs and camelCase
//! sampling fields. The payload is built fresh for every attempt from the
//! caller's immutable chat request; nothing here is reused across attempts.

use serde::Serialize;

use crate::constants::{DEFAULT_TEMPERATURE, DEFAULT_TOP_K, DEFAULT_TOP_P};

/// One message in the upstream dialect.
///
/// The inbound `user` role maps to the upstream's `human` speaker; all other
/// roles (`assistant`, `system`, anything future) pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakerMessage {
    pub speaker: String,
    pub text: String,
}

impl SpeakerMessage {
    /// Map an OpenAI-style role/content pair into the upstream dialect.
    pub fn from_role(role: &str, content: &str) -> Self {
        let speaker = if role == "user" { "human" } else { role };
        Self {
            speaker: speaker.to_string(),
            text: content.to_string(),
        }
    }
}

/// Request body for the streaming completions endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    /// Provider-qualified model ref, e.g. `anthropic::2024-10-22::claude-3-5-sonnet-latest`
    pub model: String,
    pub messages: Vec<SpeakerMessage>,
    pub max_tokens_to_sample: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: i64,
}

impl CompletionPayload {
    /// Build a payload with the upstream sampling defaults.
    pub fn new(model_ref: &str, messages: Vec<SpeakerMessage>, max_tokens: u32) -> Self {
        Self {
            model: model_ref.to_string(),
            messages,
            max_tokens_to_sample: max_tokens,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Serialized form, used both as the request body and as the prompt-side
    /// input to token counting.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialize(e.to_string()))
    }
}
