//! Stream translation state machine
//!
//! One translator exists per attempt and owns all attempt-scoped state: the
//! content accumulator, the finish reason, and the Active/Done flag. On
//! failover the orchestrator simply drops the translator and constructs a
//! fresh one, so nothing leaks across credential switches.
//!
//! The translator is pure: `apply` returns a [`Step`] describing what the
//! caller should do (emit a chunk, finish, or nothing). All I/O — channel
//! sends, SSE framing, the `[DONE]` marker — happens in the orchestrator.

use std::time::{SystemTime, UNIX_EPOCH};

use sourcegraph::Signal;

use crate::openai::{
    ChatCompletionChunk, ChatCompletionResponse, Choice, ChunkChoice, Delta, ResponseMessage,
    Usage,
};
use crate::tokenizer;

/// Whether chunks are emitted as they arrive or buffered for one aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Streaming,
    Buffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Done,
}

/// What the orchestrator should do after applying one signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing to emit; keep pulling events.
    Continue,
    /// Emit one content chunk downstream, then keep pulling.
    Emit(ChatCompletionChunk),
    /// The turn is complete. In streaming mode the terminal chunk still needs
    /// emitting; in buffered mode there is nothing to send.
    Finish(Option<ChatCompletionChunk>),
}

/// Per-attempt translator folding classified signals into OpenAI shapes.
pub struct StreamTranslator {
    id: String,
    model: String,
    created: u64,
    mode: Mode,
    state: State,
    content: String,
    finish_reason: Option<String>,
}

impl StreamTranslator {
    pub fn new(id: String, model: String, mode: Mode) -> Self {
        Self {
            id,
            model,
            created: unix_now(),
            mode,
            state: State::Active,
            content: String::new(),
            finish_reason: None,
        }
    }

    /// Fold one classified signal. Signals that require pool-level action
    /// (rate limit, login wall, challenge, permission) must be intercepted by
    /// the orchestrator before translation; if one slips through it is
    /// treated as inert.
    pub fn apply(&mut self, signal: Signal) -> Step {
        if self.state == State::Done {
            return Step::Continue;
        }
        match signal {
            Signal::ContentDelta(text) => {
                self.content.push_str(&text);
                match self.mode {
                    Mode::Streaming => Step::Emit(self.content_chunk(text)),
                    Mode::Buffered => Step::Continue,
                }
            }
            Signal::TurnEnd => {
                self.state = State::Done;
                self.finish_reason = Some("stop".to_string());
                match self.mode {
                    Mode::Streaming => Step::Finish(Some(self.terminal_chunk())),
                    Mode::Buffered => Step::Finish(None),
                }
            }
            Signal::Malformed(_) | Signal::Ignored => Step::Continue,
            Signal::RateLimited
            | Signal::Unauthenticated
            | Signal::ChallengeDetected
            | Signal::PermissionDenied => Step::Continue,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Accumulated content so far (buffered mode consumes it via
    /// [`into_response`](Self::into_response)).
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Build the aggregated non-streaming response. `prompt_source` is the
    /// serialized upstream payload; both token counts come from the external
    /// tokenizer.
    pub fn into_response(self, prompt_source: &str) -> ChatCompletionResponse {
        let prompt_tokens = tokenizer::count_tokens(prompt_source, &self.model);
        let completion_tokens = tokenizer::count_tokens(&self.content, &self.model);
        ChatCompletionResponse {
            id: self.id,
            object: "chat.completion",
            created: self.created,
            model: self.model,
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant",
                    content: self.content,
                },
                finish_reason: self.finish_reason,
            }],
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        }
    }

    fn content_chunk(&self, text: String) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: Some("assistant"),
                    content: Some(text),
                },
                finish_reason: None,
            }],
        }
    }

    fn terminal_chunk(&self) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
