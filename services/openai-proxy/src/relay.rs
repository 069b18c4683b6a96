//! Request orchestration across the cookie pool
//!
//! One [`Relay`] per process drives every completion request through the same
//! loop: acquire a random starting cookie, open one upstream stream per
//! attempt, classify each raw event, and either feed the translator, fail
//! over to the next cookie, or abort. The attempt count is bounded by the
//! pool size — once every distinct cookie has been tried the request fails
//! with pool exhaustion.
//!
//! Streaming responses are produced by feeding serialized SSE payloads into
//! an mpsc channel; the HTTP handler owns the receiving end. A closed channel
//! means the client went away, and the relay abandons the upstream stream
//! instead of draining it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use sourcegraph::{CompletionPayload, CompletionTransport, Signal, SpeakerMessage, classify_event};
use sourcegraph_pool::{Credential, CredentialPool};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics;
use crate::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::registry::{self, ModelInfo};
use crate::translate::{Mode, Step, StreamTranslator};

/// Stream-termination marker required by the OpenAI SSE protocol.
pub const DONE_MARKER: &str = "[DONE]";

/// A validated request, resolved against the registry before any transport
/// call. Construction failing is what guarantees `ModelNotFound` never
/// reaches the upstream.
#[derive(Debug)]
pub struct RequestPlan {
    model: String,
    info: &'static ModelInfo,
    messages: Vec<SpeakerMessage>,
}

impl RequestPlan {
    pub fn from_request(request: &ChatCompletionRequest) -> Result<Self, ApiError> {
        let info = registry::lookup(&request.model)
            .ok_or_else(|| ApiError::ModelNotFound(request.model.clone()))?;

        let messages: Vec<SpeakerMessage> = request
            .messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| SpeakerMessage::from_role(&m.role, &m.content))
            .collect();
        if messages.is_empty() {
            return Err(ApiError::InvalidRequest(
                "messages must contain at least one non-empty message".into(),
            ));
        }

        Ok(Self {
            model: request.model.clone(),
            info,
            messages,
        })
    }
}

/// How one attempt ended. `Complete` is terminal for the request; the
/// retryable variants advance the cookie rotation.
enum Outcome {
    Complete,
    RateLimited,
    Unauthenticated,
    PermissionDenied,
    StreamEnded,
    ClientGone,
}

/// Per-process orchestrator shared by all request handlers.
pub struct Relay {
    pool: Arc<CredentialPool>,
    transport: Arc<dyn CompletionTransport>,
    cooldown: Duration,
}

impl Relay {
    pub fn new(
        pool: Arc<CredentialPool>,
        transport: Arc<dyn CompletionTransport>,
        cooldown: Duration,
    ) -> Self {
        Self {
            pool,
            transport,
            cooldown,
        }
    }

    /// Non-streaming entry point: run the attempt loop and return the
    /// aggregated response.
    pub async fn complete(&self, plan: &RequestPlan) -> Result<ChatCompletionResponse, ApiError> {
        match self.drive(plan, None).await? {
            Some(response) => Ok(response),
            // Only the streaming path can abort without a response.
            None => Err(ApiError::UpstreamTransport("response aborted".into())),
        }
    }

    /// Streaming entry point: feed serialized SSE payloads into `tx`.
    /// Failures after chunks have been flushed are reported as an error event;
    /// the `[DONE]` marker always terminates the stream.
    pub async fn stream(&self, plan: RequestPlan, tx: mpsc::Sender<String>) {
        match self.drive(&plan, Some(&tx)).await {
            Ok(_) => {}
            Err(err) => {
                warn!(code = err.code(), "streaming request failed: {err}");
                if let Ok(envelope) = serde_json::to_string(&err.envelope()) {
                    let _ = tx.send(envelope).await;
                }
            }
        }
        let _ = tx.send(DONE_MARKER.to_string()).await;
    }

    /// The attempt loop. `emitter` present means streaming mode; `Ok(None)`
    /// means the stream was fully emitted (or the client went away).
    async fn drive(
        &self,
        plan: &RequestPlan,
        emitter: Option<&mpsc::Sender<String>>,
    ) -> Result<Option<ChatCompletionResponse>, ApiError> {
        let max_attempts = self.pool.len();
        let mut credential = self.pool.acquire_random().map_err(|_| ApiError::PoolEmpty)?;
        let response_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
        let mode = if emitter.is_some() {
            Mode::Streaming
        } else {
            Mode::Buffered
        };

        for attempt in 1..=max_attempts {
            if let Some(tx) = emitter
                && tx.is_closed()
            {
                debug!("client disconnected, abandoning request");
                return Ok(None);
            }

            // A cookie that is still cooling down was "tried" for the purposes
            // of this request: it consumes an attempt slot without an upstream
            // call.
            if self.pool.is_locked(&credential, Instant::now()).await {
                debug!(
                    cookie = credential.masked(),
                    attempt, "cookie locked, counting as tried"
                );
                credential = self.pool.next(&credential).map_err(|_| ApiError::PoolEmpty)?;
                continue;
            }

            let payload = CompletionPayload::new(
                plan.info.provider_ref,
                plan.messages.clone(),
                plan.info.max_tokens,
            );
            let prompt_source = payload
                .to_json()
                .map_err(|e| ApiError::UpstreamTransport(e.to_string()))?;

            debug!(
                cookie = credential.masked(),
                attempt,
                max_attempts,
                model = %plan.model,
                "opening upstream stream"
            );
            let mut events = self
                .transport
                .open_stream(&payload, credential.token())
                .await
                .map_err(|e| ApiError::UpstreamTransport(e.to_string()))?;

            let mut translator =
                StreamTranslator::new(response_id.clone(), plan.model.clone(), mode);
            let mut outcome = Outcome::StreamEnded;

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| ApiError::UpstreamTransport(e.to_string()))?;
                match classify_event(&event) {
                    Signal::ChallengeDetected => {
                        warn!(attempt, "challenge interstitial detected, aborting request");
                        metrics::record_upstream_signal("challenge");
                        return Err(ApiError::ChallengeDetected);
                    }
                    Signal::RateLimited => {
                        outcome = Outcome::RateLimited;
                        break;
                    }
                    Signal::Unauthenticated => {
                        outcome = Outcome::Unauthenticated;
                        break;
                    }
                    Signal::PermissionDenied => {
                        outcome = Outcome::PermissionDenied;
                        break;
                    }
                    signal => match translator.apply(signal) {
                        Step::Continue => {}
                        Step::Emit(chunk) => {
                            if let Some(tx) = emitter
                                && !send_chunk(tx, &chunk).await
                            {
                                outcome = Outcome::ClientGone;
                                break;
                            }
                        }
                        Step::Finish(terminal) => {
                            if let (Some(tx), Some(chunk)) = (emitter, terminal)
                                && !send_chunk(tx, &chunk).await
                            {
                                outcome = Outcome::ClientGone;
                                break;
                            }
                            outcome = Outcome::Complete;
                            break;
                        }
                    },
                }
            }

            match outcome {
                Outcome::Complete => {
                    info!(attempt, model = %plan.model, "completion finished");
                    return Ok(match mode {
                        Mode::Streaming => None,
                        Mode::Buffered => Some(translator.into_response(&prompt_source)),
                    });
                }
                Outcome::ClientGone => {
                    debug!("client disconnected mid-stream, abandoning request");
                    return Ok(None);
                }
                Outcome::RateLimited => {
                    metrics::record_upstream_signal("rate_limited");
                    metrics::record_lockout();
                    self.pool
                        .lock(&credential, Instant::now() + self.cooldown)
                        .await;
                    warn!(
                        cookie = credential.masked(),
                        attempt, max_attempts, "cookie rate limited, failing over"
                    );
                    credential = self.advance(&credential)?;
                }
                Outcome::Unauthenticated => {
                    metrics::record_upstream_signal("unauthenticated");
                    warn!(
                        cookie = credential.masked(),
                        attempt, max_attempts, "cookie not signed in, failing over"
                    );
                    credential = self.advance(&credential)?;
                }
                Outcome::PermissionDenied => {
                    metrics::record_upstream_signal("permission_denied");
                    warn!(
                        cookie = credential.masked(),
                        attempt,
                        max_attempts,
                        model = %plan.model,
                        "cookie lacks access to this model, failing over"
                    );
                    credential = self.advance(&credential)?;
                }
                Outcome::StreamEnded => {
                    return Err(ApiError::UpstreamTransport(
                        "stream ended before end of turn".into(),
                    ));
                }
            }
        }

        warn!(attempts = max_attempts, "all session cookies exhausted");
        Err(ApiError::PoolExhausted)
    }

    fn advance(&self, current: &Credential) -> Result<Credential, ApiError> {
        metrics::record_failover();
        self.pool.next(current).map_err(|_| ApiError::PoolEmpty)
    }
}

/// Serialize and send one chunk. `false` means the receiver is gone.
async fn send_chunk(tx: &mpsc::Sender<String>, chunk: &ChatCompletionChunk) -> bool {
    match serde_json::to_string(chunk) {
        Ok(json) => tx.send(json).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialize chunk");
            false
        }
    }
}
