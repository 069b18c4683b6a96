//! Transport boundary for the streaming completions call
//!
//! The orchestrator never talks HTTP directly; it sees only the
//! [`CompletionTransport`] trait, which opens one streaming call per attempt
//! and yields raw [`StreamEvent`]s in upstream generation order. Tests swap
//! in scripted transports; production uses [`HttpTransport`] over reqwest.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn CompletionTransport>`).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

use crate::constants::{CHAT_ENDPOINT_PATH, REQUESTED_WITH, USER_AGENT};
use crate::error::{Error, Result};
use crate::payload::CompletionPayload;

/// One raw event from the upstream stream.
///
/// `status` is the HTTP status of the stream the event arrived on; a failed
/// handshake is represented as a single event carrying the failure status and
/// body so that classification stays in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub status: u16,
    pub data: String,
}

/// Sequential source of raw upstream events for one attempt.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Opens one streaming completions call per attempt.
pub trait CompletionTransport: Send + Sync {
    /// Open a stream using the given session cookie. Resolves once the
    /// upstream has accepted (or rejected) the call; event consumption is a
    /// blocking pull from the returned stream.
    fn open_stream<'a>(
        &'a self,
        payload: &'a CompletionPayload,
        cookie: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream>> + Send + 'a>>;
}

/// reqwest-backed transport for the live upstream.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport for `base_url` with a per-call timeout covering the
    /// whole stream. `proxy_url` routes egress through an HTTP(S) proxy.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        proxy_url: Option<&str>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy_url {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| Error::Request(format!("invalid proxy url: {e}")))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| Error::Request(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }
}

impl CompletionTransport for HttpTransport {
    fn open_stream<'a>(
        &'a self,
        payload: &'a CompletionPayload,
        cookie: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream>> + Send + 'a>> {
        Box::pin(async move {
            let body = payload.to_json()?;
            let timeout_secs = self.timeout.as_secs();

            let response = self
                .client
                .post(endpoint_url(&self.base_url))
                .header(reqwest::header::ACCEPT_ENCODING, "gzip;q=0")
                .header(reqwest::header::AUTHORIZATION, format!("token {cookie}"))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .header("x-requested-with", REQUESTED_WITH)
                .header("x-sourcegraph-interaction-id", Uuid::new_v4().to_string())
                .header("traceparent", traceparent())
                .timeout(self.timeout)
                .body(body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        Error::Timeout(timeout_secs)
                    } else {
                        Error::Request(e.to_string())
                    }
                })?;

            let status = response.status().as_u16();
            if !response.status().is_success() {
                debug!(status, "upstream handshake returned non-success status");
                let data = response.text().await.unwrap_or_default();
                let event = StreamEvent { status, data };
                let single = futures_util::stream::once(async move { Ok(event) });
                return Ok(Box::pin(single) as EventStream);
            }

            let events = response.bytes_stream().eventsource().map(move |item| {
                match item {
                    Ok(event) => Ok(StreamEvent {
                        status,
                        data: event.data,
                    }),
                    Err(eventsource_stream::EventStreamError::Transport(e)) if e.is_timeout() => {
                        Err(Error::Timeout(timeout_secs))
                    }
                    Err(e) => Err(Error::Stream(e.to_string())),
                }
            });
            Ok(Box::pin(events) as EventStream)
        })
    }
}

/// Join the configured base URL with the completions endpoint path.
fn endpoint_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), CHAT_ENDPOINT_PATH)
}

/// W3C traceparent with fresh random trace and span ids.
fn traceparent() -> String {
    let trace_id = Uuid::new_v4().simple().to_string();
    let span_id = Uuid::new_v4().simple().to_string();
    format!("00-{}-{}-01", trace_id, &span_id[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_joins_without_double_slash() {
        let url = endpoint_url("https://sourcegraph.com/");
        assert!(url.starts_with("https://sourcegraph.com/.api/completions/stream"));
        assert!(!url.contains("com//"));
    }

    #[test]
    fn endpoint_url_carries_client_identity() {
        let url = endpoint_url("https://sourcegraph.com");
        assert!(url.contains("api-version=9"));
        assert!(url.contains("client-name=vscode"));
    }

    #[test]
    fn traceparent_is_well_formed() {
        let tp = traceparent();
        let parts: Vec<&str> = tp.split('-').collect();
        assert_eq!(parts.len(), 4, "got: {tp}");
        assert_eq!(parts[0], "00");
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3], "01");
        assert!(
            parts[1].chars().all(|c| c.is_ascii_hexdigit()),
            "trace id must be hex: {tp}"
        );
    }

    #[test]
    fn traceparent_ids_are_fresh_per_call() {
        assert_ne!(traceparent(), traceparent());
    }

    #[test]
    fn transport_builder_rejects_bad_proxy() {
        let result = HttpTransport::new(
            "https://sourcegraph.com",
            Duration::from_secs(600),
            Some("not a url"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn transport_builder_accepts_no_proxy() {
        let result = HttpTransport::new("https://sourcegraph.com", Duration::from_secs(600), None);
        assert!(result.is_ok());
    }
}
