//! Sourcegraph completions upstream
//!
//! Everything that speaks the Sourcegraph dialect: the streaming completions
//! endpoint and its headers, the provider-shaped request payload (speaker/text
//! messages), the classifier that maps raw stream events to tagged signals,
//! and the transport boundary behind which the actual HTTP client lives.
//!
//! The request path through this crate:
//! 1. Caller builds a [`CompletionPayload`] from an inbound chat request
//! 2. A [`CompletionTransport`] opens one streaming call per attempt
//! 3. Each raw [`StreamEvent`] is mapped by [`classify_event`] to a [`Signal`]
//! 4. The caller decides retry/abort/emit per signal — this crate stays
//!    stateless across events

pub mod classify;
pub mod constants;
pub mod error;
pub mod payload;
pub mod transport;

pub use classify::{Signal, classify_event, classify_line};
pub use error::{Error, Result};
pub use payload::{CompletionPayload, SpeakerMessage};
pub use transport::{CompletionTransport, EventStream, HttpTransport, StreamEvent};
