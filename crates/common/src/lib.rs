//! Common types for the Sourcegraph OpenAI proxy

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
