//! Session-cookie pool for the upstream completions provider
//!
//! Holds the fixed set of session cookies configured at startup and tracks
//! per-cookie lockout state. Requests start from a uniformly random cookie
//! and rotate deterministically through pool order on failover; a cookie that
//! hit its quota is locked for a cooldown window but never removed — it is
//! revisited once the window passes.
//!
//! Cookie lifecycle within one request:
//! 1. Orchestrator acquires a random starting cookie
//! 2. Upstream reports a quota message → cookie locked for the cooldown window
//! 3. Orchestrator advances to the next cookie in pool order (wrapping)
//! 4. After every distinct cookie has been tried, the request fails over to
//!    the caller as pool exhaustion
//!
//! Lockout expiry is implicit: a lock simply stops mattering once its instant
//! passes; there is no unlock operation and no background task.

pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use pool::{Credential, CredentialPool};
