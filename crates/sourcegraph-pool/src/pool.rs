//! Pool state and rotation
//!
//! The pool is an ordered, fixed-size sequence of session cookies plus a
//! per-cookie lockout instant. Rotation identity travels with the
//! [`Credential`] handle (its pool index), so `next` is a pure wrapping
//! advance — availability is the caller's concern, checked via `is_locked`.
//!
//! Lock writes go through a `tokio::sync::RwLock`; concurrent availability
//! reads are cheap, and two requests locking the same cookie resolve
//! last-writer-wins.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use common::Secret;
use rand::RngExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Handle to one pool entry: the cookie value plus its pool position.
///
/// Clones are cheap; the token is shared, not copied. Debug and the `masked`
/// accessor never expose more than the last four characters.
#[derive(Clone)]
pub struct Credential {
    index: usize,
    token: Arc<str>,
    masked: Arc<str>,
}

impl Credential {
    /// The session cookie value, for the transport's auth header.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Masked cookie id for logs and the status endpoint.
    pub fn masked(&self) -> &str {
        &self.masked
    }

    /// Position in pool order.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("token", &self.masked)
            .finish()
    }
}

/// Fixed-size cookie pool shared by all request handlers.
pub struct CredentialPool {
    entries: Vec<Credential>,
    locked_until: RwLock<Vec<Option<Instant>>>,
}

impl CredentialPool {
    /// Build a pool from the configured cookies. Order is preserved; it is
    /// the rotation order. An empty pool is constructible but every acquire
    /// fails — callers validate at startup.
    pub fn new(cookies: Vec<Secret<String>>) -> Self {
        let entries: Vec<Credential> = cookies
            .iter()
            .enumerate()
            .map(|(index, cookie)| Credential {
                index,
                token: Arc::from(cookie.expose().as_str()),
                masked: Arc::from(cookie.masked().as_str()),
            })
            .collect();
        let locked_until = RwLock::new(vec![None; entries.len()]);
        debug!(cookies = entries.len(), "credential pool initialized");
        Self {
            entries,
            locked_until,
        }
    }

    /// Number of cookies in the pool; also the per-request attempt bound.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Uniformly random starting cookie. Does not touch lock state.
    pub fn acquire_random(&self) -> Result<Credential> {
        if self.entries.is_empty() {
            return Err(Error::PoolEmpty);
        }
        let index = rand::rng().random_range(0..self.entries.len());
        Ok(self.entries[index].clone())
    }

    /// The cookie following `current` in pool order, wrapping. Skips none:
    /// the caller decides what to do with a locked cookie.
    pub fn next(&self, current: &Credential) -> Result<Credential> {
        if self.entries.is_empty() {
            return Err(Error::PoolEmpty);
        }
        let index = (current.index + 1) % self.entries.len();
        Ok(self.entries[index].clone())
    }

    /// Lock a cookie until `until`. Idempotent; concurrent locks on the same
    /// cookie resolve last-writer-wins.
    pub async fn lock(&self, credential: &Credential, until: Instant) {
        let mut locked = self.locked_until.write().await;
        if let Some(slot) = locked.get_mut(credential.index) {
            *slot = Some(until);
            warn!(cookie = credential.masked(), "cookie locked for cooldown");
        }
    }

    /// Whether the cookie is locked as of `now`. A lock whose instant has
    /// passed reports unlocked; there is no explicit unlock.
    pub async fn is_locked(&self, credential: &Credential, now: Instant) -> bool {
        let locked = self.locked_until.read().await;
        matches!(locked.get(credential.index), Some(Some(until)) if *until > now)
    }

    /// Pool summary for the health endpoint: overall status plus per-cookie
    /// state under masked ids.
    pub async fn status(&self) -> serde_json::Value {
        let locked = self.locked_until.read().await;
        let now = Instant::now();

        let mut cookies = Vec::new();
        let mut available = 0usize;

        for entry in &self.entries {
            match locked.get(entry.index).copied().flatten() {
                Some(until) if until > now => {
                    cookies.push(serde_json::json!({
                        "id": entry.masked(),
                        "status": "locked",
                        "lock_remaining_secs": (until - now).as_secs(),
                    }));
                }
                _ => {
                    available += 1;
                    cookies.push(serde_json::json!({
                        "id": entry.masked(),
                        "status": "available",
                    }));
                }
            }
        }

        let total = self.entries.len();
        let pool_status = if available == total && total > 0 {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "cookies_total": total,
            "cookies_available": available,
            "cookies_locked": total - available,
            "cookies": cookies,
        })
    }
}
