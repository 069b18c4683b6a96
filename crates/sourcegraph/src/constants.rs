//! Sourcegraph completions endpoint constants
//!
//! The upstream only serves browser/editor sessions, so every request
//! identifies itself as the VS Code extension. None of these values are
//! secrets — the session cookie is the secret, and it never lives here.

/// Base URL of the upstream instance. Overridable in config for testing.
pub const BASE_URL: &str = "https://sourcegraph.com";

/// Streaming completions endpoint path, including the client identity the
/// upstream gates on.
pub const CHAT_ENDPOINT_PATH: &str =
    "/.api/completions/stream?api-version=9&client-name=vscode&client-version=1.82.0";

/// User-Agent matching the VS Code extension host.
pub const USER_AGENT: &str = "vscode/1.86.0 (Node.js v20.18.3)";

/// x-requested-with header value paired with the User-Agent above.
pub const REQUESTED_WITH: &str = "vscode 1.86.0";

/// Sampling defaults for the completions call. The upstream treats -1 as
/// "provider default" for topP/topK.
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_TOP_P: f64 = -1.0;
pub const DEFAULT_TOP_K: i64 = -1;
