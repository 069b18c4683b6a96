//! Signal classification for raw upstream stream events
//!
//! The upstream reports most failures as plain text inside the event stream
//! rather than as structured error codes: a rate-limited session gets a
//! human-readable quota message, an expired cookie gets a login prompt, and a
//! bot challenge arrives as an interstitial HTML page. Content and end-of-turn
//! markers are the only well-formed JSON lines.
//!
//! Classification is pure and order-independent: the same raw line always
//! yields the same signal. Typed JSON probes run before the text pattern
//! tables so that generated content mentioning e.g. "rate limit" is never
//! misread as an upstream error.

use serde::Deserialize;

use crate::transport::StreamEvent;

/// Tagged signal produced from one raw upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Incremental fragment of generated text.
    ContentDelta(String),
    /// Generation for this request has finished.
    TurnEnd,
    /// The session hit its usage quota; lock the credential and fail over.
    RateLimited,
    /// The session cookie is not (or no longer) signed in; fail over.
    Unauthenticated,
    /// Bot-challenge interstitial; systemic, not credential-specific.
    ChallengeDetected,
    /// The session has no access to the requested model; fail over.
    PermissionDenied,
    /// Blank line or SSE keep-alive; skip silently.
    Ignored,
    /// Unrecognized event; skipped by the translator, kept for debug logs.
    Malformed(String),
}

/// Quota message fragments in the upstream's rate-limit responses.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit exceeded",
    "exceeded the rate limit",
    "usage limit",
    "too many requests",
];

/// Login-wall fragments returned for expired or signed-out session cookies.
const NOT_LOGIN_PATTERNS: &[&str] = &[
    "not logged in",
    "log in to sourcegraph",
    "unauthenticated",
    "invalid access token",
];

/// Bot-challenge interstitial signatures.
const CHALLENGE_PATTERNS: &[&str] = &[
    "just a moment",
    "cf-chl",
    "challenge-platform",
    "attention required",
];

/// End-of-turn marker: `{"stopReason":"end_turn"}`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopEvent {
    #[allow(dead_code)]
    stop_reason: String,
}

/// Content marker: `{"deltaText":"..."}`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeltaEvent {
    delta_text: String,
}

/// Classify one raw event, taking its transport status into account.
///
/// Events from a healthy 2xx stream are classified purely by their body line.
/// For non-2xx events (the upstream's "no permission for this model" arrives
/// as an HTTP 400 on the stream, and a failed handshake is folded into the
/// stream as a single status-bearing event), a challenge signature in the
/// body wins over the status — challenge interstitials ship with 403/503 and
/// must not be mistaken for a credential problem.
pub fn classify_event(event: &StreamEvent) -> Signal {
    if (200..300).contains(&event.status) {
        return classify_line(&event.data);
    }

    let lower = event.data.to_lowercase();
    if CHALLENGE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Signal::ChallengeDetected;
    }

    match event.status {
        400 => Signal::PermissionDenied,
        401 | 403 => Signal::Unauthenticated,
        429 => Signal::RateLimited,
        _ => classify_line(&event.data),
    }
}

/// Classify one raw body line.
///
/// Steps, in fixed priority order:
/// 1. trim and strip an optional `data: ` framing prefix; blank → `Ignored`
/// 2. typed JSON probes: `stopReason` → `TurnEnd`, `deltaText` → `ContentDelta`
/// 3. text pattern tables (case-insensitive substring): challenge, then
///    rate limit, then login wall
/// 4. anything else → `Malformed`
pub fn classify_line(raw: &str) -> Signal {
    let line = raw.trim();
    let line = line.strip_prefix("data: ").unwrap_or(line).trim();

    if line.is_empty() {
        return Signal::Ignored;
    }

    if serde_json::from_str::<StopEvent>(line).is_ok() {
        return Signal::TurnEnd;
    }
    if let Ok(delta) = serde_json::from_str::<DeltaEvent>(line) {
        return Signal::ContentDelta(delta.delta_text);
    }

    let lower = line.to_lowercase();
    if CHALLENGE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Signal::ChallengeDetected;
    }
    if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Signal::RateLimited;
    }
    if NOT_LOGIN_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Signal::Unauthenticated;
    }

    Signal::Malformed(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_is_turn_end() {
        assert_eq!(classify_line(r#"{"stopReason":"end_turn"}"#), Signal::TurnEnd);
    }

    #[test]
    fn stop_reason_ignores_surrounding_whitespace() {
        assert_eq!(
            classify_line("   {\"stopReason\":\"end_turn\"}  \n"),
            Signal::TurnEnd
        );
    }

    #[test]
    fn stop_reason_with_sse_framing() {
        assert_eq!(
            classify_line(r#"data: {"stopReason":"end_turn"}"#),
            Signal::TurnEnd
        );
    }

    #[test]
    fn delta_text_is_content() {
        assert_eq!(
            classify_line(r#"{"deltaText":"hello"}"#),
            Signal::ContentDelta("hello".into())
        );
    }

    #[test]
    fn delta_text_preserves_whitespace_in_content() {
        assert_eq!(
            classify_line(r#"{"deltaText":"  spaced  "}"#),
            Signal::ContentDelta("  spaced  ".into())
        );
    }

    #[test]
    fn delta_mentioning_rate_limit_is_still_content() {
        // Generated text about rate limits must not trigger failover.
        assert_eq!(
            classify_line(r#"{"deltaText":"the rate limit exceeded message means..."}"#),
            Signal::ContentDelta("the rate limit exceeded message means...".into())
        );
    }

    #[test]
    fn blank_line_is_ignored() {
        assert_eq!(classify_line(""), Signal::Ignored);
        assert_eq!(classify_line("   \n"), Signal::Ignored);
    }

    #[test]
    fn rate_limit_phrasing_detected() {
        assert_eq!(
            classify_line("Rate limit exceeded. Try again later."),
            Signal::RateLimited
        );
        assert_eq!(
            classify_line("you have reached your usage limit for Cody"),
            Signal::RateLimited
        );
    }

    #[test]
    fn rate_limit_is_case_insensitive() {
        assert_eq!(classify_line("RATE LIMIT EXCEEDED"), Signal::RateLimited);
    }

    #[test]
    fn login_wall_detected() {
        assert_eq!(
            classify_line("You are not logged in. Log in to Sourcegraph to continue."),
            Signal::Unauthenticated
        );
        assert_eq!(classify_line("Invalid access token"), Signal::Unauthenticated);
    }

    #[test]
    fn challenge_page_detected() {
        assert_eq!(
            classify_line("<title>Just a moment...</title>"),
            Signal::ChallengeDetected
        );
        assert_eq!(
            classify_line("<script src=\"/cdn-cgi/challenge-platform/h/b\"></script>"),
            Signal::ChallengeDetected
        );
    }

    #[test]
    fn unrecognized_json_is_malformed() {
        assert_eq!(
            classify_line(r#"{"completion":"legacy shape"}"#),
            Signal::Malformed(r#"{"completion":"legacy shape"}"#.into())
        );
    }

    #[test]
    fn non_json_noise_is_malformed() {
        assert_eq!(
            classify_line("event: completion"),
            Signal::Malformed("event: completion".into())
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let lines = [
            r#"{"stopReason":"end_turn"}"#,
            r#"{"deltaText":"x"}"#,
            "Rate limit exceeded",
            "not logged in",
            "garbage",
        ];
        for line in lines {
            assert_eq!(classify_line(line), classify_line(line));
        }
    }

    #[test]
    fn status_400_is_permission_denied() {
        let event = StreamEvent {
            status: 400,
            data: String::new(),
        };
        assert_eq!(classify_event(&event), Signal::PermissionDenied);
    }

    #[test]
    fn status_401_and_403_are_unauthenticated() {
        for status in [401, 403] {
            let event = StreamEvent {
                status,
                data: "whatever".into(),
            };
            assert_eq!(classify_event(&event), Signal::Unauthenticated);
        }
    }

    #[test]
    fn status_429_is_rate_limited() {
        let event = StreamEvent {
            status: 429,
            data: String::new(),
        };
        assert_eq!(classify_event(&event), Signal::RateLimited);
    }

    #[test]
    fn status_200_delegates_to_line_classification() {
        let event = StreamEvent {
            status: 200,
            data: r#"{"deltaText":"hi"}"#.into(),
        };
        assert_eq!(classify_event(&event), Signal::ContentDelta("hi".into()));
    }

    #[test]
    fn challenge_body_wins_over_forbidden_status() {
        let event = StreamEvent {
            status: 403,
            data: "<title>Just a moment...</title>".into(),
        };
        assert_eq!(classify_event(&event), Signal::ChallengeDetected);
    }

    #[test]
    fn challenge_phrase_in_2xx_delta_is_still_content() {
        let event = StreamEvent {
            status: 200,
            data: r#"{"deltaText":"just a moment, thinking"}"#.into(),
        };
        assert_eq!(
            classify_event(&event),
            Signal::ContentDelta("just a moment, thinking".into())
        );
    }
}
