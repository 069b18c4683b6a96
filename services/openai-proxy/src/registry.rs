//! Static model registry
//!
//! Maps public OpenAI-style model names to the upstream's provider-qualified
//! refs. The table is fixed at compile time; `lookup` gates every completion
//! request before any transport call is made.

/// Registry entry: upstream ref plus the per-request sampling cap.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub provider_ref: &'static str,
    pub max_tokens: u32,
}

const MAX_TOKENS_TO_SAMPLE: u32 = 4000;

const MODELS: &[(&str, ModelInfo)] = &[
    (
        "claude-3-5-haiku-latest",
        ModelInfo {
            provider_ref: "anthropic::2024-10-22::claude-3-5-haiku-latest",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "claude-3-5-sonnet-latest",
        ModelInfo {
            provider_ref: "anthropic::2024-10-22::claude-3-5-sonnet-latest",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "claude-3-7-sonnet-extended-thinking",
        ModelInfo {
            provider_ref: "anthropic::2024-10-22::claude-3-7-sonnet-extended-thinking",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "claude-3-7-sonnet-latest",
        ModelInfo {
            provider_ref: "anthropic::2024-10-22::claude-3-7-sonnet-latest",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "gemini-1.5-pro",
        ModelInfo {
            provider_ref: "google::v1::gemini-1.5-pro",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "gemini-2.0-flash-exp",
        ModelInfo {
            provider_ref: "google::v1::gemini-2.0-flash-exp",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "gemini-2.0-flash-lite",
        ModelInfo {
            provider_ref: "google::v1::gemini-2.0-flash-lite",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "gemini-2.0-pro-exp-02-05",
        ModelInfo {
            provider_ref: "google::v1::gemini-2.0-pro-exp-02-05",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "gpt-4o",
        ModelInfo {
            provider_ref: "openai::2024-02-01::gpt-4o",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "gpt-4o-mini",
        ModelInfo {
            provider_ref: "openai::2024-02-01::gpt-4o-mini",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "o1",
        ModelInfo {
            provider_ref: "openai::2024-02-01::o1",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
    (
        "o3-mini-medium",
        ModelInfo {
            provider_ref: "openai::2024-02-01::o3-mini-medium",
            max_tokens: MAX_TOKENS_TO_SAMPLE,
        },
    ),
];

/// Resolve a public model name. `None` means the request must be rejected
/// before any upstream call.
pub fn lookup(name: &str) -> Option<&'static ModelInfo> {
    MODELS
        .iter()
        .find(|(model, _)| *model == name)
        .map(|(_, info)| info)
}

/// All public model names in stable (table) order.
pub fn list() -> impl Iterator<Item = &'static str> {
    MODELS.iter().map(|(model, _)| *model)
}
