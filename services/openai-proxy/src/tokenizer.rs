//! Token counting for usage blocks
//!
//! Prompt tokens are counted over the serialized upstream payload and
//! completion tokens over the accumulated content. Encoder choice follows the
//! model family: o200k for the gpt/o-series names, cl100k for everything else.
//! The BPE tables are embedded in the binary and loaded once per process.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

static O200K: OnceLock<CoreBPE> = OnceLock::new();
static CL100K: OnceLock<CoreBPE> = OnceLock::new();

fn encoder_for(model: &str) -> &'static CoreBPE {
    if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
        O200K.get_or_init(|| tiktoken_rs::o200k_base().expect("o200k BPE embedded in binary"))
    } else {
        CL100K.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k BPE embedded in binary"))
    }
}

/// Count tokens in `text` with the encoder matching `model`.
pub fn count_tokens(text: &str, model: &str) -> u32 {
    encoder_for(model).encode_ordinary(text).len() as u32
}
