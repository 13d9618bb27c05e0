//! Token counting.
//!
//! A real tokenizer can be plugged in through [`Tokenizer`]; when none is
//! configured, or when it fails on some input, counts fall back to
//! `chars / 4` with integer division. The fallback is exact so chunk
//! boundaries are reproducible in tests.

use std::sync::Arc;

/// Characters per token assumed by the fallback estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// A pluggable token counter (e.g. a HuggingFace `tokenizer.json`).
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> anyhow::Result<usize>;
}

/// The fallback estimate: character count divided by four, rounded down.
pub fn approximate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Counts tokens with an optional tokenizer and the `chars / 4` fallback.
#[derive(Clone, Default)]
pub struct TokenCounter {
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl TokenCounter {
    /// A counter that always uses [`approximate_tokens`].
    pub fn approximate() -> Self {
        Self { tokenizer: None }
    }

    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer: Some(tokenizer),
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.tokenizer {
            Some(tokenizer) => match tokenizer.count_tokens(text) {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(error = %e, "tokenizer failed, using estimate");
                    approximate_tokens(text)
                }
            },
            None => approximate_tokens(text),
        }
    }

    pub fn is_approximate(&self) -> bool {
        self.tokenizer.is_none()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("approximate", &self.is_approximate())
            .finish()
    }
}
