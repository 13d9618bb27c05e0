//! Builds the [`TokenCounter`] used for chunking.
//!
//! With the `hf-tokenizer` feature, `chunking.tokenizer` may point at a
//! HuggingFace `tokenizer.json`; token counts then come from that model.
//! Otherwise counts use the `chars / 4` estimate.

use anyhow::Result;

use vaultsync_core::tokenize::TokenCounter;

use crate::config::ChunkingConfig;

pub fn build_token_counter(config: &ChunkingConfig) -> Result<TokenCounter> {
    match &config.tokenizer {
        None => Ok(TokenCounter::approximate()),
        Some(path) => load(path),
    }
}

#[cfg(feature = "hf-tokenizer")]
fn load(path: &std::path::Path) -> Result<TokenCounter> {
    use std::sync::Arc;

    let tokenizer = hf::HfTokenizer::from_file(path)?;
    tracing::info!(path = %path.display(), "using HuggingFace tokenizer");
    Ok(TokenCounter::with_tokenizer(Arc::new(tokenizer)))
}

#[cfg(not(feature = "hf-tokenizer"))]
fn load(path: &std::path::Path) -> Result<TokenCounter> {
    tracing::warn!(
        path = %path.display(),
        "chunking.tokenizer is set but vsync was built without the hf-tokenizer feature; using chars/4 estimate"
    );
    Ok(TokenCounter::approximate())
}

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use anyhow::{anyhow, Context, Result};
    use std::path::Path;

    use vaultsync_core::tokenize::Tokenizer;

    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: &Path) -> Result<Self> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("Failed to load tokenizer: {}", path.display()))?;
            Ok(Self { inner })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn count_tokens(&self, text: &str) -> Result<usize> {
            let encoding = self.inner.encode(text, false).map_err(|e| anyhow!(e))?;
            Ok(encoding.get_ids().len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_tokenizer_means_estimate() {
        let counter = build_token_counter(&ChunkingConfig::default()).unwrap();
        assert!(counter.is_approximate());
        assert_eq!(counter.count("abcdefgh"), 2);
    }
}
