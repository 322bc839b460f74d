use thiserror::Error;
use tiktoken_rs::cl100k_base;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to initialize tokenizer: {0}")]
    Tokenizer(String),
}

/// Estimates the token cost of a piece of text.
///
/// Only used for guard rails (tool output limits), so implementations need
/// no accuracy beyond growing with the length of the text.
pub trait TokenEstimator: Send + Sync {
    fn estimate_tokens(&self, text: &str) -> usize;
}

/// Exact counts against the `cl100k_base` encoding.
pub struct TokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TokenCounter {
    pub fn new() -> Result<Self, LedgerError> {
        let bpe = cl100k_base().map_err(|e| LedgerError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl TokenEstimator for TokenCounter {
    fn estimate_tokens(&self, text: &str) -> usize {
        self.count(text)
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").field("encoding", &"cl100k_base").finish()
    }
}

/// Byte-ratio estimate (~4 bytes per token), no tokenizer tables needed.
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenEstimator {
    bytes_per_token: usize,
}

impl ApproxTokenEstimator {
    pub fn new() -> Self {
        Self { bytes_per_token: 4 }
    }

    pub fn with_bytes_per_token(mut self, bytes: usize) -> Self {
        self.bytes_per_token = bytes.max(1);
        self
    }
}

impl Default for ApproxTokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for ApproxTokenEstimator {
    fn estimate_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(self.bytes_per_token)
    }
}
