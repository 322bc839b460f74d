use ledger::Usage;
use thiserror::Error;

use crate::message::Message;
use crate::tool::Tool;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        provider: String,
        attempts: usize,
        message: String,
    },

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A language-model backend.
///
/// Implementations translate to and from the vendor wire format and handle
/// their own retries; an `Err` here means the turn is lost.
pub trait Provider: Send + Sync {
    fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage), ProviderError>;
}
