use tracing::{info, warn};

use crate::exchange::{Exchange, ExchangeError};

use super::{Moderator, SystemPromptCost, DEFAULT_MAX_TOKENS};

/// Drops the oldest turns until the history fits `max_tokens`.
///
/// The newest turn is never dropped. A history whose last turn alone is over
/// budget is left as is and shows up as exceeded in `Exchange::budget`.
#[derive(Debug, Clone)]
pub struct Truncate {
    model: Option<String>,
    max_tokens: usize,
    system_prompt: SystemPromptCost,
}

impl Truncate {
    pub fn new() -> Self {
        Self {
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: SystemPromptCost::default(),
        }
    }

    /// Model used to measure the system prompt, instead of the exchange's.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Known once the first truncation has run.
    pub fn system_prompt_token_count(&self) -> Option<usize> {
        self.system_prompt.get()
    }
}

impl Default for Truncate {
    fn default() -> Self {
        Self::new()
    }
}

impl Moderator for Truncate {
    fn rewrite(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        if exchange.total_tokens() <= self.max_tokens {
            return Ok(());
        }

        if exchange.checkpoints().len() > 1 {
            let system_tokens = self.system_prompt.measure(exchange, self.model.as_deref())?;
            let mut evicted = 0;

            while exchange.total_tokens() > self.max_tokens && exchange.checkpoints().len() > 1 {
                if let Some(span) = exchange.pop_checkpoint(false) {
                    evicted += span.messages.len();
                }
                // Tool results cannot open the history once their request is gone
                if exchange.starts_with_tool_result() {
                    if let Some(span) = exchange.pop_checkpoint(true) {
                        evicted += span.messages.len();
                    }
                }
                // The system prompt was billed to the evicted first turn
                exchange.charge_first_checkpoint(system_tokens);
            }

            info!(
                evicted,
                tokens = exchange.total_tokens(),
                max_tokens = self.max_tokens,
                "truncated history"
            );
        }

        if exchange.total_tokens() > self.max_tokens {
            warn!(
                tokens = exchange.total_tokens(),
                max_tokens = self.max_tokens,
                "latest turn alone exceeds the token budget"
            );
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "truncate"
    }
}
