use std::sync::Arc;

use ledger::CheckpointLedger;
use tracing::{info, warn};

use crate::exchange::{Exchange, ExchangeError};
use crate::message::{Message, Role};

use super::{
    Moderator, Passive, SystemPromptCost, Truncate, DEFAULT_MAX_TOKENS,
    DEFAULT_SUMMARIZATION_OFFSET, DEFAULT_SUMMARIZER_MODEL, SUMMARIZER_SYSTEM_PROMPT,
    SUMMARIZE_REQUEST,
};

/// Replaces the oldest turns with a model-written summary once the history
/// grows past `max_tokens`, keeping about `summarization_offset` tokens of
/// recent turns verbatim.
#[derive(Debug, Clone)]
pub struct Summarize {
    model: String,
    max_tokens: usize,
    summarization_offset: usize,
    system_prompt: SystemPromptCost,
}

impl Summarize {
    pub fn new() -> Self {
        Self {
            model: DEFAULT_SUMMARIZER_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            summarization_offset: DEFAULT_SUMMARIZATION_OFFSET,
            system_prompt: SystemPromptCost::default(),
        }
    }

    /// Model that writes the summary.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_summarization_offset(mut self, offset: usize) -> Self {
        self.summarization_offset = offset;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn summarization_offset(&self) -> usize {
        self.summarization_offset
    }

    pub fn system_prompt_token_count(&self) -> Option<usize> {
        self.system_prompt.get()
    }
}

impl Default for Summarize {
    fn default() -> Self {
        Self::new()
    }
}

/// Which front evictions make room, and the messages they take out.
#[derive(Default)]
struct Eviction {
    pops: usize,
    cascade: bool,
    messages: Vec<Message>,
}

impl Summarize {
    /// Works the evictions out on a copy so the exchange stays intact if the
    /// summary call fails.
    fn plan_eviction(&self, exchange: &Exchange) -> Result<Eviction, ExchangeError> {
        let mut scratch = exchange.replace().with_moderator(Arc::new(Passive)).build()?;
        let mut eviction = Eviction::default();

        while scratch.total_tokens() > self.summarization_offset && scratch.checkpoints().len() > 1 {
            match scratch.pop_checkpoint(false) {
                Some(span) => {
                    eviction.messages.extend(span.messages);
                    eviction.pops += 1;
                }
                None => break,
            }
        }

        if eviction.pops > 0 && scratch.starts_with_tool_result() {
            if let Some(span) = scratch.pop_checkpoint(true) {
                eviction.messages.extend(span.messages);
                eviction.cascade = true;
            }
        }

        Ok(eviction)
    }
}

impl Moderator for Summarize {
    fn rewrite(&self, exchange: &mut Exchange) -> Result<(), ExchangeError> {
        if exchange.total_tokens() <= self.max_tokens {
            return Ok(());
        }

        let eviction = if exchange.checkpoints().len() > 1 {
            self.plan_eviction(exchange)?
        } else {
            Eviction::default()
        };

        if eviction.pops == 0 {
            warn!(
                tokens = exchange.total_tokens(),
                max_tokens = self.max_tokens,
                "latest turn alone exceeds the token budget"
            );
            return Ok(());
        }

        let system_tokens = self.system_prompt.measure(exchange, None)?;

        let mut history = eviction.messages;
        // The summarizer has to answer a user turn
        if history.last().map(|m| m.role) == Some(Role::Assistant) {
            history.push(Message::user(SUMMARIZE_REQUEST));
        }
        let summarized = history.len();

        let mut summarizer = exchange
            .replace()
            .with_system(SUMMARIZER_SYSTEM_PROMPT)
            .with_model(&self.model)
            .with_moderator(Arc::new(Truncate::new()))
            .with_messages(history)
            .with_checkpoints(CheckpointLedger::new())
            .build()?;
        let summary = summarizer.reply()?;
        let generated = summarizer
            .ledger()
            .last()
            .map(|cp| cp.latest_generated_tokens)
            .unwrap_or(0);

        for _ in 0..eviction.pops {
            exchange.pop_checkpoint(false);
        }
        if eviction.cascade {
            exchange.pop_checkpoint(true);
        }

        let summary = match exchange.messages().first() {
            Some(first) if first.role == Role::User => Message::assistant(summary.text()),
            _ => Message::user(summary.text()),
        };
        exchange.prepend_checkpointed(summary, generated + system_tokens, generated)?;

        info!(
            summarized,
            summary_tokens = generated,
            tokens = exchange.total_tokens(),
            model = %self.model,
            "summarized history"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "summarize"
    }
}
