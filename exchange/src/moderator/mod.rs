//! History rewriting policies run before every model call.

mod passive;
mod summarize;
mod truncate;

use std::sync::{Arc, OnceLock};

use ledger::CheckpointLedger;
use tracing::debug;

use crate::config::ModeratorConfig;
use crate::exchange::{Exchange, ExchangeError};

pub use passive::Passive;
pub use summarize::Summarize;
pub use truncate::Truncate;

/// Token budget the moderators keep the history under.
pub const DEFAULT_MAX_TOKENS: usize = 112_000;
/// Tokens left in place after a summarization.
pub const DEFAULT_SUMMARIZATION_OFFSET: usize = 40_000;
pub const DEFAULT_SUMMARIZER_MODEL: &str = "gpt-4o-mini";

pub const SUMMARIZER_SYSTEM_PROMPT: &str = "You are an expert technical summarizer.\n\
You will be given the beginning of a conversation between a user and an assistant, \
including any tool calls and their results. Write a concise summary that lets the \
assistant continue the conversation without the original messages.\n\
Keep file paths, identifiers, commands, decisions and open tasks verbatim. \
Leave out greetings and tool output that did not influence the outcome. \
Reply with the summary only.";

pub(crate) const SUMMARIZE_REQUEST: &str = "Summarize the above conversation";

/// Rewrites an exchange's history before the next model call.
///
/// Implementations must leave the history alternating and the checkpoints
/// tiling it from index 0.
pub trait Moderator: Send + Sync {
    fn rewrite(&self, exchange: &mut Exchange) -> Result<(), ExchangeError>;

    fn name(&self) -> &'static str;
}

pub const MODERATOR_NAMES: [&str; 3] = ["passive", "truncate", "summarize"];

/// Looks a moderator up by its configuration name, with default settings.
pub fn moderator_from_name(name: &str) -> Result<Arc<dyn Moderator>, ExchangeError> {
    ModeratorConfig::from_name(name).map(|config| config.build())
}

/// Tokens the system prompt and tool definitions cost on every call,
/// measured once by sending them with an empty history.
#[derive(Debug, Clone, Default)]
pub(crate) struct SystemPromptCost {
    tokens: OnceLock<usize>,
}

impl SystemPromptCost {
    pub(crate) fn get(&self) -> Option<usize> {
        self.tokens.get().copied()
    }

    /// A failed probe is not memoized, so the next rewrite tries again.
    pub(crate) fn measure(
        &self,
        exchange: &Exchange,
        model: Option<&str>,
    ) -> Result<usize, ExchangeError> {
        if let Some(tokens) = self.get() {
            return Ok(tokens);
        }

        let mut builder = exchange
            .replace()
            .with_moderator(Arc::new(Passive))
            .with_messages(Vec::new())
            .with_checkpoints(CheckpointLedger::new());
        if let Some(model) = model {
            builder = builder.with_model(model);
        }

        let mut probe = builder.build()?;
        probe.generate()?;
        let tokens = probe
            .ledger()
            .last()
            .map(|cp| cp.token_count.saturating_sub(cp.latest_generated_tokens))
            .unwrap_or(0);
        debug!(tokens, model = probe.model(), "measured system prompt");

        Ok(*self.tokens.get_or_init(|| tokens))
    }
}
