mod content;
mod message;
mod tool;
mod provider;
mod exchange;
mod moderator;
mod config;

#[cfg(test)]
mod testing;

pub use content::{Content, Text, ToolResult, ToolUse};
pub use message::{Message, MessageError, Role};
pub use tool::{
    validate_tool_output, Tool, ToolArgs, ToolError, ToolRegistry, MAX_TOOL_OUTPUT_CHARS,
    MAX_TOOL_OUTPUT_TOKENS,
};
pub use provider::{Provider, ProviderError};
pub use exchange::{Exchange, ExchangeBuilder, ExchangeError, DEFAULT_MAX_TOOL_USE};
pub use moderator::{
    moderator_from_name, Moderator, Passive, Summarize, Truncate, DEFAULT_MAX_TOKENS,
    DEFAULT_SUMMARIZATION_OFFSET, DEFAULT_SUMMARIZER_MODEL, MODERATOR_NAMES, SUMMARIZER_SYSTEM_PROMPT,
};
pub use config::{ExchangeConfig, ModeratorConfig};

pub use ledger::{
    ApproxTokenEstimator, BudgetStatus, Checkpoint, CheckpointLedger, LedgerError, PoppedSpan,
    TokenBudget, TokenCounter, TokenEstimator, Usage, UsageSink,
};
