use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;

use ledger::{
    Checkpoint, CheckpointLedger, LedgerError, PoppedSpan, TokenBudget, TokenCounter,
    TokenEstimator, UsageSink,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::content::{ToolResult, ToolUse};
use crate::message::{Message, MessageError, Role};
use crate::moderator::{Moderator, Truncate};
use crate::provider::{Provider, ProviderError};
use crate::tool::{validate_tool_output, Tool, ToolArgs, ToolError, ToolRegistry};

pub const DEFAULT_MAX_TOOL_USE: usize = 128;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Messages in the exchange must alternate between user and assistant, got two {0} messages in a row")]
    RoleAlternation(Role),

    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] MessageError),

    #[error("max_tool_use must be greater than 0")]
    InvalidMaxToolUse,

    #[error("Unknown moderator: {name}. Available moderators: {available}")]
    UnknownModerator { name: String, available: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoints do not cover the {0} messages contiguously from index 0")]
    Checkpoints(usize),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A conversation with a model: the message history, its token ledger and
/// the collaborators used to extend it.
pub struct Exchange {
    provider: Arc<dyn Provider>,
    model: String,
    system: String,
    moderator: Arc<dyn Moderator>,
    tools: ToolRegistry,
    messages: Vec<Message>,
    ledger: CheckpointLedger,
    estimator: Arc<dyn TokenEstimator>,
    usage_sink: Option<Arc<dyn UsageSink>>,
    max_tool_use: usize,
}

impl Exchange {
    pub fn builder(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system: impl Into<String>,
    ) -> ExchangeBuilder {
        ExchangeBuilder::new(provider, model, system)
    }

    /// Builder seeded with a copy of this exchange. Messages and checkpoints
    /// are cloned; provider, moderator, estimator and sink are shared.
    pub fn replace(&self) -> ExchangeBuilder {
        ExchangeBuilder {
            provider: Arc::clone(&self.provider),
            model: self.model.clone(),
            system: self.system.clone(),
            moderator: Some(Arc::clone(&self.moderator)),
            tools: self.tools.as_slice().to_vec(),
            messages: self.messages.clone(),
            ledger: self.ledger.clone(),
            estimator: Some(Arc::clone(&self.estimator)),
            usage_sink: self.usage_sink.clone(),
            max_tool_use: self.max_tool_use,
        }
    }

    // Accessors
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        self.ledger.as_slice()
    }

    pub fn ledger(&self) -> &CheckpointLedger {
        &self.ledger
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn moderator(&self) -> &Arc<dyn Moderator> {
        &self.moderator
    }

    pub fn max_tool_use(&self) -> usize {
        self.max_tool_use
    }

    pub fn total_tokens(&self) -> usize {
        self.ledger.total_tokens()
    }

    /// Budget status of the tracked tokens against a context limit.
    pub fn budget(&self, limit: usize) -> TokenBudget {
        TokenBudget::for_ledger(&self.ledger, limit)
    }

    /// Appends a message. Fails without touching the history when the
    /// message is malformed or repeats the role of the last one.
    pub fn add(&mut self, message: Message) -> Result<(), ExchangeError> {
        message.validate()?;
        if let Some(last) = self.messages.last() {
            if last.role == message.role {
                return Err(ExchangeError::RoleAlternation(message.role));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Runs the moderator, asks the provider for the next message and
    /// records the turn.
    pub fn generate(&mut self) -> Result<Message, ExchangeError> {
        let moderator = Arc::clone(&self.moderator);
        moderator.rewrite(self)?;

        debug!(
            model = %self.model,
            messages = self.messages.len(),
            tokens = self.ledger.total_tokens(),
            "requesting completion"
        );
        let (message, usage) = self.provider.complete(
            &self.model,
            &self.system,
            &self.messages,
            self.tools.as_slice(),
        )?;

        self.add(message.clone())?;
        let checkpoint = self.ledger.append(&usage, self.messages.len());
        debug!(
            start = checkpoint.start_index,
            end = checkpoint.end_index,
            tokens = checkpoint.token_count,
            "recorded checkpoint"
        );

        if let Some(sink) = &self.usage_sink {
            sink.collect(&self.model, &usage);
        }

        Ok(message)
    }

    pub fn reply(&mut self) -> Result<Message, ExchangeError> {
        self.reply_with_limit(self.max_tool_use)
    }

    /// Generates until the model answers without requesting tools, running
    /// at most `max_tool_use` rounds of tool calls.
    pub fn reply_with_limit(&mut self, max_tool_use: usize) -> Result<Message, ExchangeError> {
        if max_tool_use == 0 {
            return Err(ExchangeError::InvalidMaxToolUse);
        }

        let mut response = self.generate()?;
        let mut rounds = 1;
        while response.has_tool_use() {
            let results: Vec<ToolResult> = response
                .tool_uses()
                .map(|tool_use| self.call_function(tool_use))
                .collect();
            self.add(Message::from_tool_results(results))?;

            if rounds >= max_tool_use {
                info!(limit = max_tool_use, "tool use limit reached");
                response = Message::assistant(format!(
                    "We've stopped executing additional tool calls because we reached the limit of {max_tool_use}"
                ));
                self.add(response.clone())?;
                break;
            }

            response = self.generate()?;
            rounds += 1;
        }

        Ok(response)
    }

    /// Runs the tool a model asked for. Every failure, a panicking tool
    /// included, is turned into an error result the model can read.
    pub fn call_function(&self, tool_use: &ToolUse) -> ToolResult {
        let tool = match self.tools.get(&tool_use.name) {
            Some(tool) if !tool_use.is_error => tool,
            found => {
                let mut output = format!(
                    "ERROR: Failed to use tool {}.\nDo NOT use the same tool name and parameters again - that will lead to the same error.",
                    tool_use.id
                );
                if tool_use.is_error {
                    output.push('\n');
                    output.push_str(
                        tool_use
                            .error_message
                            .as_deref()
                            .unwrap_or("The tool call could not be parsed."),
                    );
                } else if found.is_none() {
                    output.push_str(&format!(
                        "\nNo tool exists with the name '{}'. Valid tool names are: {}",
                        tool_use.name,
                        self.tools.names().join(", ")
                    ));
                }
                warn!(tool = %tool_use.name, id = %tool_use.id, "rejected tool call");
                return ToolResult::error(&tool_use.id, output);
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_tool(tool, &tool_use.parameters)
        }))
        .unwrap_or_else(|payload| {
            Err(anyhow!("tool panicked: {}", panic_message(payload.as_ref())))
        });

        match outcome {
            Ok(output) => ToolResult::success(&tool_use.id, output),
            Err(err) => {
                warn!(tool = %tool.name, id = %tool_use.id, error = %err, "tool call failed");
                ToolResult::error(&tool_use.id, format!("{err:?}"))
            }
        }
    }

    fn run_tool(&self, tool: &Tool, parameters: &Value) -> anyhow::Result<String> {
        let args = ToolArgs::from_parameters(parameters)?;
        let value = tool.invoke(args)?;
        let output = serde_json::to_string(&value)?;
        validate_tool_output(&output, self.estimator.as_ref())?;
        Ok(output)
    }

    /// Runs a tool use on the model's behalf and records both sides of the
    /// call: the assistant request and the user result.
    pub fn add_tool_use(&mut self, tool_use: ToolUse) -> Result<ToolResult, ExchangeError> {
        if self.messages.last().map(|m| m.role) == Some(Role::Assistant) {
            return Err(ExchangeError::RoleAlternation(Role::Assistant));
        }

        let result = self.call_function(&tool_use);
        self.add(Message::from_tool_uses(vec![tool_use]))?;
        self.add(Message::from_tool_results(vec![result.clone()]))?;
        Ok(result)
    }

    // History rewriting, used by moderators
    pub fn pop_checkpoint(&mut self, exclude_last: bool) -> Option<PoppedSpan<Message>> {
        self.ledger.pop_front(&mut self.messages, exclude_last)
    }

    /// True when the history opens with tool results whose request is gone.
    pub fn starts_with_tool_result(&self) -> bool {
        self.messages
            .first()
            .map(Message::has_tool_result)
            .unwrap_or(false)
    }

    pub fn charge_first_checkpoint(&mut self, tokens: usize) -> bool {
        self.ledger.charge_front(tokens)
    }

    /// Inserts a message at the front of the history under its own `[0, 1)`
    /// checkpoint.
    pub fn prepend_checkpointed(
        &mut self,
        message: Message,
        token_count: usize,
        latest_generated_tokens: usize,
    ) -> Result<(), ExchangeError> {
        message.validate()?;
        if let Some(first) = self.messages.first() {
            if first.role == message.role {
                return Err(ExchangeError::RoleAlternation(message.role));
            }
        }
        self.messages.insert(0, message);
        self.ledger.prepend(token_count, latest_generated_tokens);
        Ok(())
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("model", &self.model)
            .field("moderator", &self.moderator.name())
            .field("tools", &self.tools.names())
            .field("messages", &self.messages.len())
            .field("checkpoints", &self.ledger)
            .field("max_tool_use", &self.max_tool_use)
            .finish_non_exhaustive()
    }
}

pub struct ExchangeBuilder {
    provider: Arc<dyn Provider>,
    model: String,
    system: String,
    moderator: Option<Arc<dyn Moderator>>,
    tools: Vec<Tool>,
    messages: Vec<Message>,
    ledger: CheckpointLedger,
    estimator: Option<Arc<dyn TokenEstimator>>,
    usage_sink: Option<Arc<dyn UsageSink>>,
    max_tool_use: usize,
}

impl ExchangeBuilder {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            system: system.into(),
            moderator: None,
            tools: Vec::new(),
            messages: Vec::new(),
            ledger: CheckpointLedger::new(),
            estimator: None,
            usage_sink: None,
            max_tool_use: DEFAULT_MAX_TOOL_USE,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_moderator(mut self, moderator: Arc<dyn Moderator>) -> Self {
        self.moderator = Some(moderator);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_checkpoints(mut self, ledger: CheckpointLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    pub fn with_max_tool_use(mut self, max_tool_use: usize) -> Self {
        self.max_tool_use = max_tool_use;
        self
    }

    pub fn with_config(mut self, config: &ExchangeConfig) -> Self {
        self.max_tool_use = config.max_tool_use;
        self.moderator = Some(config.moderator.build());
        self
    }

    pub fn build(self) -> Result<Exchange, ExchangeError> {
        if self.max_tool_use == 0 {
            return Err(ExchangeError::InvalidMaxToolUse);
        }

        let tools = ToolRegistry::new(self.tools)?;

        for message in &self.messages {
            message.validate()?;
        }
        if let Some(pair) = self.messages.windows(2).find(|w| w[0].role == w[1].role) {
            return Err(ExchangeError::RoleAlternation(pair[1].role));
        }
        if !self.ledger.covers(self.messages.len()) {
            return Err(ExchangeError::Checkpoints(self.messages.len()));
        }

        let estimator: Arc<dyn TokenEstimator> = match self.estimator {
            Some(estimator) => estimator,
            None => Arc::new(TokenCounter::new()?),
        };
        let moderator = self
            .moderator
            .unwrap_or_else(|| Arc::new(Truncate::new()) as Arc<dyn Moderator>);

        Ok(Exchange {
            provider: self.provider,
            model: self.model,
            system: self.system,
            moderator,
            tools,
            messages: self.messages,
            ledger: self.ledger,
            estimator,
            usage_sink: self.usage_sink,
            max_tool_use: self.max_tool_use,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
