use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use ledger::TokenEstimator;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const MAX_TOOL_OUTPUT_CHARS: usize = 1 << 20;
pub const MAX_TOOL_OUTPUT_TOKENS: usize = 16_000;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("The provided tool parameters, {0} could not be interpreted as a mapping of arguments.")]
    InvalidParameters(Value),

    #[error("Could not decode the arguments for tool {tool}: {source}")]
    Arguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("This tool call created an output that was too long to handle! ({chars} characters, limit {limit})")]
    OutputTooLong { chars: usize, limit: usize },

    #[error("This tool call created an output that was too long to handle! (~{tokens} tokens, limit {limit})")]
    OutputTooManyTokens { tokens: usize, limit: usize },
}

/// Arguments of a tool call, as the model sent them.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    Named(Map<String, Value>),
    Positional(Vec<Value>),
}

impl ToolArgs {
    pub fn from_parameters(parameters: &Value) -> Result<Self, ToolError> {
        match parameters {
            Value::Object(map) => Ok(ToolArgs::Named(map.clone())),
            Value::Array(values) => Ok(ToolArgs::Positional(values.clone())),
            other => Err(ToolError::InvalidParameters(other.clone())),
        }
    }

    /// Looks an argument up by name, or by position for positional calls.
    pub fn get(&self, name: &str, position: usize) -> Option<&Value> {
        match self {
            ToolArgs::Named(map) => map.get(name),
            ToolArgs::Positional(values) => values.get(position),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ToolArgs::Named(map) => map.len(),
            ToolArgs::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_value(self) -> Value {
        match self {
            ToolArgs::Named(map) => Value::Object(map),
            ToolArgs::Positional(values) => Value::Array(values),
        }
    }
}

type ToolFn = dyn Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync;

/// A function the model may call.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
    function: Arc<ToolFn>,
}

impl Tool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        function: F,
    ) -> Self
    where
        F: Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            function: Arc::new(function),
        }
    }

    /// Typed tool: the schema is derived from `A`, and both named and
    /// positional calls are decoded into it (positional in field order).
    pub fn from_fn<A, R, F>(name: impl Into<String>, description: impl Into<String>, function: F) -> Self
    where
        A: DeserializeOwned + JsonSchema,
        R: Serialize,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let name = name.into();
        let parameters = serde_json::to_value(schemars::schema_for!(A))
            .unwrap_or_else(|_| json!({"type": "object"}));
        let tool_name = name.clone();

        Self::new(name, description, parameters, move |args: ToolArgs| {
            let args: A = serde_json::from_value(args.into_value()).map_err(|source| {
                ToolError::Arguments {
                    tool: tool_name.clone(),
                    source,
                }
            })?;
            let output = function(args)?;
            Ok(serde_json::to_value(output)?)
        })
    }

    pub fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value> {
        (self.function)(args)
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Tools available to an exchange, unique by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Tool>) -> Result<Self, ToolError> {
        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ToolError::DuplicateName(tool.name.clone()));
            }
        }
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name.as_str()).collect()
    }

    pub fn as_slice(&self) -> &[Tool] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Rejects tool output the model could not take back in one message.
pub fn validate_tool_output(output: &str, estimator: &dyn TokenEstimator) -> Result<(), ToolError> {
    let chars = output.chars().count();
    if chars > MAX_TOOL_OUTPUT_CHARS {
        return Err(ToolError::OutputTooLong {
            chars,
            limit: MAX_TOOL_OUTPUT_CHARS,
        });
    }

    let tokens = estimator.estimate_tokens(output);
    if tokens > MAX_TOOL_OUTPUT_TOKENS {
        return Err(ToolError::OutputTooManyTokens {
            tokens,
            limit: MAX_TOOL_OUTPUT_TOKENS,
        });
    }

    Ok(())
}
