use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::exchange::{ExchangeError, DEFAULT_MAX_TOOL_USE};
use crate::moderator::{
    Moderator, Passive, Summarize, Truncate, DEFAULT_MAX_TOKENS, DEFAULT_SUMMARIZATION_OFFSET,
    DEFAULT_SUMMARIZER_MODEL, MODERATOR_NAMES,
};

/// Moderator selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeratorConfig {
    Passive,
    Truncate {
        #[serde(default = "default_max_tokens")]
        max_tokens: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Summarize {
        #[serde(default = "default_summarizer_model")]
        model: String,
        #[serde(default = "default_max_tokens")]
        max_tokens: usize,
        #[serde(default = "default_summarization_offset")]
        summarization_offset: usize,
    },
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_summarizer_model() -> String {
    DEFAULT_SUMMARIZER_MODEL.to_string()
}

fn default_summarization_offset() -> usize {
    DEFAULT_SUMMARIZATION_OFFSET
}

fn default_max_tool_use() -> usize {
    DEFAULT_MAX_TOOL_USE
}

impl ModeratorConfig {
    /// Default settings for the moderator registered under `name`.
    pub fn from_name(name: &str) -> Result<Self, ExchangeError> {
        match name {
            "passive" => Ok(ModeratorConfig::Passive),
            "truncate" => Ok(ModeratorConfig::Truncate {
                max_tokens: DEFAULT_MAX_TOKENS,
                model: None,
            }),
            "summarize" => Ok(ModeratorConfig::Summarize {
                model: default_summarizer_model(),
                max_tokens: DEFAULT_MAX_TOKENS,
                summarization_offset: DEFAULT_SUMMARIZATION_OFFSET,
            }),
            other => Err(ExchangeError::UnknownModerator {
                name: other.to_string(),
                available: MODERATOR_NAMES.join(", "),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModeratorConfig::Passive => "passive",
            ModeratorConfig::Truncate { .. } => "truncate",
            ModeratorConfig::Summarize { .. } => "summarize",
        }
    }

    pub fn build(&self) -> Arc<dyn Moderator> {
        match self {
            ModeratorConfig::Passive => Arc::new(Passive),
            ModeratorConfig::Truncate { max_tokens, model } => {
                let truncate = Truncate::new().with_max_tokens(*max_tokens);
                match model {
                    Some(model) => Arc::new(truncate.with_model(model)),
                    None => Arc::new(truncate),
                }
            }
            ModeratorConfig::Summarize {
                model,
                max_tokens,
                summarization_offset,
            } => Arc::new(
                Summarize::new()
                    .with_model(model)
                    .with_max_tokens(*max_tokens)
                    .with_summarization_offset(*summarization_offset),
            ),
        }
    }
}

impl Default for ModeratorConfig {
    fn default() -> Self {
        ModeratorConfig::Truncate {
            max_tokens: DEFAULT_MAX_TOKENS,
            model: None,
        }
    }
}

/// Settings applied by `ExchangeBuilder::with_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_max_tool_use")]
    pub max_tool_use: usize,
    #[serde(default)]
    pub moderator: ModeratorConfig,
}

impl ExchangeConfig {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, ExchangeError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ExchangeError::Config(e.to_string()))?;
        if config.max_tool_use == 0 {
            return Err(ExchangeError::InvalidMaxToolUse);
        }
        Ok(config)
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_tool_use: DEFAULT_MAX_TOOL_USE,
            moderator: ModeratorConfig::default(),
        }
    }
}
