use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub text: String,
}

/// A model-issued request to run a tool.
///
/// Providers that fail to parse the call still hand it over with
/// `is_error` set, so the error can be fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    /// JSON object for named arguments, JSON array for positional ones.
    pub parameters: Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolUse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters,
            is_error: false,
            error_message: None,
        }
    }

    pub fn failed(
        id: impl Into<String>,
        name: impl Into<String>,
        parameters: Value,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            is_error: true,
            error_message: Some(error_message.into()),
            ..Self::new(id, name, parameters)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_use_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            output: output.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    Text(Text),
    ToolUse(ToolUse),
    ToolResult(ToolResult),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text(Text { text: text.into() })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(t) => Some(&t.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUse> {
        match self {
            Content::ToolUse(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Content::ToolResult(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Text> for Content {
    fn from(text: Text) -> Self {
        Content::Text(text)
    }
}

impl From<ToolUse> for Content {
    fn from(tool_use: ToolUse) -> Self {
        Content::ToolUse(tool_use)
    }
}

impl From<ToolResult> for Content {
    fn from(result: ToolResult) -> Self {
        Content::ToolResult(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_is_tagged_by_type() {
        let json = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(json, json!({"type": "Text", "text": "hi"}));

        let use_json = serde_json::to_value(Content::from(ToolUse::new(
            "call_1",
            "read_file",
            json!({"path": "a.txt"}),
        )))
        .unwrap();
        assert_eq!(use_json["type"], "ToolUse");
        assert_eq!(use_json["parameters"]["path"], "a.txt");
        assert!(use_json.get("error_message").is_none());
    }

    #[test]
    fn test_tool_result_defaults_to_success() {
        let content: Content =
            serde_json::from_value(json!({"type": "ToolResult", "tool_use_id": "call_1", "output": "ok"}))
                .unwrap();
        let result = content.as_tool_result().unwrap();
        assert!(!result.is_error);
        assert_eq!(result.output, "ok");
    }

    #[test]
    fn test_failed_tool_use() {
        let tool_use = ToolUse::failed("call_2", "bad name!", json!("{"), "invalid characters");
        assert!(tool_use.is_error);
        assert_eq!(tool_use.error_message.as_deref(), Some("invalid characters"));
        assert_eq!(tool_use.name, "bad name!");
    }

    #[test]
    fn test_accessors() {
        let content = Content::from(ToolResult::error("call_3", "boom"));
        assert!(content.as_text().is_none());
        assert!(content.as_tool_use().is_none());
        assert!(content.as_tool_result().unwrap().is_error);
    }
}
