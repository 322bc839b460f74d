use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::content::{Content, ToolResult, ToolUse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn other(&self) -> Role {
        match self {
            Role::User => Role::Assistant,
            Role::Assistant => Role::User,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("User message must include a Text or ToolResult")]
    UserWithoutContent,

    #[error("User message does not support ToolUse")]
    UserToolUse,

    #[error("Assistant message must include a Text or ToolUse")]
    AssistantWithoutContent,

    #[error("Assistant message does not support ToolResult")]
    AssistantToolResult,
}

fn message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// One turn of the conversation. `id` and `created` are assigned on
/// construction and survive serialization, so a turn can be followed
/// through summaries and evictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default = "message_id")]
    pub id: String,
    /// Unix seconds.
    #[serde(default = "unix_now")]
    pub created: i64,
    pub content: Vec<Content>,
}

impl Message {
    pub fn new(role: Role, content: Vec<Content>) -> Result<Self, MessageError> {
        let message = Self::unchecked(role, content);
        message.validate()?;
        Ok(message)
    }

    fn unchecked(role: Role, content: Vec<Content>) -> Self {
        Self {
            role,
            id: message_id(),
            created: unix_now(),
            content,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::unchecked(Role::User, vec![Content::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::unchecked(Role::Assistant, vec![Content::text(text)])
    }

    /// User message carrying the outcomes of one round of tool calls.
    pub fn from_tool_results(results: Vec<ToolResult>) -> Self {
        Self::unchecked(Role::User, results.into_iter().map(Content::from).collect())
    }

    pub fn from_tool_uses(tool_uses: Vec<ToolUse>) -> Self {
        Self::unchecked(
            Role::Assistant,
            tool_uses.into_iter().map(Content::from).collect(),
        )
    }

    /// Users send text and tool results; assistants send text and tool uses.
    pub fn validate(&self) -> Result<(), MessageError> {
        let has_text = self.content.iter().any(|c| c.as_text().is_some());
        match self.role {
            Role::User => {
                if self.has_tool_use() {
                    return Err(MessageError::UserToolUse);
                }
                if !(has_text || self.has_tool_result()) {
                    return Err(MessageError::UserWithoutContent);
                }
            }
            Role::Assistant => {
                if self.has_tool_result() {
                    return Err(MessageError::AssistantToolResult);
                }
                if !(has_text || self.has_tool_use()) {
                    return Err(MessageError::AssistantWithoutContent);
                }
            }
        }
        Ok(())
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUse> {
        self.content.iter().filter_map(Content::as_tool_use)
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(Content::as_tool_result)
    }

    pub fn has_tool_use(&self) -> bool {
        self.tool_uses().next().is_some()
    }

    pub fn has_tool_result(&self) -> bool {
        self.tool_results().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Text;
    use serde_json::json;

    #[test]
    fn test_text_shortcuts() {
        let message = Message::user("abcd");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "abcd");
        assert!(message.validate().is_ok());
    }

    #[test]
    fn test_text_joins_blocks() {
        let message = Message::new(
            Role::Assistant,
            vec![
                Content::text("first"),
                ToolUse::new("call_1", "search", json!({})).into(),
                Content::from(Text {
                    text: "second".to_string(),
                }),
            ],
        )
        .unwrap();
        assert_eq!(message.text(), "first\nsecond");
        assert_eq!(message.tool_uses().count(), 1);
    }

    #[test]
    fn test_user_cannot_use_tools() {
        let result = Message::new(
            Role::User,
            vec![Content::text("hi"), ToolUse::new("call_1", "search", json!({})).into()],
        );
        assert_eq!(result.unwrap_err(), MessageError::UserToolUse);
    }

    #[test]
    fn test_assistant_cannot_return_tool_results() {
        let result = Message::new(
            Role::Assistant,
            vec![ToolResult::success("call_1", "ok").into()],
        );
        assert_eq!(result.unwrap_err(), MessageError::AssistantToolResult);
    }

    #[test]
    fn test_empty_messages_rejected() {
        assert_eq!(
            Message::new(Role::User, vec![]).unwrap_err(),
            MessageError::UserWithoutContent
        );
        assert_eq!(
            Message::new(Role::Assistant, vec![]).unwrap_err(),
            MessageError::AssistantWithoutContent
        );
    }

    #[test]
    fn test_tool_result_message() {
        let message = Message::from_tool_results(vec![
            ToolResult::success("call_1", "1"),
            ToolResult::error("call_2", "boom"),
        ]);
        assert!(message.validate().is_ok());
        assert!(message.has_tool_result());
        assert!(!message.has_tool_use());
        assert_eq!(message.text(), "");
    }

    #[test]
    fn test_messages_get_distinct_ids() {
        let first = Message::user("same");
        let second = Message::user("same");

        assert!(first.id.starts_with("msg_"));
        assert_eq!(first.id.len(), 4 + 32);
        assert_ne!(first.id, second.id);
        assert!(first.created > 1_600_000_000);
    }

    #[test]
    fn test_id_and_created_survive_serialization() {
        let message = Message::assistant("hey");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["id"], json!(message.id));
        assert_eq!(json["created"], json!(message.created));

        let restored: Message = serde_json::from_value(json).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn test_missing_id_is_filled_in() {
        let message: Message = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "Text", "text": "hello"}]
        }))
        .unwrap();

        assert!(message.id.starts_with("msg_"));
        assert_eq!(message.text(), "hello");
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Message::assistant("hey")).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
        assert_eq!(Role::User.other(), Role::Assistant);
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
