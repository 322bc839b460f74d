use std::sync::{Arc, Mutex};

use ledger::{ApproxTokenEstimator, Checkpoint, CheckpointLedger, Usage};

use crate::content::{ToolResult, ToolUse};
use crate::exchange::Exchange;
use crate::message::Message;
use crate::moderator::Moderator;
use crate::provider::{Provider, ProviderError};
use crate::tool::Tool;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tool_count: usize,
}

/// Replays canned replies in order, repeating the last one once the script
/// runs out, and records every call it receives.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Vec<(Message, Usage)>,
    fail: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<(Message, Usage)>) -> Self {
        Self {
            replies,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Provider for ScriptedProvider {
    fn complete(
        &self,
        model: &str,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage), ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        let index = calls.len();
        calls.push(RecordedCall {
            model: model.to_string(),
            system: system.to_string(),
            messages: messages.to_vec(),
            tool_count: tools.len(),
        });

        if self.fail {
            return Err(ProviderError::RetriesExhausted {
                provider: "scripted".to_string(),
                attempts: 3,
                message: "connection refused".to_string(),
            });
        }

        self.replies
            .get(index)
            .or_else(|| self.replies.last())
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse("no scripted reply".to_string()))
    }
}

pub fn usage(input: usize, output: usize) -> Usage {
    Usage::from_counts(input, output)
}

/// Exchange over an existing history, with `(start, end, tokens, generated)`
/// checkpoints.
pub fn seeded_exchange(
    provider: &Arc<ScriptedProvider>,
    moderator: Arc<dyn Moderator>,
    messages: Vec<Message>,
    checkpoints: &[(usize, usize, usize, usize)],
) -> Exchange {
    let ledger = CheckpointLedger::from_checkpoints(
        checkpoints
            .iter()
            .map(|&(start, end, tokens, generated)| {
                Checkpoint::new(start, end, tokens).with_generated(generated)
            })
            .collect(),
    );

    Exchange::builder(provider.clone(), "main-model", "You are a coding assistant.")
        .with_moderator(moderator)
        .with_estimator(Arc::new(ApproxTokenEstimator::new()))
        .with_messages(messages)
        .with_checkpoints(ledger)
        .build()
        .unwrap()
}

/// `turns` question/answer pairs followed by one pending question.
pub fn history(turns: usize) -> Vec<Message> {
    let mut messages: Vec<Message> = (0..turns)
        .flat_map(|i| {
            [
                Message::user(format!("question {i}")),
                Message::assistant(format!("answer {i}")),
            ]
        })
        .collect();
    messages.push(Message::user(format!("question {turns}")));
    messages
}

/// Three turns where the first one ends in a tool call answered by the
/// second, followed by one pending question.
pub fn history_with_tool_call() -> Vec<Message> {
    vec![
        Message::user("list the files"),
        Message::from_tool_uses(vec![ToolUse::new(
            "call_1",
            "ls",
            serde_json::json!({"path": "."}),
        )]),
        Message::from_tool_results(vec![ToolResult::success("call_1", "[\"main.rs\"]")]),
        Message::assistant("There is one file, main.rs."),
        Message::user("open it"),
        Message::assistant("It prints hello."),
        Message::user("thanks"),
    ]
}
