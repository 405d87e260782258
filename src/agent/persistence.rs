//! Disk persistence for the agent conversation.
//!
//! Keeps context across program runs. Records are intentionally minimal and
//! stable instead of serializing `async_openai` request types directly: role,
//! content, and just enough tool-call structure to replay a round.

use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestToolMessageContent,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionToolType, FunctionCall,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

const CONTEXT_VERSION: u32 = 1;

/// Hard cap regardless of turn count, so one sprawling session cannot grow
/// the context file without bound.
const MAX_PERSISTED_MESSAGES: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Persisted representation of a single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub role: String, // "user" | "assistant" | "tool"
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<PersistedToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedContext {
    pub version: u32,
    pub messages: Vec<PersistedMessage>,
}

/// Save conversation history, excluding the system prompt, limited to the
/// last `max_turns` user turns and hard-capped at [`MAX_PERSISTED_MESSAGES`].
pub fn save_context(
    path: &Path,
    history: &[ChatCompletionRequestMessage],
    max_turns: usize,
) -> Result<()> {
    let mut records: Vec<PersistedMessage> = history.iter().filter_map(to_record).collect();

    if max_turns == 0 {
        records.clear();
    } else {
        let user_indices: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == "user")
            .map(|(i, _)| i)
            .collect();
        if user_indices.len() > max_turns {
            let start = user_indices[user_indices.len() - max_turns];
            records.drain(..start);
        }
    }

    if records.len() > MAX_PERSISTED_MESSAGES {
        let cut = records.len() - MAX_PERSISTED_MESSAGES;
        records.drain(..cut);
    }
    drop_orphan_leading_tools(&mut records);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let state = PersistedContext {
        version: CONTEXT_VERSION,
        messages: records,
    };
    let json = serde_json::to_string_pretty(&state).context("Failed to serialize context")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Load persisted conversation messages. A missing file or an unknown
/// version yields an empty history rather than an error.
pub fn load_context(path: &Path) -> Result<Vec<ChatCompletionRequestMessage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let state: PersistedContext =
        serde_json::from_str(&json).context("Failed to parse context file")?;

    if state.version != CONTEXT_VERSION {
        warn!("Ignoring context file with unknown version {}", state.version);
        return Ok(Vec::new());
    }

    let mut records: Vec<PersistedMessage> = state
        .messages
        .into_iter()
        .filter(|m| m.role != "system")
        .collect();
    drop_orphan_leading_tools(&mut records);

    Ok(records.iter().filter_map(from_record).collect())
}

/// A tool message without its preceding assistant tool call is rejected by
/// the API; drop such leaders after any windowing.
fn drop_orphan_leading_tools(records: &mut Vec<PersistedMessage>) {
    while records.first().map(|m| m.role == "tool").unwrap_or(false) {
        records.remove(0);
    }
}

fn to_record(message: &ChatCompletionRequestMessage) -> Option<PersistedMessage> {
    match message {
        ChatCompletionRequestMessage::User(user) => {
            let content = match &user.content {
                ChatCompletionRequestUserMessageContent::Text(text) => text.clone(),
                _ => return None,
            };
            Some(PersistedMessage {
                role: "user".to_string(),
                content,
                tool_call_id: None,
                tool_calls: Vec::new(),
            })
        }
        ChatCompletionRequestMessage::Assistant(assistant) => {
            let content = match &assistant.content {
                Some(ChatCompletionRequestAssistantMessageContent::Text(text)) => text.clone(),
                _ => String::new(),
            };
            let tool_calls = assistant
                .tool_calls
                .as_ref()
                .map(|calls| {
                    calls
                        .iter()
                        .map(|tc| PersistedToolCall {
                            id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(PersistedMessage {
                role: "assistant".to_string(),
                content,
                tool_call_id: None,
                tool_calls,
            })
        }
        ChatCompletionRequestMessage::Tool(tool) => {
            let content = match &tool.content {
                ChatCompletionRequestToolMessageContent::Text(text) => text.clone(),
                _ => String::new(),
            };
            Some(PersistedMessage {
                role: "tool".to_string(),
                content,
                tool_call_id: Some(tool.tool_call_id.clone()),
                tool_calls: Vec::new(),
            })
        }
        // System prompts are rebuilt fresh each run; anything else is not
        // part of this tool's conversations.
        _ => None,
    }
}

fn from_record(record: &PersistedMessage) -> Option<ChatCompletionRequestMessage> {
    match record.role.as_str() {
        "user" => ChatCompletionRequestUserMessageArgs::default()
            .content(record.content.clone())
            .build()
            .ok()
            .map(Into::into),
        "assistant" => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            if !record.content.is_empty() {
                builder.content(record.content.clone());
            }
            if !record.tool_calls.is_empty() {
                let calls: Vec<ChatCompletionMessageToolCall> = record
                    .tool_calls
                    .iter()
                    .map(|tc| ChatCompletionMessageToolCall {
                        id: tc.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect();
                builder.tool_calls(calls);
            }
            builder.build().ok().map(Into::into)
        }
        "tool" => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(record.tool_call_id.clone().unwrap_or_default())
            .content(record.content.clone())
            .build()
            .ok()
            .map(Into::into),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types::ChatCompletionRequestSystemMessageArgs;

    fn user(text: &str) -> ChatCompletionRequestMessage {
        ChatCompletionRequestUserMessageArgs::default()
            .content(text.to_string())
            .build()
            .unwrap()
            .into()
    }

    fn assistant(text: &str) -> ChatCompletionRequestMessage {
        ChatCompletionRequestAssistantMessageArgs::default()
            .content(text.to_string())
            .build()
            .unwrap()
            .into()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("shex-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_round_trip() {
        let path = temp_path("roundtrip.json");
        let system: ChatCompletionRequestMessage = ChatCompletionRequestSystemMessageArgs::default()
            .content("system")
            .build()
            .unwrap()
            .into();

        let assistant_with_call: ChatCompletionRequestMessage =
            ChatCompletionRequestAssistantMessageArgs::default()
                .tool_calls(vec![ChatCompletionMessageToolCall {
                    id: "call_1".to_string(),
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionCall {
                        name: "execute_command".to_string(),
                        arguments: r#"{"command":"ls"}"#.to_string(),
                    },
                }])
                .build()
                .unwrap()
                .into();
        let tool_reply: ChatCompletionRequestMessage =
            ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id("call_1")
                .content(r#"{"success":true}"#)
                .build()
                .unwrap()
                .into();

        let history = vec![
            system,
            user("list files"),
            assistant_with_call,
            tool_reply,
            assistant("done"),
        ];

        save_context(&path, &history, 5).unwrap();
        let loaded = load_context(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // System message excluded, everything else survives in order.
        assert_eq!(loaded.len(), 4);
        assert!(matches!(loaded[0], ChatCompletionRequestMessage::User(_)));
        match &loaded[1] {
            ChatCompletionRequestMessage::Assistant(a) => {
                let calls = a.tool_calls.as_ref().unwrap();
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].function.name, "execute_command");
            }
            other => panic!("expected assistant, got {:?}", other),
        }
        assert!(matches!(loaded[2], ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn test_turn_window() {
        let path = temp_path("turns.json");
        let history = vec![
            user("one"),
            assistant("a1"),
            user("two"),
            assistant("a2"),
            user("three"),
            assistant("a3"),
        ];

        save_context(&path, &history, 2).unwrap();
        let loaded = load_context(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // Only the last two user turns remain.
        assert_eq!(loaded.len(), 4);
        match &loaded[0] {
            ChatCompletionRequestMessage::User(u) => match &u.content {
                ChatCompletionRequestUserMessageContent::Text(t) => assert_eq!(t, "two"),
                _ => panic!("expected text content"),
            },
            other => panic!("expected user, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_turns_clears_context() {
        let path = temp_path("zero.json");
        save_context(&path, &[user("hello")], 0).unwrap();
        let loaded = load_context(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let loaded = load_context(&temp_path("does-not-exist.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
