//! Tool definitions exposed to the model, and the payloads sent back.

use async_openai::types::{ChatCompletionTool, ChatCompletionToolType, FunctionObject};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::exec::{strip_ansi_codes, ExecutionResult};

/// Name of the command execution tool.
pub const TOOL_EXECUTE_COMMAND: &str = "execute_command";

/// Output/error payloads are bounded before they re-enter the conversation;
/// the engine itself never truncates.
const MAX_OUTPUT_CHARS: usize = 2000;
const MAX_ERROR_CHARS: usize = 500;

/// Arguments of the `execute_command` tool, parsed from the model's JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandArgs {
    /// The shell command to run.
    pub command: String,
    /// What the command is for (shown in logs, not executed).
    #[serde(default)]
    pub explanation: String,
    /// Whether the command can destroy data or change the system.
    #[serde(default)]
    pub is_dangerous: bool,
}

/// Create the `execute_command` tool definition.
pub fn create_execute_command_tool() -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: TOOL_EXECUTE_COMMAND.to_string(),
            description: Some(
                "Execute a shell command on the user's machine. Use it for file \
                 operations, system queries, running programs, and any other task \
                 the user asked for."
                    .to_string(),
            ),
            parameters: Some(json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "explanation": {
                        "type": "string",
                        "description": "What the command does and why it is needed"
                    },
                    "is_dangerous": {
                        "type": "boolean",
                        "description": "True when the command can cause data loss or system damage; such commands require user confirmation"
                    }
                },
                "required": ["command", "explanation", "is_dangerous"],
                "additionalProperties": false
            })),
            strict: Some(true),
        },
    }
}

/// Serialize an execution result into the tool message sent back to the
/// model: ANSI escapes stripped, output and error bounded.
pub fn tool_payload(result: &ExecutionResult) -> String {
    json!({
        "success": result.success,
        "output": truncate_chars(&strip_ansi_codes(&result.output), MAX_OUTPUT_CHARS),
        "error": truncate_chars(&strip_ansi_codes(&result.error), MAX_ERROR_CHARS),
        "return_code": result.code,
    })
    .to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("\n...(truncated)...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definition_shape() {
        let tool = create_execute_command_tool();
        assert_eq!(tool.function.name, TOOL_EXECUTE_COMMAND);
        let params = tool.function.parameters.unwrap();
        assert_eq!(params["required"][0], "command");
    }

    #[test]
    fn test_args_defaults() {
        let args: ExecuteCommandArgs = serde_json::from_str(r#"{"command":"ls"}"#).unwrap();
        assert_eq!(args.command, "ls");
        assert!(!args.is_dangerous);
        assert!(args.explanation.is_empty());
    }

    #[test]
    fn test_payload_truncates_long_output() {
        let result = ExecutionResult {
            success: true,
            output: "x".repeat(5000),
            error: String::new(),
            code: 0,
        };
        let payload: serde_json::Value =
            serde_json::from_str(&tool_payload(&result)).unwrap();
        let output = payload["output"].as_str().unwrap();
        assert!(output.len() < 2100);
        assert!(output.ends_with("...(truncated)..."));
        assert_eq!(payload["return_code"], 0);
    }

    #[test]
    fn test_payload_strips_ansi() {
        let result = ExecutionResult {
            success: false,
            output: "\x1b[31mboom\x1b[0m".to_string(),
            error: "\x1b[1mbad\x1b[0m".to_string(),
            code: 1,
        };
        let payload: serde_json::Value =
            serde_json::from_str(&tool_payload(&result)).unwrap();
        assert_eq!(payload["output"], "boom");
        assert_eq!(payload["error"], "bad");
    }
}
