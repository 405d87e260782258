//! The tool-calling agent loop.
//!
//! One conversation per process run: the user's request goes in, the model
//! streams back prose and `execute_command` tool calls, each call is run
//! through the execution engine, and its result re-enters the conversation
//! until the model answers with plain text.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
};
use async_openai::Client;
use crossterm::style::Color;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::exec::{ConfirmFn, ExecutionEngine, ExecutionRequest};
use crate::status::Spinner;

use super::persistence;
use super::prompt;
use super::tools::{self, ExecuteCommandArgs, TOOL_EXECUTE_COMMAND};

const MAX_HISTORY_MESSAGES: usize = 50;

const THINKING_MESSAGE: &str = "Thinking...";
const ANALYZING_MESSAGE: &str = "Analyzing result...";

/// Callback asked whether to keep retrying after `n` total failures.
pub type ContinueFn = Box<dyn Fn(usize) -> bool + Send + Sync>;

/// A single-conversation agent driving the execution engine.
pub struct AgentSession {
    conversation_history: Vec<ChatCompletionRequestMessage>,
    client: Client<OpenAIConfig>,
    config: AgentConfig,
    engine: ExecutionEngine,
    spinner: Arc<Spinner>,
    confirm_fn: Option<ConfirmFn>,
    continue_fn: Option<ContinueFn>,
}

impl AgentSession {
    pub fn new(config: AgentConfig, spinner: Arc<Spinner>) -> Result<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_key(config.llm.api_key.clone());
        if let Some(base) = &config.llm.base_url {
            openai_config = openai_config.with_api_base(base);
        }

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt::system_prompt(config.max_retries))
            .build()
            .context("Failed to build system prompt message")?;

        Ok(Self {
            conversation_history: vec![system_msg.into()],
            client: Client::with_config(openai_config),
            engine: ExecutionEngine::new(Arc::clone(&spinner)),
            spinner,
            config,
            confirm_fn: None,
            continue_fn: None,
        })
    }

    /// Set the callback that approves dangerous commands.
    pub fn set_confirm_fn(&mut self, f: ConfirmFn) {
        self.confirm_fn = Some(f);
    }

    /// Set the callback asked whether to continue after repeated failures.
    pub fn set_continue_fn(&mut self, f: ContinueFn) {
        self.continue_fn = Some(f);
    }

    /// Append previously persisted conversation context. Failures are logged
    /// and the session simply starts fresh.
    pub fn load_context(&mut self, path: &Path) {
        match persistence::load_context(path) {
            Ok(messages) => {
                if !messages.is_empty() {
                    debug!("Loaded {} context messages", messages.len());
                    self.conversation_history.extend(messages);
                }
            }
            Err(e) => warn!("Failed to load context: {:#}", e),
        }
    }

    /// Persist the conversation for the next run. Never fails the run.
    pub fn save_context(&self, path: &Path) {
        if let Err(e) = persistence::save_context(
            path,
            &self.conversation_history,
            self.config.max_context_turns,
        ) {
            warn!("Failed to save context: {:#}", e);
        }
    }

    /// Run the agent until the model answers without tool calls.
    /// Returns the final assistant text.
    pub async fn run(&mut self, user_input: &str) -> Result<String> {
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_input.to_string())
            .build()
            .context("Failed to build user message")?;
        self.conversation_history.push(user_msg.into());

        let mut retry_count = 0usize;
        let mut total_retries = 0usize;

        loop {
            let (content, calls) = self.stream_completion().await?;

            // Record the assistant turn, tool calls included.
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            if !content.is_empty() {
                builder.content(content.clone());
            }
            if !calls.is_empty() {
                let tc_objects: Vec<ChatCompletionMessageToolCall> = calls
                    .iter()
                    .map(|(id, name, args)| ChatCompletionMessageToolCall {
                        id: id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: args.clone(),
                        },
                    })
                    .collect();
                builder.tool_calls(tc_objects);
            }
            self.conversation_history.push(
                builder
                    .build()
                    .context("Failed to build assistant message")?
                    .into(),
            );
            trim_history(&mut self.conversation_history);

            if calls.is_empty() {
                if !content.is_empty() {
                    self.spinner.write("\n", None);
                }
                return Ok(content);
            }

            for (id, name, raw_args) in calls {
                let (payload, success) = self.dispatch_tool(&name, &raw_args).await;
                let tool_msg = ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(id)
                    .content(payload)
                    .build()
                    .context("Failed to build tool message")?;
                self.conversation_history.push(tool_msg.into());

                if !success {
                    retry_count += 1;
                    total_retries += 1;
                    if retry_count >= self.config.max_retries {
                        match &self.continue_fn {
                            Some(ask) if ask(total_retries) => retry_count = 0,
                            _ => {
                                return Ok(format!(
                                    "Execution failed after {} attempts",
                                    total_retries
                                ));
                            }
                        }
                    }
                }
            }

            // The next think-phase shows what we are doing with the results.
            self.spinner.set_next_message(ANALYZING_MESSAGE);
        }
    }

    /// One streamed completion round. Returns the accumulated assistant text
    /// and the assembled tool calls as `(id, name, arguments)` triples.
    async fn stream_completion(&mut self) -> Result<(String, Vec<(String, String, String)>)> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.llm.model)
            .messages(self.conversation_history.clone())
            .tools(vec![tools::create_execute_command_tool()])
            .build()
            .context("Failed to build completion request")?;

        self.spinner.start(THINKING_MESSAGE);

        let mut stream = match self.client.chat().create_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.spinner.stop();
                return Err(e).context("LLM request failed");
            }
        };

        let mut content = String::new();
        // Tool calls arrive as fragments that must be assembled by index.
        let mut tool_call_map: HashMap<u32, (String, String, String)> = HashMap::new();
        let mut first_delta = true;

        while let Some(item) = stream.next().await {
            let response = match item {
                Ok(response) => response,
                Err(e) => {
                    self.spinner.stop();
                    return Err(e).context("LLM stream failed");
                }
            };

            for choice in response.choices {
                if first_delta {
                    self.spinner.stop();
                    first_delta = false;
                }

                if let Some(text) = choice.delta.content {
                    content.push_str(&text);
                    self.spinner.write(&text, None);
                }

                if let Some(chunks) = choice.delta.tool_calls {
                    for chunk in chunks {
                        let entry = tool_call_map
                            .entry(chunk.index)
                            .or_insert_with(|| (String::new(), String::new(), String::new()));
                        if let Some(id) = chunk.id {
                            entry.0 = id;
                        }
                        if let Some(function) = chunk.function {
                            if let Some(name) = function.name {
                                entry.1 = name;
                            }
                            if let Some(args) = function.arguments {
                                entry.2.push_str(&args);
                            }
                        }
                    }
                }
            }
        }

        // Covers an empty response where no delta ever arrived.
        self.spinner.stop();

        let mut indexed: Vec<(u32, (String, String, String))> =
            tool_call_map.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        let calls = indexed
            .into_iter()
            .map(|(_, call)| call)
            .filter(|(id, _, _)| !id.is_empty())
            .collect();

        Ok((content, calls))
    }

    /// Run one tool call and build the payload that goes back to the model.
    /// Returns `(payload, success)`.
    async fn dispatch_tool(&self, name: &str, raw_args: &str) -> (String, bool) {
        if name != TOOL_EXECUTE_COMMAND {
            warn!("Model called unknown tool: {}", name);
            return (json!({ "error": "Unknown tool" }).to_string(), false);
        }

        let args: ExecuteCommandArgs = match serde_json::from_str(raw_args) {
            Ok(args) => args,
            Err(e) => {
                warn!("Invalid tool arguments: {}", e);
                return (
                    json!({ "error": format!("Invalid arguments: {e}") }).to_string(),
                    false,
                );
            }
        };

        info!(
            "Executing command: {} (dangerous: {})",
            args.command, args.is_dangerous
        );
        // Echo the command on its own line, set apart from streamed prose.
        self.spinner
            .write(&format!("\n$ {}\n", args.command), Some(Color::Cyan));

        let mut request = ExecutionRequest::new(args.command);
        request.dangerous = args.is_dangerous;
        request.timeout = self.config.command_timeout;
        if args.is_dangerous {
            request.confirm = self.confirm_fn.clone();
        }

        let result = self.engine.execute(&request).await;
        let success = result.success;
        (tools::tool_payload(&result), success)
    }
}

/// Keep the history bounded while always preserving the system prompt.
fn trim_history(history: &mut Vec<ChatCompletionRequestMessage>) {
    if history.len() <= MAX_HISTORY_MESSAGES {
        return;
    }

    let mut new_history = Vec::with_capacity(MAX_HISTORY_MESSAGES);
    if let Some(first) = history.first() {
        new_history.push(first.clone());
    }

    let to_keep = history
        .iter()
        .rev()
        .take(MAX_HISTORY_MESSAGES.saturating_sub(1))
        .cloned()
        .collect::<Vec<_>>();
    for msg in to_keep.into_iter().rev() {
        new_history.push(msg);
    }

    *history = new_history;
}
