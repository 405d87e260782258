//! Command execution engine.
//!
//! Runs a shell command as a human would experience it at a terminal and
//! returns a structured result. The pieces:
//!
//! - `engine`: spawn, I/O multiplexing, timeout, result assembly
//! - `channel`: the platform transport (PTY on Unix-like hosts, pipes
//!   elsewhere) behind one surface
//! - `normalize`: carriage-return overwrite collapsing for captured output
//!
//! Every failure mode is converted into an [`ExecutionResult`] at the
//! `execute` boundary; nothing is thrown across it.

pub mod channel;
pub mod engine;
pub mod normalize;
pub mod pipe;
pub mod pty;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use channel::{ChannelRead, ChannelSession, InputEvent, ProcessChannel};
pub use engine::ExecutionEngine;
pub use normalize::{normalize_render, strip_ansi_codes};

/// Default wall-clock limit for one command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The user declined the confirmation prompt; no process was spawned.
pub const CODE_DECLINED: i32 = -1;
/// The wall-clock limit elapsed and the child was forcibly terminated.
pub const CODE_TIMEOUT: i32 = -2;
/// Spawn or channel failure inside the engine itself.
pub const CODE_ENGINE_FAULT: i32 = -3;

/// Callback asked to approve a dangerous command before it is spawned.
/// Receives the exact command text.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One command to run.
pub struct ExecutionRequest {
    /// Shell syntax, interpreted by the host shell.
    pub command: String,
    /// Advisory flag supplied by the caller; gates the confirmation callback.
    pub dangerous: bool,
    /// Wall-clock limit for the whole execution.
    pub timeout: Duration,
    /// Invoked with the command text before spawning when `dangerous` is set.
    pub confirm: Option<ConfirmFn>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            dangerous: false,
            timeout: DEFAULT_TIMEOUT,
            confirm: None,
        }
    }
}

/// Outcome of one [`ExecutionRequest`].
///
/// Negative codes are engine-level outcomes (declined, timeout, fault); a
/// child that ran to completion keeps its own exit code verbatim, with
/// `success` meaning "exited zero". On the PTY path output and error are one
/// merged stream and `error` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    #[serde(rename = "return_code")]
    pub code: i32,
}

impl ExecutionResult {
    pub(crate) fn engine_error(error: String, code: i32) -> Self {
        Self {
            success: false,
            output: String::new(),
            error,
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = ExecutionRequest::new("ls");
        assert_eq!(request.command, "ls");
        assert!(!request.dangerous);
        assert_eq!(request.timeout, DEFAULT_TIMEOUT);
        assert!(request.confirm.is_none());
    }

    #[test]
    fn test_result_serializes_with_return_code_field() {
        let result = ExecutionResult {
            success: true,
            output: "hello\n".to_string(),
            error: String::new(),
            code: 0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["return_code"], 0);
        assert_eq!(json["success"], true);
    }
}
