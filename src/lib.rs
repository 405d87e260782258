//! Shex - a natural language command line assistant
//!
//! This library provides the core functionality for Shex, including:
//! - The command execution engine (PTY-backed on Unix-like hosts, with
//!   timeout handling and render normalization)
//! - The LLM agent loop that turns natural language into tool calls
//! - A terminal status animation that shares the screen with command output
//! - Configuration, logging, and conversation persistence
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shex::exec::{ExecutionEngine, ExecutionRequest};
//! use shex::status::Spinner;
//!
//! #[tokio::main]
//! async fn main() {
//!     let spinner = Arc::new(Spinner::new());
//!     let engine = ExecutionEngine::new(Arc::clone(&spinner));
//!
//!     let result = engine.execute(&ExecutionRequest::new("echo hello")).await;
//!     assert!(result.success);
//!     assert_eq!(result.output, "hello\n");
//! }
//! ```

pub mod agent;
pub mod config;
pub mod exec;
pub mod status;
pub mod utils;

// Re-export commonly used types
pub use agent::AgentSession;
pub use config::{AgentConfig, LlmConfig};
pub use exec::{ExecutionEngine, ExecutionRequest, ExecutionResult};
pub use status::Spinner;
