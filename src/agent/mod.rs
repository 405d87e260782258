//! The LLM agent: conversation loop, tool definitions, prompt construction,
//! and context persistence.

pub mod persistence;
pub mod prompt;
pub mod session;
pub mod tools;

pub use session::{AgentSession, ContinueFn};
