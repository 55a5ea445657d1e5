//! Streaming backend adapter.
//!
//! Drives an external AI coding agent (Claude Code, or any CLI emitting a
//! compatible stream-JSON wire format) to completion on one task, normalizing
//! its output into [`BackendEvent`]s and enforcing liveness and shutdown
//! contracts that the dispatcher relies on.

mod classify;
mod error;
mod parser;
mod registry;
mod stdio;
mod trait_def;
mod types;

pub use error::BackendError;
pub use registry::BackendRegistry;
pub use stdio::StdioBackend;
pub use trait_def::Backend;
pub use types::{
    BackendEvent, ClassifiedError, ErrorClass, EventHandler, ExecuteOptions, ExecutionResult,
    LivenessCallback,
};

pub use classify::classify;
pub use parser::parse_line;
