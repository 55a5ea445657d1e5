//! The `Backend` trait -- the adapter interface for external coding-agent
//! runtimes.
//!
//! Implementations wrap a specific invocation style (a stdio subprocess, an
//! HTTP/SSE client against a locally-managed server, ...) and expose the
//! same small capability set so the dispatcher never needs to know which
//! one it is driving. The trait is intentionally object-safe so it can be
//! stored as `Box<dyn Backend>` in a [`super::BackendRegistry`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{ExecuteOptions, ExecutionResult};
use super::BackendError;

/// Adapter interface for running an external AI coding agent to completion
/// on one task.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier (e.g. `"claude-code-stdio"`).
    fn name(&self) -> &str;

    /// Whether this backend's underlying command/service is currently
    /// reachable. Does not spawn a task; used for preflight checks.
    async fn is_available(&self) -> bool;

    /// Run one task to completion.
    ///
    /// This is the only operation that blocks. `opts.event_handler` is
    /// invoked once per normalized event, in stdout order, from the same
    /// task that drives the parser; it must not itself block on I/O.
    /// `cancel` triggers the shutdown protocol (soft-terminate, close
    /// stdin, wait for the grace period, hard-kill, drain).
    async fn execute(
        &self,
        opts: ExecuteOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, BackendError>;
}

// Compile-time assertion: Backend must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Backend) {}
};
