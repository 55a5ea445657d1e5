//! Hook-gate manager.
//!
//! Installs quality-gate scripts (destructive-command guard, lint-on-save,
//! test-on-stop) into an external agent's settings file before a run and
//! reliably removes them afterward, tolerating crashes and concurrent
//! installs by treating cleanup as an idempotent scan rather than a literal
//! undo.

mod config;
mod error;
mod manager;
mod settings;

pub use config::{HookConfig, HookEvent};
pub use error::HookError;
pub use manager::{HookGateManager, RestoreGuard};
