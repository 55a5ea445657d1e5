//! Durable execution store contract.
//!
//! This crate owns the only state that must survive a process restart: the
//! `executions` table. Everything else in the workspace treats it as an
//! opaque, crash-safe ledger reached through [`queries`].
//!
//! The reference backing store is an embedded, write-ahead-logged SQLite
//! database accessed through `sqlx`. Callers that need the durability and
//! single-writer-serialization properties described in the store contract
//! should go through [`pool::create_pool`], never open their own connection.

pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::StoreConfig;
pub use error::StoreError;
pub use models::{ComplexityClass, Execution, ExecutionStatus, Task};
