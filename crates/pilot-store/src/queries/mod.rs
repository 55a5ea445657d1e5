//! Database query functions implementing the execution store contract.

mod executions;

pub use executions::{
    count_pending_retries, get_execution, get_queued_tasks_for_project, get_running_executions,
    get_stale_running_executions, is_task_queued, save_execution, update_execution_status,
};
