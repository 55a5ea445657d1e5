/// Errors returned by [`super::Scheduler`]'s public operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
}
