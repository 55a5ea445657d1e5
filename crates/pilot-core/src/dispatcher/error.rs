use pilot_store::StoreError;

/// Errors returned by [`super::Dispatcher`]'s public operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("a queued or running execution already exists for task {0}")]
    Duplicate(String),

    #[error("store error")]
    Store(#[from] StoreError),
}
