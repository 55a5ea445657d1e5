use super::types::ClassifiedError;

/// Errors returned by [`super::Backend::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to spawn backend process")]
    SubprocessSpawn(#[source] std::io::Error),

    #[error("backend run was cancelled")]
    Cancelled,

    #[error("{0}")]
    Classified(ClassifiedError),
}

impl BackendError {
    pub fn classified(err: ClassifiedError) -> Self {
        Self::Classified(err)
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend run classified as {:?}: {}", self.class, self.message)
    }
}
