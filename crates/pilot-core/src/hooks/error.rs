#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to read settings file at {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings file at {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file at {0} does not contain a JSON object at its root")]
    NotAnObject(String),

    #[error("malformed JSON in settings file at {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to extract hook script")]
    ScriptWrite(#[source] std::io::Error),
}
