use std::env;
use std::path::PathBuf;

/// Execution-store configuration.
///
/// Reads from the `PILOT_STORE_PATH` environment variable, falling back to
/// `~/.local/share/pilot/pilot.db` when unset.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file. Created on first use.
    pub path: PathBuf,
}

impl StoreConfig {
    /// Build a config from the environment.
    ///
    /// Priority: `PILOT_STORE_PATH` env var, then the platform data directory.
    pub fn from_env() -> Self {
        let path = env::var_os("PILOT_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path);
        Self { path }
    }

    /// Build a config from an explicit path (useful for tests and CLI flags).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default database path used when no environment variable or config
    /// file entry is set.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("pilot")
            .join("pilot.db")
    }

    /// A `sqlx` connection URL for this path, creating the database file if
    /// it does not already exist.
    pub fn connect_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_new() {
        let cfg = StoreConfig::new("/tmp/somewhere/pilot.db");
        assert_eq!(cfg.path, PathBuf::from("/tmp/somewhere/pilot.db"));
    }

    #[test]
    fn connect_url_uses_rwc_mode() {
        let cfg = StoreConfig::new("/tmp/x/pilot.db");
        assert_eq!(cfg.connect_url(), "sqlite:///tmp/x/pilot.db?mode=rwc");
    }

    #[test]
    fn default_path_is_under_pilot_dir() {
        let path = StoreConfig::default_path();
        assert_eq!(path.file_name().unwrap(), "pilot.db");
        assert_eq!(path.parent().unwrap().file_name().unwrap(), "pilot");
    }
}
