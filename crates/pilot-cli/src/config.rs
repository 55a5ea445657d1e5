//! Configuration file management for `pilot`.
//!
//! Provides a TOML-based config file at `~/.config/pilot/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default. This is
//! the only place in the workspace that reads the environment for
//! configuration purposes -- `pilot-core` takes every tunable by
//! construction.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pilot_core::dispatcher::DispatcherConfig;
use pilot_core::hooks::HookConfig;
use pilot_core::scheduler::SchedulerConfig;
use pilot_store::StoreConfig;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub store: StoreSection,
    pub backend: BackendSection,
    #[serde(default)]
    pub hooks: HooksSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSection {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendSection {
    /// Command to invoke as the coding-agent subprocess, e.g. `claude`.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HooksSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub lint_on_save: bool,
}

impl Default for HooksSection {
    fn default() -> Self {
        Self {
            enabled: false,
            lint_on_save: false,
        }
    }
}

/// Return the pilot config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/pilot` or `~/.config/pilot`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("pilot");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("pilot")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PilotConfig {
    pub store: StoreConfig,
    pub backend_command: String,
    pub backend_args: Vec<String>,
    pub hook_config: HookConfig,
    pub dispatcher_config: DispatcherConfig,
    pub scheduler_config: SchedulerConfig,
}

impl PilotConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - Store path: `cli_store_path` > `PILOT_STORE_PATH` env > config file
    ///   `store.path` > `StoreConfig::default_path()`.
    /// - Backend command: `PILOT_BACKEND_COMMAND` env > config file
    ///   `backend.command` > `"claude"`.
    pub fn resolve(cli_store_path: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let store_path = if let Some(path) = cli_store_path {
            PathBuf::from(path)
        } else if let Ok(path) = std::env::var("PILOT_STORE_PATH") {
            PathBuf::from(path)
        } else if let Some(ref cfg) = file_config {
            PathBuf::from(&cfg.store.path)
        } else {
            StoreConfig::default_path()
        };

        let (backend_command, backend_args) = if let Ok(command) = std::env::var("PILOT_BACKEND_COMMAND") {
            (command, Vec::new())
        } else if let Some(ref cfg) = file_config {
            (cfg.backend.command.clone(), cfg.backend.args.clone())
        } else {
            ("claude".to_string(), Vec::new())
        };

        let hooks_section = file_config.as_ref().map(|c| &c.hooks);
        let hook_config = match hooks_section {
            Some(h) => HookConfig::new(h.enabled).with_lint_on_save(h.lint_on_save),
            None => HookConfig::default(),
        };

        Ok(Self {
            store: StoreConfig::new(store_path),
            backend_command,
            backend_args,
            hook_config,
            dispatcher_config: DispatcherConfig {
                stale_task_duration: Duration::ZERO,
                drain_timeout: Duration::from_secs(10),
            },
            scheduler_config: SchedulerConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("pilot/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("pilot");
        let path = dir.join("config.toml");

        let original = ConfigFile {
            store: StoreSection {
                path: "/tmp/pilot.db".to_string(),
            },
            backend: BackendSection {
                command: "claude".to_string(),
                args: vec!["-p".to_string()],
            },
            hooks: HooksSection {
                enabled: true,
                lint_on_save: false,
            },
        };

        std::fs::create_dir_all(&dir).unwrap();
        let contents = toml::to_string_pretty(&original).unwrap();
        std::fs::write(&path, &contents).unwrap();

        let loaded: ConfigFile = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.store.path, original.store.path);
        assert_eq!(loaded.backend.command, original.backend.command);
        assert_eq!(loaded.hooks.enabled, original.hooks.enabled);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env_and_default() {
        let config = PilotConfig::resolve(Some("/tmp/cli-path.db")).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/cli-path.db"));
    }
}
