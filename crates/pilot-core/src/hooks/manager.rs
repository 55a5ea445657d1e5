use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::config::{HookConfig, HookEvent};
use super::error::HookError;
use super::settings::{self, HookEntry};

const BASH_GUARD_SCRIPT: &str = "\
#!/bin/sh
input=\"$(cat)\"
if printf '%s' \"$input\" | grep -Eq '\"command\"[[:space:]]*:[[:space:]]*\"[^\"]*(rm -rf /|:\\(\\)\\{ :|mkfs)'; then
  printf '{\"decision\":\"block\",\"reason\":\"blocked destructive command\"}'
fi
exit 0
";

const TEST_RUNNER_SCRIPT: &str = "#!/bin/sh\nexec cargo test --quiet\n";

const LINT_SCRIPT: &str = "#!/bin/sh\nexec cargo fmt --check\n";

/// Installs and removes hook-gate scripts in an external settings file.
pub struct HookGateManager {
    scripts_root: PathBuf,
}

impl HookGateManager {
    pub fn new() -> Self {
        Self {
            scripts_root: std::env::temp_dir(),
        }
    }

    /// Override where extracted script directories are created. Tests use
    /// this to keep everything inside a tempdir.
    pub fn with_scripts_root(root: impl Into<PathBuf>) -> Self {
        Self {
            scripts_root: root.into(),
        }
    }

    /// Extract the gates named by `config` into a fresh
    /// `pilot-hooks-<random>/` directory and deep-merge them into the
    /// settings file at `settings_path`. The caller MUST call
    /// [`RestoreGuard::restore`] before returning, even on the error path.
    pub fn install_hooks(
        &self,
        settings_path: &Path,
        config: &HookConfig,
    ) -> Result<RestoreGuard, HookError> {
        let dir_name = format!("pilot-hooks-{:x}", rand::random::<u64>());
        let script_dir = self.scripts_root.join(dir_name);
        fs::create_dir_all(&script_dir).map_err(HookError::ScriptWrite)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_dir, fs::Permissions::from_mode(0o755))
                .map_err(HookError::ScriptWrite)?;
        }

        let mut fragment: Vec<(HookEvent, HookEntry)> = Vec::new();

        if config.enabled && config.block_destructive {
            let path = write_script(&script_dir, "pilot-bash-guard.sh", BASH_GUARD_SCRIPT)?;
            fragment.push((HookEvent::PreToolUse, HookEntry::command(Some("Bash"), &path)));
        }
        if config.enabled && config.lint_on_save {
            let path = write_script(&script_dir, "pilot-lint.sh", LINT_SCRIPT)?;
            fragment.push((
                HookEvent::PostToolUse,
                HookEntry::command(Some("Edit|Write"), &path),
            ));
        }
        if config.enabled && config.run_tests_on_stop {
            let path = write_script(&script_dir, "pilot-test-runner.sh", TEST_RUNNER_SCRIPT)?;
            fragment.push((HookEvent::Stop, HookEntry::command(None, &path)));
        }

        let mut root = settings::load_settings(settings_path)?;
        settings::merge_fragment(&mut root, &fragment)?;
        settings::save_settings_atomic(settings_path, &root)?;

        debug!(
            settings_path = %settings_path.display(),
            script_dir = %script_dir.display(),
            gates = fragment.len(),
            "installed hook gates"
        );

        Ok(RestoreGuard {
            script_dir,
            settings_path: settings_path.to_path_buf(),
            restored: false,
        })
    }

    /// Idempotent scan: remove any pilot-managed entry whose script no
    /// longer exists, preserving everything else byte-for-byte (after JSON
    /// normalization).
    pub fn clean_stale_pilot_hooks(&self, settings_path: &Path) -> Result<(), HookError> {
        clean_stale_pilot_hooks(settings_path)
    }
}

impl Default for HookGateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn clean_stale_pilot_hooks(settings_path: &Path) -> Result<(), HookError> {
    let mut root = settings::load_settings(settings_path)?;
    if settings::clean_stale_entries(&mut root) {
        settings::save_settings_atomic(settings_path, &root)?;
    }
    Ok(())
}

fn write_script(dir: &Path, name: &str, contents: &str) -> Result<String, HookError> {
    let path = dir.join(name);
    fs::write(&path, contents).map_err(HookError::ScriptWrite)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).map_err(HookError::ScriptWrite)?;
    }
    Ok(path.display().to_string())
}

/// Returned by [`HookGateManager::install_hooks`]. Restoring does not
/// blindly rewrite the original settings bytes -- those may themselves
/// carry stale pilot entries from a previous crash -- it re-runs the same
/// stale-entry scan used for crash recovery.
#[must_use = "the hook restore guard must be restored before returning"]
pub struct RestoreGuard {
    script_dir: PathBuf,
    settings_path: PathBuf,
    restored: bool,
}

impl RestoreGuard {
    pub fn restore(mut self) -> Result<(), HookError> {
        self.restored = true;
        clean_stale_pilot_hooks(&self.settings_path)?;
        let _ = fs::remove_dir_all(&self.script_dir);
        Ok(())
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if !self.restored {
            warn!(
                script_dir = %self.script_dir.display(),
                "hook restore guard dropped without calling restore()"
            );
        }
    }
}
