/// Hook-gate events the core recognizes in a settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    Stop,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::Stop => "Stop",
        }
    }
}

/// Which gates to install. `enabled` is the master switch; the other flags
/// only take effect when it is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookConfig {
    pub enabled: bool,
    pub run_tests_on_stop: bool,
    pub block_destructive: bool,
    pub lint_on_save: bool,
}

impl HookConfig {
    /// `run_tests_on_stop` and `block_destructive` default to `enabled`;
    /// `lint_on_save` always defaults to `false` regardless.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            run_tests_on_stop: enabled,
            block_destructive: enabled,
            lint_on_save: false,
        }
    }

    pub fn with_lint_on_save(mut self, lint_on_save: bool) -> Self {
        self.lint_on_save = lint_on_save;
        self
    }

    pub fn with_run_tests_on_stop(mut self, run_tests_on_stop: bool) -> Self {
        self.run_tests_on_stop = run_tests_on_stop;
        self
    }

    pub fn with_block_destructive(mut self, block_destructive: bool) -> Self {
        self.block_destructive = block_destructive;
        self
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self::new(false)
    }
}
