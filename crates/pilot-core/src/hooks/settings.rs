//! JSON shape and merge/cleanup logic for an external hooks settings file.
//!
//! The file is treated as an arbitrary JSON object owned jointly with other
//! tools: every key other than `hooks` is read and re-written verbatim.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::config::HookEvent;
use super::error::HookError;

fn pilot_command_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r".*/pilot-hooks-[^/]+/pilot-.*\.sh$").expect("valid regex"))
}

/// A settings-file entry's `command` path identifies it as pilot-managed.
pub fn is_pilot_managed(command: &str) -> bool {
    pilot_command_pattern().is_match(command)
}

/// A pilot-managed entry is stale once its script no longer exists on disk.
pub fn is_stale(command: &str) -> bool {
    !Path::new(command).exists()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCommand {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    pub hooks: Vec<HookCommand>,
}

impl HookEntry {
    pub fn command(matcher: Option<&str>, command_path: &str) -> Self {
        Self {
            matcher: matcher.map(str::to_string),
            hooks: vec![HookCommand {
                kind: "command".to_string(),
                command: command_path.to_string(),
            }],
        }
    }
}

pub fn load_settings(path: &Path) -> Result<Value, HookError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).map_err(|source| HookError::Parse {
            path: path.display().to_string(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({})),
        Err(source) => Err(HookError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

pub fn save_settings_atomic(path: &Path, value: &Value) -> Result<(), HookError> {
    let wrap_write = |source: std::io::Error| HookError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(wrap_write)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755));
            }
        }
    }

    let mut contents = serde_json::to_string_pretty(value).expect("settings value always serializes");
    contents.push('\n');

    // Same-directory temp file so the final rename is atomic.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents.as_bytes()).map_err(wrap_write)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o644)).map_err(wrap_write)?;
    }

    std::fs::rename(&tmp_path, path).map_err(wrap_write)?;
    Ok(())
}

/// Deep-merge `fragment` into `root`'s `hooks` key, appending to existing
/// per-event arrays. If the existing `hooks` value uses the legacy
/// object-shaped format for any event, the whole key is replaced with a
/// fresh array-format object built from `fragment` alone.
pub fn merge_fragment(root: &mut Value, fragment: &[(HookEvent, HookEntry)]) -> Result<(), HookError> {
    let obj = root
        .as_object_mut()
        .ok_or_else(|| HookError::NotAnObject("<in-memory>".to_string()))?;

    let hooks_value = obj.entry("hooks").or_insert_with(|| Value::Object(Map::new()));

    let is_legacy = matches!(hooks_value, Value::Object(map) if map.values().any(Value::is_object));
    if is_legacy {
        *hooks_value = Value::Object(Map::new());
    }

    let hooks_map = hooks_value
        .as_object_mut()
        .expect("hooks value is always coerced to an object above");

    for (event, entry) in fragment {
        let entry_value = serde_json::to_value(entry).expect("HookEntry always serializes");
        let array = hooks_map
            .entry(event.as_str())
            .or_insert_with(|| Value::Array(Vec::new()));
        match array {
            Value::Array(items) => items.push(entry_value),
            other => *other = Value::Array(vec![entry_value]),
        }
    }

    Ok(())
}

/// Remove pilot-managed commands whose script file no longer exists.
/// Entries left with no commands are dropped; events left with no entries
/// are dropped; an empty `hooks` key is removed entirely. Returns whether
/// anything changed.
pub fn clean_stale_entries(root: &mut Value) -> bool {
    let mut changed = false;

    let Some(obj) = root.as_object_mut() else {
        return false;
    };
    let Some(hooks_value) = obj.get_mut("hooks") else {
        return false;
    };
    let Some(hooks_map) = hooks_value.as_object_mut() else {
        return false;
    };

    let mut drained_events = Vec::new();
    for (event_name, array_value) in hooks_map.iter_mut() {
        let Some(array) = array_value.as_array_mut() else {
            continue;
        };
        let before = array.len();
        array.retain_mut(|entry| {
            let Some(entry_obj) = entry.as_object_mut() else {
                return true;
            };
            let Some(commands) = entry_obj.get_mut("hooks").and_then(Value::as_array_mut) else {
                return true;
            };
            let before_cmds = commands.len();
            commands.retain(|c| {
                let Some(command) = c.get("command").and_then(Value::as_str) else {
                    return true;
                };
                !(is_pilot_managed(command) && is_stale(command))
            });
            if commands.len() != before_cmds {
                changed = true;
            }
            !commands.is_empty()
        });
        if array.len() != before {
            changed = true;
        }
        if array.is_empty() {
            drained_events.push(event_name.clone());
        }
    }

    for event_name in &drained_events {
        hooks_map.remove(event_name);
    }
    if hooks_map.is_empty() {
        obj.remove("hooks");
        changed = true;
    }

    changed
}
