// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Permission hook bridge.
//!
//! Merges Tallr-owned hook entries into the agent's settings file so the
//! supervisor still learns about permission prompts when the network shim
//! is unavailable. The merge preserves user-authored entries and is
//! idempotent: installing twice yields a byte-identical file.
//!
//! Hook commands carry no per-task values; the task id, control-plane URL,
//! and bearer token come from environment variables set on the child, so
//! the installed file is stable across sessions.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::task::TaskState;

/// Hook kinds Tallr installs.
const HOOK_KINDS: [&str; 3] = ["PreToolUse", "Stop", "Notification"];

/// Path of the agent's settings file, co-located with its config.
/// `CLAUDE_CONFIG_DIR` overrides the default `~/.claude`.
pub fn settings_path() -> PathBuf {
    let config_dir = std::env::var("CLAUDE_CONFIG_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_default();
        format!("{home}/.claude")
    });
    Path::new(&config_dir).join("settings.json")
}

/// The shell command for one hook kind: POST the task id and hook kind to
/// the control plane. `curl -sf` keeps a missing supervisor harmless.
fn hook_command(kind: &str) -> String {
    format!(
        "curl -sf -X POST -H \"Authorization: Bearer $TALLR_TOKEN\" \
         -H 'Content-Type: application/json' \
         -d \"{{\\\"taskId\\\":\\\"$TALLR_TASK_ID\\\",\\\"hook\\\":\\\"{kind}\\\"}}\" \
         \"$TALLR_GATEWAY/v1/tasks/state\" 2>/dev/null || true"
    )
}

/// One Tallr hook group for the given kind.
fn hook_entry(kind: &str) -> Value {
    json!({
        "matcher": "",
        "hooks": [{
            "type": "command",
            "command": hook_command(kind)
        }]
    })
}

/// Merge Tallr's hook entries into a settings document.
///
/// Returns `true` when the document changed. User entries under the same
/// kind are left untouched; Tallr's group is appended only when an
/// identical group is not already present. Unknown keys anywhere in the
/// document are preserved.
pub fn merge_hooks(settings: &mut Value) -> bool {
    if !settings.is_object() {
        *settings = json!({});
    }
    let Some(root) = settings.as_object_mut() else {
        return false;
    };
    let hooks = root.entry("hooks").or_insert_with(|| json!({}));
    if !hooks.is_object() {
        // A user-authored scalar under "hooks" stays as-is; nothing to do
        // without clobbering it.
        return false;
    }
    let Some(hooks_obj) = hooks.as_object_mut() else {
        return false;
    };

    let mut changed = false;
    for kind in HOOK_KINDS {
        let entry = hook_entry(kind);
        let groups = hooks_obj.entry(kind).or_insert_with(|| json!([]));
        match groups.as_array_mut() {
            Some(arr) => {
                if !arr.contains(&entry) {
                    arr.push(entry);
                    changed = true;
                }
            }
            // Same-key user entry of another shape: leave it untouched.
            None => continue,
        }
    }
    changed
}

/// Install Tallr hooks into the settings file at `path`.
///
/// Reads the existing file (tolerating absence), merges, and rewrites only
/// when the merge changed something, so re-installation is byte-identical.
pub fn install_hooks(path: &Path) -> anyhow::Result<()> {
    let mut settings = match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
        Err(e) => return Err(e.into()),
    };

    if merge_hooks(&mut settings) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&settings)?)?;
    }
    Ok(())
}

/// Map a hook kind reported to `/v1/tasks/state` to a state proposal.
pub fn map_hook_kind(kind: &str) -> Option<(TaskState, String)> {
    let state = match kind {
        "PreToolUse" | "Notification" => TaskState::Pending,
        "Stop" => TaskState::Idle,
        "PostToolUse" | "UserPromptSubmit" => TaskState::Working,
        _ => return None,
    };
    Some((state, format!("hook:{kind}")))
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
