// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[test]
fn merge_into_empty_document() {
    let mut settings = json!({});
    assert!(merge_hooks(&mut settings));

    for kind in ["PreToolUse", "Stop", "Notification"] {
        let groups = &settings["hooks"][kind];
        assert!(groups.is_array(), "{kind} missing");
        assert_eq!(groups.as_array().map(|a| a.len()), Some(1));
    }
}

#[test]
fn merge_is_idempotent() {
    let mut settings = json!({});
    assert!(merge_hooks(&mut settings));
    let after_first = settings.clone();

    assert!(!merge_hooks(&mut settings), "second merge must be a no-op");
    assert_eq!(settings, after_first);
}

#[test]
fn user_entries_preserved() {
    let mut settings = json!({
        "hooks": {
            "Custom": "echo test",
            "Stop": [{"matcher": "mine", "hooks": [{"type": "command", "command": "echo bye"}]}]
        },
        "permissions": {"allow": ["Bash(ls:*)"]}
    });
    merge_hooks(&mut settings);

    // User-authored entries survive untouched.
    assert_eq!(settings["hooks"]["Custom"], "echo test");
    assert_eq!(settings["hooks"]["Stop"][0]["matcher"], "mine");
    assert_eq!(settings["permissions"]["allow"][0], "Bash(ls:*)");

    // Tallr's group is appended after the user's.
    let stop = settings["hooks"]["Stop"].as_array().expect("array");
    assert_eq!(stop.len(), 2);
}

#[test]
fn same_key_non_array_entry_left_untouched() {
    let mut settings = json!({
        "hooks": {"PreToolUse": "user-script.sh"}
    });
    merge_hooks(&mut settings);
    assert_eq!(settings["hooks"]["PreToolUse"], "user-script.sh");
}

#[test]
fn install_twice_is_byte_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");

    install_hooks(&path).expect("first install");
    let first = std::fs::read(&path).expect("read");

    install_hooks(&path).expect("second install");
    let second = std::fs::read(&path).expect("read");

    assert_eq!(first, second);
}

#[test]
fn install_preserves_existing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"hooks":{"Custom":"echo test"}}"#).expect("seed");

    install_hooks(&path).expect("install");

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(value["hooks"]["Custom"], "echo test");
    assert!(value["hooks"]["PreToolUse"].is_array());
    assert!(value["hooks"]["Stop"].is_array());
    assert!(value["hooks"]["Notification"].is_array());
}

#[test]
fn hook_command_uses_env_not_literals() {
    let mut settings = json!({});
    merge_hooks(&mut settings);
    let command = settings["hooks"]["Stop"][0]["hooks"][0]["command"]
        .as_str()
        .expect("command string");
    assert!(command.contains("$TALLR_GATEWAY"));
    assert!(command.contains("$TALLR_TASK_ID"));
    assert!(command.contains("$TALLR_TOKEN"));
    assert!(command.contains("/v1/tasks/state"));
}

#[test]
fn hook_kind_mapping() {
    assert_eq!(
        map_hook_kind("PreToolUse"),
        Some((TaskState::Pending, "hook:PreToolUse".into()))
    );
    assert_eq!(
        map_hook_kind("Notification"),
        Some((TaskState::Pending, "hook:Notification".into()))
    );
    assert_eq!(map_hook_kind("Stop"), Some((TaskState::Idle, "hook:Stop".into())));
    assert_eq!(
        map_hook_kind("PostToolUse"),
        Some((TaskState::Working, "hook:PostToolUse".into()))
    );
    assert_eq!(map_hook_kind("SomethingElse"), None);
}
