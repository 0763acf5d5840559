// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn write_shim_places_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_shim(dir.path()).expect("write");
    assert!(path.ends_with("tallr-shim.js"));

    let contents = std::fs::read_to_string(&path).expect("read");
    assert!(contents.contains("fetch-start"));
    assert!(contents.contains("permission-response"));
}

#[test]
fn node_options_without_existing() {
    let opts = node_options(None, Path::new("/tmp/tallr-shim.js"));
    assert_eq!(opts, "--require /tmp/tallr-shim.js");
}

#[test]
fn node_options_preserves_user_options() {
    let opts = node_options(Some("--max-old-space-size=4096"), Path::new("/s/shim.js"));
    assert_eq!(opts, "--max-old-space-size=4096 --require /s/shim.js");
}

#[test]
fn node_options_ignores_blank_existing() {
    let opts = node_options(Some("   "), Path::new("/s/shim.js"));
    assert_eq!(opts, "--require /s/shim.js");
}

#[test]
fn shim_env_carries_task_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shim = write_shim(dir.path()).expect("write");
    let env = shim_env(&shim, "task-1", "http://127.0.0.1:4117", "tok");

    let get = |key: &str| {
        env.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    };
    assert_eq!(get("TALLR_TASK_ID"), "task-1");
    assert_eq!(get("TALLR_GATEWAY"), "http://127.0.0.1:4117");
    assert_eq!(get("TALLR_TOKEN"), "tok");
    assert!(get("NODE_OPTIONS").contains("--require"));
}
