// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-spawn shim installation.
//!
//! The shim must be on disk and referenced from `NODE_OPTIONS` before the
//! child execs so it loads ahead of the agent's entry point. Failure here
//! is recoverable: the caller falls back to pattern-only detection.

use std::path::{Path, PathBuf};

/// The embedded fetch-shim artifact written into the session directory.
pub const SHIM_JS: &str = include_str!("shim.js");

/// Write the shim into `session_dir` and return its path.
pub fn write_shim(session_dir: &Path) -> anyhow::Result<PathBuf> {
    let path = session_dir.join("tallr-shim.js");
    std::fs::write(&path, SHIM_JS)?;
    Ok(path)
}

/// Build the `NODE_OPTIONS` value that pre-loads the shim, preserving any
/// options the user already set.
pub fn node_options(existing: Option<&str>, shim_path: &Path) -> String {
    let require = format!("--require {}", shim_path.display());
    match existing {
        Some(prev) if !prev.trim().is_empty() => format!("{prev} {require}"),
        _ => require,
    }
}

/// Environment for a child carrying the shim.
pub fn shim_env(shim_path: &Path, task_id: &str, gateway_url: &str, token: &str) -> Vec<(String, String)> {
    vec![
        (
            "NODE_OPTIONS".to_owned(),
            node_options(std::env::var("NODE_OPTIONS").ok().as_deref(), shim_path),
        ),
        ("TALLR_TASK_ID".to_owned(), task_id.to_owned()),
        ("TALLR_GATEWAY".to_owned(), gateway_url.to_owned()),
        ("TALLR_TOKEN".to_owned(), token.to_owned()),
    ]
}

#[cfg(test)]
#[path = "shim_tests.rs"]
mod tests;
