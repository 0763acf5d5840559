// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude-specific detection: the pre-loaded fetch shim (fd 3/4 protocol)
//! and the permission hook bridge.

pub mod detect;
pub mod feed;
pub mod hooks;
pub mod shim;

use std::path::PathBuf;

use tracing::warn;

use super::tallr_session_dir;

/// Artifacts prepared before spawning a Claude child.
pub struct ClaudeSetup {
    /// Environment for the child: `NODE_OPTIONS` preload plus the task
    /// identity the hook commands read.
    pub env_vars: Vec<(String, String)>,
    pub session_dir: PathBuf,
}

/// Prepare a Claude session: write the shim artifact and install the hook
/// bridge.
///
/// Must run before the backend spawns so the child finds the shim on disk.
/// A hook-install failure is downgraded to a warning; the shim and the
/// pattern classifier still cover detection.
pub fn prepare(task_id: &str, gateway_url: &str, token: &str) -> anyhow::Result<ClaudeSetup> {
    let session_dir = tallr_session_dir(task_id)?;
    let shim_path = shim::write_shim(&session_dir)?;

    if let Err(e) = hooks::install_hooks(&hooks::settings_path()) {
        warn!("hook bridge install failed: {e}");
    }

    let env_vars = shim::shim_env(&shim_path, task_id, gateway_url, token);
    Ok(ClaudeSetup {
        env_vars,
        session_dir,
    })
}
