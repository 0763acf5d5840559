// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::task::AgentKind;

/// Supervise an interactive AI coding agent and surface its lifecycle state.
#[derive(Debug, Parser)]
#[command(name = "tallr", version, about)]
pub struct Config {
    /// Project name override (defaults to the repo directory name).
    #[arg(long, env = "TL_PROJECT")]
    pub project: Option<String>,

    /// Repository path (defaults to the working directory).
    #[arg(long, env = "TL_REPO")]
    pub repo: Option<String>,

    /// Agent type override (claude, gemini, codex, generic).
    #[arg(long, env = "TL_AGENT")]
    pub agent: Option<String>,

    /// Task title shown in the dashboard.
    #[arg(long, env = "TL_TITLE")]
    pub title: Option<String>,

    /// Preferred IDE recorded on the task.
    #[arg(long, env = "TL_IDE")]
    pub ide: Option<String>,

    /// Bearer token for the control plane (generated when unset).
    #[arg(long, env = "TALLR_TOKEN")]
    pub token: Option<String>,

    /// External gateway URL; overrides the default loopback control plane
    /// as the target of hook callbacks and receives mirrored updates.
    #[arg(long, env = "TALLR_GATEWAY")]
    pub gateway: Option<String>,

    /// Control plane port on loopback (0 = ephemeral).
    #[arg(long, env = "TALLR_PORT", default_value = "4117")]
    pub port: u16,

    /// Log format (json or text).
    #[arg(long, env = "TALLR_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TALLR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// External pattern-rule file (hot-reloaded on change).
    #[arg(long, env = "TALLR_PATTERNS")]
    pub patterns: Option<PathBuf>,

    /// Scrollback ring capacity in bytes.
    #[arg(long, default_value = "65536")]
    pub ring_size: usize,

    /// Quiet window after the last fetch-end before IDLE, in milliseconds.
    #[arg(long, default_value = "500")]
    pub quiet_window_ms: u64,

    /// Classifier refresh cadence in milliseconds.
    #[arg(long, default_value = "250")]
    pub classify_interval_ms: u64,

    /// Health ping interval in seconds.
    #[arg(long, default_value = "10")]
    pub ping_interval_secs: u64,

    /// Grace period between shutdown and SIGKILL, in milliseconds.
    #[arg(long, default_value = "2000")]
    pub drain_timeout_ms: u64,

    /// The agent command to wrap (everything after the flags).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.is_empty() {
            anyhow::bail!("usage: tallr <agent-command> [agent-args...]");
        }
        if let Some(ref agent) = self.agent {
            agent.parse::<AgentKind>()?;
        }
        if self.classify_interval_ms == 0 {
            anyhow::bail!("--classify-interval-ms must be positive");
        }
        Ok(())
    }

    /// Resolve the agent type: explicit override, else inferred from the
    /// wrapped binary's name.
    pub fn agent_kind(&self) -> AgentKind {
        match self.agent {
            Some(ref s) => s.parse().unwrap_or(AgentKind::Generic),
            None => self
                .command
                .first()
                .map(|program| AgentKind::from_command(program))
                .unwrap_or(AgentKind::Generic),
        }
    }

    /// Repository path for the task.
    pub fn repo_path(&self) -> String {
        match self.repo {
            Some(ref repo) => repo.clone(),
            None => std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_owned()),
        }
    }

    /// Task title: explicit override, else the wrapped command line.
    pub fn task_title(&self) -> String {
        match self.title {
            Some(ref title) => title.clone(),
            None => self.command.join(" "),
        }
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }

    pub fn classify_interval(&self) -> Duration {
        Duration::from_millis(self.classify_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
