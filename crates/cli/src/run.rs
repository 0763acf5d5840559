// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level supervisor runner, shared by `main` and integration tests.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::driver::claude;
use crate::driver::claude::detect::NetworkDetector;
use crate::driver::claude::feed::{ControlWriter, ShimFeed};
use crate::driver::pattern::PatternDetector;
use crate::driver::tracker::StateTracker;
use crate::driver::{rules, Confidence, Detector, Source};
use crate::pty::{stdio, ExitStatus, PtyHost, SpawnOptions};
use crate::session::{Session, SessionConfig};
use crate::settings::default_settings_path;
use crate::task::{now_ms, AgentKind, StateTransition, TaskState, TransitionDetails};
use crate::transport::state::{Store, StoreConfig, TaskUpsert, TerminalShared};
use crate::transport::{auth, build_router, gateway};

pub struct RunResult {
    pub status: ExitStatus,
    pub store: Arc<Store>,
}

/// Map `DEBUG` namespaces (`tallr:state,tallr:network,...`) to tracing
/// filter directives.
pub fn debug_filter_directives(debug: &str) -> Vec<String> {
    debug
        .split(',')
        .filter_map(|ns| {
            let target = match ns.trim() {
                "tallr:state" => "tallr::driver::tracker",
                "tallr:network" => "tallr::driver::claude",
                "tallr:pattern" => "tallr::driver::pattern",
                "tallr:api" => "tallr::transport",
                "tallr:cli" => "tallr",
                "" => return None,
                other => {
                    // Unknown namespace: take it verbatim minus the prefix.
                    return other.strip_prefix("tallr:").map(|m| format!("tallr::{m}=debug"));
                }
            };
            Some(format!("{target}=debug"))
        })
        .collect()
}

/// Initialize tracing from config and the `DEBUG` environment variable.
///
/// Uses `try_init` so it is safe to call multiple times (e.g. from tests).
/// The log stream goes to stderr; stdout belongs to the wrapped child.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let mut spec = config.log_level.clone();
    if let Ok(debug) = std::env::var("DEBUG") {
        for directive in debug_filter_directives(&debug) {
            spec.push(',');
            spec.push_str(&directive);
        }
    }
    let filter = EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
        _ => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    drop(result);
}

/// Run a supervised session to completion.
///
/// Binds the control plane, registers the task, prepares agent-specific
/// artifacts, spawns the child on a PTY, and drives the session loop. The
/// returned status is the child's.
pub async fn run(config: Config) -> anyhow::Result<RunResult> {
    init_tracing(&config);

    let shutdown = CancellationToken::new();
    let agent = config.agent_kind();
    let task_id = uuid::Uuid::new_v4().to_string();
    let token = config
        .token
        .clone()
        .unwrap_or_else(auth::generate_token);

    // 1. Bind the control plane early so the agent setup knows its URL.
    //    Loopback only; the bearer token is the sole credential.
    let listener = TcpListener::bind(("127.0.0.1", config.port))
        .await
        .map_err(|e| anyhow::anyhow!("control plane bind failed: {e}"))?;
    let local_url = format!("http://127.0.0.1:{}", listener.local_addr()?.port());
    let gateway_url = config.gateway.clone().unwrap_or_else(|| local_url.clone());
    info!("control plane listening on {local_url}");

    // 2. Agent-specific pre-spawn setup. Shim failure is recoverable.
    let setup = if agent == AgentKind::Claude {
        match claude::prepare(&task_id, &gateway_url, &token) {
            Ok(setup) => Some(setup),
            Err(e) => {
                warn!("shim setup failed, falling back to pattern detection: {e}");
                None
            }
        }
    } else {
        None
    };
    let has_launcher = setup.is_some();

    // 3. Shared state: terminal, registry, tracker channel.
    let (cols, rows) = stdio::terminal_size().unwrap_or((80, 24));
    let terminal = Arc::new(TerminalShared::new(cols, rows, config.ring_size));
    let (detect_tx, detect_rx) = mpsc::channel(256);
    let (permission_tx, permission_rx) = mpsc::channel(16);

    let store = Arc::new(Store::new(StoreConfig {
        terminal: Arc::clone(&terminal),
        local_task_id: task_id.clone(),
        detect_tx: detect_tx.clone(),
        permission_tx: has_launcher.then_some(permission_tx),
        auth_token: token.clone(),
        shutdown: shutdown.clone(),
        settings_path: default_settings_path(),
    }));

    store
        .upsert_task(TaskUpsert {
            id: task_id.clone(),
            agent,
            repo_path: config.repo_path(),
            title: config.task_title(),
            preferred_ide: config.ide.clone(),
            has_launcher,
        })
        .await;

    // 4. State tracker: the only writer of the local task's state.
    let tracker = StateTracker::new(
        task_id.clone(),
        Arc::clone(&store),
        detect_rx,
        config.quiet_window(),
        shutdown.clone(),
    );
    let tracker_handle = tokio::spawn(tracker.run());

    // 5. HTTP server with graceful shutdown.
    let router = build_router(Arc::clone(&store));
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            error!("control plane error: {e}");
        }
    });

    // 6. Mirror updates to an external gateway when one is configured.
    gateway::spawn_if_configured(
        config.gateway.as_deref(),
        &token,
        Arc::clone(&store),
        shutdown.clone(),
    );

    // 7. Pattern rules: built-in table, optionally replaced and
    //    hot-reloaded from an external file.
    let table = match config.patterns {
        Some(ref path) => match rules::load_file(path) {
            Ok(table) => table,
            Err(e) => {
                warn!("pattern file {} unusable, using built-ins: {e}", path.display());
                rules::builtin(agent)
            }
        },
        None => rules::builtin(agent),
    };
    let shared_rules = rules::SharedRules::new(table);
    let _rules_watcher = config
        .patterns
        .clone()
        .and_then(|path| rules::spawn_reload(shared_rules.clone(), path, shutdown.clone()));

    // 8. Raw mode for the user's TTY (skipped when stdin is not a TTY).
    let raw_guard = stdio::RawModeGuard::enter()?;

    // 9. Spawn the child. Failure here is fatal: record ERROR and exit 1.
    let spawn_opts = SpawnOptions {
        env: setup.as_ref().map(|s| s.env_vars.clone()).unwrap_or_default(),
        cwd: None,
        cols,
        rows,
        shim_channel: has_launcher,
    };
    let mut pty = match PtyHost::spawn(&config.command, spawn_opts) {
        Ok(pty) => pty,
        Err(e) => {
            report_spawn_failure(&store, &task_id, &e).await;
            drop(raw_guard);
            shutdown.cancel();
            let _ = tokio::time::timeout(config.drain_timeout(), server_handle).await;
            return Err(e.context(format!("failed to spawn {:?}", config.command)));
        }
    };

    // 10. Detectors: network (claude shim) + pattern classifier.
    let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
    if let Some(shim) = pty.take_shim() {
        let feed = ShimFeed::new(shim.events)?;
        let control = ControlWriter::new(shim.control)?;
        detectors.push(Box::new(NetworkDetector::new(feed, control, permission_rx)));
    }
    detectors.push(Box::new(
        PatternDetector::new(shared_rules.clone(), terminal.window_fn())
            .with_interval(config.classify_interval()),
    ));

    // 11. Forward job-control signals to the child's process group.
    spawn_signal_forwarder(pty.child_pid(), shutdown.clone());

    // 12. Health pings: refresh the task every interval so the UI can reap
    //     a crashed supervisor after two misses.
    {
        let store = Arc::clone(&store);
        let id = task_id.clone();
        let interval = config.ping_interval();
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = sd.cancelled() => break,
                    _ = ticker.tick() => store.touch_ping(&id).await,
                }
            }
        });
    }

    // 13. Session loop until the child exits.
    let session = Session::new(SessionConfig {
        store: Arc::clone(&store),
        pty,
        detectors,
        events_tx: detect_tx,
        stdin_rx: stdio::spawn_stdin_reader(),
        shutdown: shutdown.clone(),
        drain_timeout: config.drain_timeout(),
    });
    let status = session.run().await?;

    // 14. Let the tracker absorb the terminal event, then drain the
    //     control plane within the grace window.
    let _ = tokio::time::timeout(config.drain_timeout(), tracker_handle).await;
    shutdown.cancel();
    let _ = tokio::time::timeout(config.drain_timeout(), server_handle).await;

    drop(raw_guard);
    debug!("supervisor exiting with {:?}", status);
    Ok(RunResult { status, store })
}

/// Record a spawn failure as a terminal ERROR on the task.
async fn report_spawn_failure(store: &Store, task_id: &str, error: &anyhow::Error) {
    let detail = format!("spawn failed: {error:#}");
    error!("{detail}");
    store
        .apply_transition(task_id, TaskState::Error, |from| StateTransition {
            from,
            to: TaskState::Error,
            timestamp: now_ms(),
            detection_method: Source::Exit,
            confidence: Confidence::High,
            details: TransitionDetails {
                cause: detail.clone(),
                ..Default::default()
            },
        })
        .await;
}

/// Forward INT, QUIT, TSTP, CONT, TERM, and HUP to the child's process
/// group instead of consuming them. Interactive signals are forwarded and
/// nothing more; only TERM and HUP additionally begin control-plane
/// teardown.
fn spawn_signal_forwarder(child_pid: u32, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let specs = [
        (SignalKind::interrupt(), crate::event::ForwardSignal::Int),
        (SignalKind::quit(), crate::event::ForwardSignal::Quit),
        (SignalKind::from_raw(nix::libc::SIGTSTP), crate::event::ForwardSignal::Tstp),
        (SignalKind::from_raw(nix::libc::SIGCONT), crate::event::ForwardSignal::Cont),
        (SignalKind::terminate(), crate::event::ForwardSignal::Term),
        (SignalKind::hangup(), crate::event::ForwardSignal::Hup),
    ];

    for (kind, fwd) in specs {
        let Ok(mut stream) = signal(kind) else {
            warn!("cannot install handler for {fwd:?}");
            continue;
        };
        let sd = shutdown.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                debug!("forwarding {fwd:?} to child group");
                crate::pty::spawn::signal_group(child_pid, fwd.to_nix());
                if fwd.is_shutdown() {
                    sd.cancel();
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
