//! Serve mode: JSON placement requests on stdin, decisions on stdout.
//!
//! Each input line is one command:
//!
//! ```text
//! {"type":"place","id":"vm-1","demand":{"cpu":4,"memory_mb":2048},"constraints":[{"kind":"datastore","id":"ds-1"}]}
//! {"type":"snapshot","snapshot":{"host_id":"host-a","raw_cpu":8,...}}
//! ```
//!
//! Commands run concurrently; replies are written as they complete, one
//! JSON object per line, and carry the request id. The configuration file
//! is re-read on SIGHUP and its overcommit settings pushed to the tree.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use canopy_core::{AgentConfig, Inventory, OvercommitSettings};
use canopy_placement::{Constraint, PlacementRequest, ResourceDemand, ResourceSnapshot};
use canopy_scheduler::{InventoryListener, PlacementDecision, SchedulerTree, follow_overcommit};

/// One line of input.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Command {
    Place {
        id: String,
        demand: ResourceDemand,
        #[serde(default)]
        constraints: Vec<Constraint>,
        timeout_ms: Option<u64>,
    },
    Snapshot {
        snapshot: ResourceSnapshot,
    },
}

/// One line of output.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    Decision {
        id: String,
        decision: PlacementDecision,
    },
    SnapshotAccepted {
        host_id: String,
    },
    Error {
        message: String,
    },
}

/// Logs host inventory changes reported by the tree's host agents.
pub struct LogRegistrant;

impl InventoryListener for LogRegistrant {
    fn inventory_changed(
        &self,
        host_id: &str,
        datastores: &BTreeSet<String>,
        networks: &BTreeSet<String>,
    ) {
        info!(host = host_id, ?datastores, ?networks, "host inventory registered");
    }
}

/// Serve until stdin closes or Ctrl-C.
pub async fn run(
    config_path: Option<PathBuf>,
    config: AgentConfig,
    inventory: Inventory,
) -> anyhow::Result<()> {
    info!("canopy daemon starting in serve mode");

    let listeners: Vec<Arc<dyn InventoryListener>> = vec![Arc::new(LogRegistrant)];
    let tree = Arc::new(SchedulerTree::from_inventory(&inventory, &config, listeners)?);

    // ── Configuration feed ─────────────────────────────────────

    let (settings_tx, settings_rx) = watch::channel(config.overcommit());
    let feed_handle = tokio::spawn(follow_overcommit(tree.policy().clone(), settings_rx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reload_handle = tokio::spawn(reload_on_hangup(config_path, settings_tx, shutdown_rx));

    // ── Request loop ───────────────────────────────────────────

    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    let served = serve_lines(
        tree,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        ctrl_c,
    )
    .await;

    // ── Shutdown ───────────────────────────────────────────────

    let _ = shutdown_tx.send(true);
    reload_handle.await??;
    let _ = feed_handle.await;

    let summary = served?;
    info!(handled = summary.handled, "canopy daemon stopped");
    Ok(())
}

/// Counters from one run of the request loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ServeSummary {
    /// Commands accepted for handling.
    handled: usize,
    /// Most handlers outstanding at once.
    peak_in_flight: usize,
}

/// Read commands from `input` until it ends, fails, or `shutdown` fires.
///
/// Handlers run concurrently and are reaped as they finish. On exit the
/// outstanding handlers are drained, every reply is flushed to `output`,
/// and the tree's host agents are closed.
async fn serve_lines<R, W>(
    tree: Arc<SchedulerTree>,
    input: R,
    mut output: W,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<ServeSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, mut reply_rx) = mpsc::channel::<Reply>(256);
    let writer_handle = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            let mut line = serde_json::to_vec(&reply)?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut lines = input.lines();
    let mut handlers = JoinSet::new();
    let mut summary = ServeSummary::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "request handler did not complete");
                }
            }
            _ = &mut shutdown => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let tree = tree.clone();
                    let reply_tx = reply_tx.clone();
                    handlers.spawn(async move {
                        let reply = handle_line(&tree, &line).await;
                        if reply_tx.send(reply).await.is_err() {
                            warn!("reply writer is gone");
                        }
                    });
                    summary.handled += 1;
                    summary.peak_in_flight = summary.peak_in_flight.max(handlers.len());
                }
                Ok(None) => {
                    info!("input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "unreadable input, stopping");
                    let _ = reply_tx
                        .send(Reply::Error {
                            message: format!("unreadable input: {e}"),
                        })
                        .await;
                    break;
                }
            },
        }
    }

    // ── Drain ──────────────────────────────────────────────────

    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "request handler did not complete");
        }
    }
    drop(reply_tx);
    writer_handle.await??;
    tree.close();

    debug!(
        handled = summary.handled,
        peak_in_flight = summary.peak_in_flight,
        "request loop finished"
    );
    Ok(summary)
}

/// Parse and execute one input line.
async fn handle_line(tree: &SchedulerTree, line: &str) -> Reply {
    let command = match serde_json::from_str::<Command>(line) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "malformed command");
            return Reply::Error {
                message: format!("malformed command: {e}"),
            };
        }
    };

    match command {
        Command::Place {
            id,
            demand,
            constraints,
            timeout_ms,
        } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| tree.default_timeout());
            let mut request = PlacementRequest::new(id.clone(), demand, timeout);
            request.constraints = constraints;

            let decision = tree.place(request).await;
            Reply::Decision { id, decision }
        }
        Command::Snapshot { snapshot } => {
            let host_id = snapshot.host_id.clone();
            match tree.update_snapshot(snapshot) {
                Ok(()) => {
                    debug!(host = %host_id, "snapshot accepted");
                    Reply::SnapshotAccepted { host_id }
                }
                Err(e) => {
                    warn!(host = %host_id, error = %e, "snapshot rejected");
                    Reply::Error {
                        message: e.to_string(),
                    }
                }
            }
        }
    }
}

/// Re-read the configuration on SIGHUP and publish its overcommit settings.
///
/// Holds the settings sender until shutdown, which closes the feed.
#[cfg(unix)]
async fn reload_on_hangup(
    config_path: Option<PathBuf>,
    settings: watch::Sender<OvercommitSettings>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = hangup.recv() => {
                let Some(path) = config_path.as_deref() else {
                    info!("SIGHUP received without a configuration file, nothing to reload");
                    continue;
                };
                match AgentConfig::from_file(path) {
                    Ok(config) => {
                        info!(path = ?path, "configuration reloaded");
                        settings.send_replace(config.overcommit());
                    }
                    Err(e) => {
                        warn!(path = ?path, error = %e, "configuration reload failed, keeping current settings");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _config_path: Option<PathBuf>,
    _settings: watch::Sender<OvercommitSettings>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let _ = shutdown.changed().await;
    Ok(())
}
