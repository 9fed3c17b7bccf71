//! The periodic probe loop.
//!
//! Runs as a background Tokio task. Each tick probes the generator, feeds the
//! sample to the [`Engine`], delivers the resulting notices and refreshes
//! `status.json`. Ticks never overlap; missed ticks are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, StatusReport, TickReport};
use crate::notify::{Notice, Notifier};
use crate::probe::Prober;

/// Shared dependencies for the monitor loop.
pub struct MonitorDeps {
    /// State owner.
    pub engine: Arc<Engine>,
    /// Liveness probe.
    pub prober: Arc<dyn Prober>,
    /// Where notices go.
    pub notifier: Arc<dyn Notifier>,
    /// Generator host.
    pub host: String,
    /// Time between ticks.
    pub interval: Duration,
    /// Status snapshot path; `None` disables the file.
    pub status_path: Option<PathBuf>,
}

/// Run the monitor loop until shutdown is signalled.
///
/// The first tick runs immediately so a restart picks up a state change
/// without waiting a full interval.
pub async fn run_monitor(deps: MonitorDeps, mut shutdown_rx: watch::Receiver<bool>) {
    info!(
        interval_secs = deps.interval.as_secs(),
        host = %deps.host,
        "monitor started"
    );

    let mut interval = tokio::time::interval(deps.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_tick(&deps).await;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("monitor shutting down");
                    break;
                }
            }
        }
    }

    info!("monitor stopped");
}

/// Execute one probe → transition → alerts → delivery cycle.
///
/// Returns `None` when the engine failed to persist; the failure is logged
/// and the next tick retries from unchanged state.
pub async fn run_tick(deps: &MonitorDeps) -> Option<TickReport> {
    let alive = deps.prober.probe(&deps.host).await;
    let now = Utc::now();

    let report = match deps.engine.tick(alive, now).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, alive, "tick failed");
            return None;
        }
    };

    deliver(&deps.engine, deps.notifier.as_ref(), &report.notices).await;

    if let Some(path) = &deps.status_path {
        match deps.engine.status(now).await {
            Ok(status) => {
                if let Err(e) = write_status_file(&status, path).await {
                    warn!(error = %e, "failed to write status.json");
                }
            }
            Err(e) => warn!(error = %e, "failed to build status snapshot"),
        }
    }

    Some(report)
}

/// Hand notices to the notifier in order.
///
/// An alert that cannot be delivered has its latch released so the next
/// tick fires it again.
pub async fn deliver(engine: &Engine, notifier: &dyn Notifier, notices: &[Notice]) {
    for notice in notices {
        let Err(e) = notifier.notify(notice).await else {
            continue;
        };
        warn!(error = %e, notice = ?notice, "notice delivery failed");
        if let Some(latch) = notice.latch() {
            if let Err(e) = engine.release_latch(latch).await {
                error!(error = %e, latch = ?latch, "failed to release alert latch");
            }
        }
    }
}

/// Write `status.json` atomically (temp file + rename).
///
/// # Errors
///
/// Returns an error if serialization or any file operation fails.
pub async fn write_status_file(status: &StatusReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(status).context("failed to serialize status")?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .context("failed to write status temp file")?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .context("failed to rename status temp file")?;

    debug!("status.json updated");
    Ok(())
}
