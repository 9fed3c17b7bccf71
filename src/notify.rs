//! Outbound notices and the notifier seam.
//!
//! The engine and the report scheduler produce [`Notice`] values; a
//! [`Notifier`] delivers them. Delivery is best-effort and never blocks the
//! engine's lock, but a notifier only reports success once the notice has
//! actually left the process.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::engine::state::Latch;

/// Summary of the last 24 hours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    /// Local date the report is issued on.
    pub date: NaiveDate,
    /// Run-time over the last 24 hours.
    pub runtime_seconds: i64,
    /// Fuel burned over the last 24 hours.
    pub fuel_used: f64,
    /// Current fuel estimate.
    pub fuel_left: f64,
    /// Hours of run-time left on the current estimate.
    pub remaining_hours: f64,
}

impl DailyReport {
    /// Whether the generator ran at all in the window.
    pub fn was_running(&self) -> bool {
        self.runtime_seconds > 0
    }
}

/// Summary of one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
    /// Month label, `YYYY-MM`.
    pub month: String,
    /// Run-time of episodes started in the month.
    pub runtime_seconds: i64,
    /// Fuel burned by those episodes.
    pub fuel_used: f64,
    /// Litres added by refuels (resets excluded).
    pub refuel_added: f64,
}

/// Something worth telling the channel about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Generator came up.
    Started {
        /// Fuel estimate at start.
        fuel_left: f64,
        /// Hours of run-time left.
        remaining_hours: f64,
    },
    /// Generator went down.
    Stopped {
        /// Length of the finished episode.
        runtime_seconds: i64,
        /// Fuel burned by the episode.
        fuel_used: f64,
        /// Fuel left after the episode.
        fuel_left: f64,
        /// Hours of run-time left.
        remaining_hours: f64,
    },
    /// Remaining run-time dropped below the threshold.
    LowFuel {
        /// Current fuel estimate.
        fuel_left: f64,
        /// Hours of run-time left.
        remaining_hours: f64,
        /// Configured threshold in hours.
        threshold_hours: f64,
    },
    /// Cumulative run-time reached the service mark.
    ServiceDue {
        /// Cumulative run-time in seconds.
        total_runtime_seconds: i64,
    },
    /// Scheduled daily summary.
    Daily(DailyReport),
    /// Scheduled monthly summary.
    Monthly(MonthlyReport),
    /// The monitor process (re)started.
    Restarted {
        /// When the monitor came up.
        at: DateTime<Utc>,
    },
}

impl Notice {
    /// The latch this notice set, for alerts that must be retried on failure.
    pub fn latch(&self) -> Option<Latch> {
        match self {
            Self::LowFuel { .. } => Some(Latch::LowFuel),
            Self::ServiceDue { .. } => Some(Latch::ServiceDue),
            _ => None,
        }
    }
}

/// Delivers notices somewhere humans will see them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notice.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice could not be handed off.
    async fn notify(&self, notice: &Notice) -> anyhow::Result<()>;
}

/// A notice queued for the outbound sender, with the channel its delivery
/// result goes back on.
#[derive(Debug)]
pub struct OutboundNotice {
    /// What to send.
    pub notice: Notice,
    reply: oneshot::Sender<anyhow::Result<()>>,
}

impl OutboundNotice {
    /// Report how delivery went. The waiting notifier may have gone away.
    pub fn complete(self, result: anyhow::Result<()>) {
        let _ = self.reply.send(result);
    }
}

/// Forwards notices to the Telegram outbound task and waits for the send.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<OutboundNotice>,
}

impl ChannelNotifier {
    /// Wrap the sending half of the outbound queue.
    pub fn new(tx: mpsc::Sender<OutboundNotice>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        let (reply, delivered) = oneshot::channel();
        self.tx
            .send(OutboundNotice {
                notice: notice.clone(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("outbound notice queue closed"))?;
        delivered
            .await
            .map_err(|_| anyhow::anyhow!("outbound sender dropped the notice"))?
    }
}

/// Writes notices to the log; used when Telegram is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        let payload = serde_json::to_string(notice)?;
        info!(notice = %payload, "notice");
        Ok(())
    }
}
