//! Scheduled daily and monthly summaries.
//!
//! Schedules are cron expressions evaluated in local time. A schedule is due
//! when it has a trigger between its last run (or scheduler start) and now,
//! so a report missed while the process was down is not replayed on start.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ReportsConfig;
use crate::engine::{Engine, EngineError};
use crate::notify::{DailyReport, MonthlyReport, Notice, Notifier};

/// Which summary a schedule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// Last 24 hours.
    Daily,
    /// Previous calendar month.
    Monthly,
}

/// A report bound to its cron schedule.
#[derive(Debug, Clone)]
pub struct ReportSchedule {
    /// What to produce.
    pub kind: ReportKind,
    schedule: cron::Schedule,
}

impl ReportSchedule {
    /// Build a schedule from a cron expression (seconds field first).
    ///
    /// # Errors
    ///
    /// Returns an error if the expression does not parse.
    pub fn new(kind: ReportKind, expression: &str) -> anyhow::Result<Self> {
        let schedule = cron::Schedule::from_str(expression)
            .with_context(|| format!("invalid cron expression: {expression}"))?;
        Ok(Self { kind, schedule })
    }

    /// Every day at `hour:minute`.
    ///
    /// # Errors
    ///
    /// Returns an error if the time is out of range.
    pub fn daily(hour: u32, minute: u32) -> anyhow::Result<Self> {
        Self::new(ReportKind::Daily, &format!("0 {minute} {hour} * * *"))
    }

    /// The 1st of every month at `hour:minute`.
    ///
    /// # Errors
    ///
    /// Returns an error if the time is out of range.
    pub fn monthly(hour: u32, minute: u32) -> anyhow::Result<Self> {
        Self::new(ReportKind::Monthly, &format!("0 {minute} {hour} 1 * *"))
    }
}

/// Build the enabled schedules from configuration.
///
/// # Errors
///
/// Returns an error if the configured time is out of range.
pub fn schedules_from_config(config: &ReportsConfig) -> anyhow::Result<Vec<ReportSchedule>> {
    let mut schedules = Vec::new();
    if config.daily {
        schedules.push(ReportSchedule::daily(config.hour, config.minute)?);
    }
    if config.monthly {
        schedules.push(ReportSchedule::monthly(config.hour, config.minute)?);
    }
    Ok(schedules)
}

/// Last-run bookkeeping for report schedules.
#[derive(Debug)]
pub struct SchedulerState {
    started: DateTime<Local>,
    last_run: HashMap<ReportKind, DateTime<Local>>,
}

impl SchedulerState {
    /// State for a scheduler that came up at `started`.
    pub fn new(started: DateTime<Local>) -> Self {
        Self {
            started,
            last_run: HashMap::new(),
        }
    }

    /// Record that `kind` ran at `at`.
    pub fn record_run(&mut self, kind: ReportKind, at: DateTime<Local>) {
        self.last_run.insert(kind, at);
    }

    fn since(&self, kind: ReportKind) -> DateTime<Local> {
        self.last_run.get(&kind).copied().unwrap_or(self.started)
    }
}

/// Reports with a trigger in `(last run, now]`.
pub fn due_reports(
    schedules: &[ReportSchedule],
    state: &SchedulerState,
    now: DateTime<Local>,
) -> Vec<ReportKind> {
    schedules
        .iter()
        .filter(|s| {
            s.schedule
                .after(&state.since(s.kind))
                .take(1)
                .any(|next| next <= now)
        })
        .map(|s| s.kind)
        .collect()
}

/// `[start, end)` of the calendar month before the one containing `now`, in
/// UTC, plus its `YYYY-MM` label.
pub fn previous_month_range(now: DateTime<Local>) -> Option<(DateTime<Utc>, DateTime<Utc>, String)> {
    let (year, month) = if now.month() == 1 {
        (now.year().checked_sub(1)?, 12)
    } else {
        (now.year(), now.month().saturating_sub(1))
    };
    let start_date = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end_date = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?;
    let start = local_midnight(start_date)?;
    let end = local_midnight(end_date)?;
    Some((start, end, format!("{year:04}-{month:02}")))
}

fn local_midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Summary of the last 24 hours.
///
/// # Errors
///
/// Returns an error if the statistics queries fail.
pub async fn daily_report(engine: &Engine, now: DateTime<Utc>) -> Result<DailyReport, EngineError> {
    let status = engine.status(now).await?;
    Ok(DailyReport {
        date: now.with_timezone(&Local).date_naive(),
        runtime_seconds: status.day.runtime_seconds,
        fuel_used: status.day.fuel_used,
        fuel_left: status.effective_fuel,
        remaining_hours: status.remaining_hours,
    })
}

/// Summary of the previous calendar month.
///
/// # Errors
///
/// Returns an error if the month cannot be computed or the queries fail.
pub async fn monthly_report(
    engine: &Engine,
    now: DateTime<Utc>,
) -> Result<MonthlyReport, EngineError> {
    let (start, end, month) = previous_month_range(now.with_timezone(&Local))
        .ok_or_else(|| EngineError::Validation("cannot compute previous month".to_owned()))?;
    let summary = engine.period_summary(start, end).await?;
    Ok(MonthlyReport {
        month,
        runtime_seconds: summary.stats.runtime_seconds,
        fuel_used: summary.stats.fuel_used,
        refuel_added: summary.refuel_added,
    })
}

/// Build the notice for one report kind.
///
/// # Errors
///
/// Returns an error if the underlying queries fail.
pub async fn build_report(
    kind: ReportKind,
    engine: &Engine,
    now: DateTime<Utc>,
) -> Result<Notice, EngineError> {
    Ok(match kind {
        ReportKind::Daily => Notice::Daily(daily_report(engine, now).await?),
        ReportKind::Monthly => Notice::Monthly(monthly_report(engine, now).await?),
    })
}

/// Shared dependencies for the report scheduler.
pub struct ReportDeps {
    /// State owner.
    pub engine: Arc<Engine>,
    /// Where reports go.
    pub notifier: Arc<dyn Notifier>,
    /// Enabled schedules.
    pub schedules: Vec<ReportSchedule>,
}

/// Check schedules every 30 seconds until shutdown.
pub async fn run_reports(deps: ReportDeps, mut shutdown_rx: watch::Receiver<bool>) {
    if deps.schedules.is_empty() {
        info!("no reports enabled");
        return;
    }
    info!(count = deps.schedules.len(), "report scheduler started");

    let mut state = SchedulerState::new(Local::now());
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Local::now();
                for kind in due_reports(&deps.schedules, &state, now) {
                    state.record_run(kind, now);
                    match build_report(kind, &deps.engine, now.with_timezone(&Utc)).await {
                        Ok(notice) => {
                            if let Err(e) = deps.notifier.notify(&notice).await {
                                warn!(error = %e, report = ?kind, "report delivery failed");
                            } else {
                                info!(report = ?kind, "report sent");
                            }
                        }
                        Err(e) => error!(error = %e, report = ?kind, "failed to build report"),
                    }
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("report scheduler shutting down");
                    break;
                }
            }
        }
    }
}
