//! The monitor core: runtime state machine, alerts and fuel adjustments.
//!
//! [`Engine`] owns the single [`RuntimeState`] behind a `tokio` mutex. Every
//! mutating operation holds the lock across read, evaluate and persist, and
//! replaces the in-memory state only after the store transaction commits.
//! Callers pass `now` explicitly.

pub mod alerts;
pub mod runtime;
pub mod state;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fuel::FuelModel;
use crate::notify::Notice;
use crate::store::{
    LogEntry, RefuelEvent, RunEpisode, RuntimeStats, StateStore, StoreError,
};
use crate::timefmt::elapsed_seconds;

use self::runtime::cumulative_runtime_seconds;
use self::state::{Latch, Phase, RawState, RuntimeState};

/// Maximum rows returned by history queries.
pub const HISTORY_LIMIT: u32 = 10;

/// Longest accepted history window in days.
pub const MAX_HISTORY_DAYS: i64 = 3660;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The input was rejected before any mutation.
    #[error("{0}")]
    Validation(String),

    /// Persisting the change failed; nothing was applied.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Static parameters of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Consumption model.
    pub fuel: FuelModel,
    /// Fuel assumed on first startup.
    pub initial_fuel: f64,
    /// Low-fuel alert threshold in hours of remaining run-time.
    pub low_fuel_threshold_hours: f64,
}

/// Who issued an adjustment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    /// Telegram user id, if the command came from Telegram.
    pub user_id: Option<i64>,
    /// Telegram username, if known.
    pub username: Option<String>,
}

/// The state transition a tick caused.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Same-state sample.
    None,
    /// STOPPED → RUNNING.
    Started,
    /// RUNNING → STOPPED, with the episode that was logged.
    Stopped(RunEpisode),
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// The liveness sample the tick consumed.
    pub alive: bool,
    /// What changed.
    pub transition: Transition,
    /// Notices to deliver, in order.
    pub notices: Vec<Notice>,
    /// Fuel estimate after the tick.
    pub effective_fuel: f64,
}

/// Result of a refuel or reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    /// The logged event.
    pub event: RefuelEvent,
    /// Hours of run-time left after the adjustment.
    pub remaining_hours: f64,
}

/// Result of a service setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceSetting {
    /// Service tracking switched off.
    Cleared,
    /// Service scheduled at a cumulative run-time mark.
    Scheduled {
        /// Hours of run-time until service.
        hours: f64,
        /// Cumulative run-time mark in seconds.
        due_seconds: f64,
    },
}

/// Service countdown as shown in status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceStatus {
    /// No service mark configured.
    NotSet,
    /// Seconds of run-time until service.
    Remaining {
        /// Seconds left.
        seconds: i64,
    },
    /// Seconds of run-time past the service mark.
    Overdue {
        /// Seconds over.
        seconds: i64,
    },
}

/// A consistent snapshot for `/status`, the CLI and `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// When the snapshot was taken.
    pub at: DateTime<Utc>,
    /// Whether the generator is running.
    pub running: bool,
    /// Start of the current episode.
    pub started_at: Option<DateTime<Utc>>,
    /// Current fuel estimate.
    pub effective_fuel: f64,
    /// Hours of run-time left.
    pub remaining_hours: f64,
    /// Tank capacity.
    pub tank_capacity: f64,
    /// Totals over the last 24 hours.
    pub day: RuntimeStats,
    /// Totals over the last 7 days.
    pub week: RuntimeStats,
    /// Cumulative run-time including the current episode.
    pub cumulative_runtime_seconds: i64,
    /// Service countdown.
    pub service: ServiceStatus,
    /// Low-fuel latch.
    pub low_fuel_alerted: bool,
    /// Service latch.
    pub service_alerted: bool,
}

/// Totals for an arbitrary window, used by the monthly report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodSummary {
    /// Episode totals.
    pub stats: RuntimeStats,
    /// Litres added by refuels.
    pub refuel_added: f64,
}

enum FuelTarget {
    Add(f64),
    Reset(f64),
}

/// Owner of the runtime state.
pub struct Engine {
    state: Mutex<RuntimeState>,
    store: StateStore,
    settings: EngineSettings,
}

impl Engine {
    /// Load and reconcile persisted state without writing anything back.
    ///
    /// Suitable for read-only consumers such as the CLI `status` command.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub async fn load(
        store: StateStore,
        settings: EngineSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let (engine, _) = Self::reconciled(store, settings, now).await?;
        Ok(engine)
    }

    /// Load persisted state, repair it, and persist the repaired form.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read or written.
    pub async fn open(
        store: StateStore,
        settings: EngineSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let (engine, needs_write) = Self::reconciled(store, settings, now).await?;
        if needs_write {
            let state = engine.state.lock().await;
            engine.store.persist(&state.to_entries(), None).await?;
        }
        Ok(engine)
    }

    async fn reconciled(
        store: StateStore,
        settings: EngineSettings,
        now: DateTime<Utc>,
    ) -> Result<(Self, bool), EngineError> {
        let now = now.trunc_subsecs(0);
        let map = store.load_state().await?;
        let reconciled = RawState::from_map(&map).reconcile(
            settings.initial_fuel,
            settings.fuel.tank_capacity,
            now,
        );
        for repair in &reconciled.repairs {
            warn!(repair = ?repair, "repaired persisted runtime state");
        }
        info!(
            running = reconciled.state.is_running(),
            fuel_left = reconciled.state.fuel_left,
            "runtime state loaded"
        );
        let needs_write = !reconciled.repairs.is_empty();
        let engine = Self {
            state: Mutex::new(reconciled.state),
            store,
            settings,
        };
        Ok((engine, needs_write))
    }

    /// The engine's static parameters.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The backing store, for queries that do not touch runtime state.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> RuntimeState {
        self.state.lock().await.clone()
    }

    /// Consume one liveness sample.
    ///
    /// Applies the transition, evaluates both alert latches and persists the
    /// result. The returned notices have already been committed.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails; state is then unchanged.
    pub async fn tick(&self, alive: bool, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let now = now.trunc_subsecs(0);
        let fuel = self.settings.fuel;
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let mut notices = Vec::new();

        let transition = match (next.phase, alive) {
            (Phase::Stopped, true) => {
                next.phase = Phase::Running {
                    started_at: now,
                    fuel_start: next.fuel_left,
                };
                let fuel_now = fuel.effective_fuel(&next, now);
                notices.push(Notice::Started {
                    fuel_left: fuel_now,
                    remaining_hours: fuel.remaining_hours(fuel_now),
                });
                Transition::Started
            }
            (
                Phase::Running {
                    started_at,
                    fuel_start,
                },
                false,
            ) => {
                let elapsed = elapsed_seconds(started_at, now);
                let used = fuel.fuel_used(elapsed);
                let fuel_left = (fuel_start - used).max(0.0);
                next.phase = Phase::Stopped;
                next.fuel_left = fuel_left;
                notices.push(Notice::Stopped {
                    runtime_seconds: elapsed,
                    fuel_used: used,
                    fuel_left,
                    remaining_hours: fuel.remaining_hours(fuel_left),
                });
                Transition::Stopped(RunEpisode {
                    start_time: started_at,
                    stop_time: now,
                    runtime_seconds: elapsed,
                    fuel_used: used,
                })
            }
            _ => Transition::None,
        };

        let mut historical = self.store.total_runtime_seconds().await?;
        let log = match &transition {
            Transition::Stopped(episode) => {
                historical = historical.saturating_add(episode.runtime_seconds);
                Some(LogEntry::Episode(episode.clone()))
            }
            _ => None,
        };
        let cumulative = cumulative_runtime_seconds(historical, &next, now);
        notices.extend(alerts::evaluate(
            &mut next,
            &fuel,
            self.settings.low_fuel_threshold_hours,
            cumulative,
            now,
        ));

        if next != *guard || log.is_some() {
            self.store.persist(&next.to_entries(), log.as_ref()).await?;
        }
        let effective_fuel = fuel.effective_fuel(&next, now);
        *guard = next;
        drop(guard);

        match &transition {
            Transition::Started => info!(fuel_left = effective_fuel, "generator started"),
            Transition::Stopped(episode) => info!(
                runtime_seconds = episode.runtime_seconds,
                fuel_used = episode.fuel_used,
                fuel_left = effective_fuel,
                "generator stopped"
            ),
            Transition::None => debug!(alive, fuel = effective_fuel, "tick"),
        }

        Ok(TickReport {
            alive,
            transition,
            notices,
            effective_fuel,
        })
    }

    /// Add `amount` litres, capped at the tank capacity.
    ///
    /// # Errors
    ///
    /// `Validation` for a non-finite or non-positive amount; `Store` if
    /// persisting fails.
    pub async fn refuel(
        &self,
        amount: f64,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Adjustment, EngineError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::Validation(
                "refuel amount must be a positive number of litres".to_owned(),
            ));
        }
        self.adjust(FuelTarget::Add(amount), actor, now).await
    }

    /// Overwrite the fuel estimate with a measured `value`.
    ///
    /// # Errors
    ///
    /// `Validation` unless `0 <= value <= tank_capacity`; `Store` if
    /// persisting fails.
    pub async fn reset_fuel(
        &self,
        value: f64,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Adjustment, EngineError> {
        let capacity = self.settings.fuel.tank_capacity;
        if !value.is_finite() || value < 0.0 || value > capacity {
            return Err(EngineError::Validation(format!(
                "fuel level must be between 0 and {capacity} litres"
            )));
        }
        self.adjust(FuelTarget::Reset(value), actor, now).await
    }

    async fn adjust(
        &self,
        target: FuelTarget,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Adjustment, EngineError> {
        let now = now.trunc_subsecs(0);
        let fuel = self.settings.fuel;
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();

        let before = fuel.effective_fuel(&next, now);
        let (amount, after) = match target {
            FuelTarget::Add(amount) => (amount, (before + amount).min(fuel.tank_capacity)),
            FuelTarget::Reset(value) => (0.0, value),
        };
        if next.is_running() {
            fuel.apply_setpoint(&mut next, after, now);
        } else {
            next.fuel_left = after;
        }
        next.low_fuel_alerted = false;

        let event = RefuelEvent {
            timestamp: now,
            amount,
            fuel_before: before,
            fuel_after: after,
            user_id: actor.user_id,
            username: actor.username.clone(),
        };
        self.store
            .persist(&next.to_entries(), Some(&LogEntry::Refuel(event.clone())))
            .await?;
        *guard = next;
        drop(guard);

        info!(
            amount,
            fuel_before = before,
            fuel_after = after,
            user_id = ?actor.user_id,
            "fuel adjusted"
        );
        Ok(Adjustment {
            event,
            remaining_hours: fuel.remaining_hours(after),
        })
    }

    /// Schedule service `hours` of run-time from now; `0` switches it off.
    ///
    /// Either way the service latch is cleared.
    ///
    /// # Errors
    ///
    /// `Validation` for negative or non-finite hours; `Store` if persisting
    /// fails.
    pub async fn set_service(
        &self,
        hours: f64,
        now: DateTime<Utc>,
    ) -> Result<ServiceSetting, EngineError> {
        if !hours.is_finite() || hours < 0.0 {
            return Err(EngineError::Validation(
                "service interval must be zero or a positive number of hours".to_owned(),
            ));
        }
        let now = now.trunc_subsecs(0);
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();

        let setting = if hours == 0.0 {
            next.service_due_seconds = None;
            ServiceSetting::Cleared
        } else {
            let historical = self.store.total_runtime_seconds().await?;
            #[allow(clippy::cast_precision_loss)]
            let total = cumulative_runtime_seconds(historical, &next, now) as f64;
            let due_seconds = total + hours * 3600.0;
            next.service_due_seconds = Some(due_seconds);
            ServiceSetting::Scheduled { hours, due_seconds }
        };
        next.service_alerted = false;

        self.store.persist(&next.to_entries(), None).await?;
        *guard = next;
        drop(guard);

        info!(setting = ?setting, "service interval updated");
        Ok(setting)
    }

    /// Clear a latch so the next tick can fire its alert again.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub async fn release_latch(&self, latch: Latch) -> Result<(), EngineError> {
        let mut guard = self.state.lock().await;
        if !guard.latch(latch) {
            return Ok(());
        }
        let mut next = guard.clone();
        next.set_latch(latch, false);
        self.store.persist(&next.to_entries(), None).await?;
        *guard = next;
        Ok(())
    }

    /// Cumulative run-time at `now`, including the running episode.
    ///
    /// # Errors
    ///
    /// Returns an error if the episode total cannot be read.
    pub async fn cumulative_runtime_seconds(&self, now: DateTime<Utc>) -> Result<i64, EngineError> {
        let guard = self.state.lock().await;
        let historical = self.store.total_runtime_seconds().await?;
        Ok(cumulative_runtime_seconds(historical, &guard, now))
    }

    /// Fuel estimate at `now`.
    pub async fn effective_fuel(&self, now: DateTime<Utc>) -> f64 {
        let guard = self.state.lock().await;
        self.settings.fuel.effective_fuel(&guard, now)
    }

    /// Build a status snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics queries fail.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<StatusReport, EngineError> {
        let fuel = self.settings.fuel;
        let guard = self.state.lock().await;
        let day = self
            .store
            .runtime_stats_since(look_back(now, Duration::hours(24)))
            .await?;
        let week = self
            .store
            .runtime_stats_since(look_back(now, Duration::days(7)))
            .await?;
        let historical = self.store.total_runtime_seconds().await?;
        let cumulative = cumulative_runtime_seconds(historical, &guard, now);
        let effective_fuel = fuel.effective_fuel(&guard, now);

        let service = match guard.service_due_seconds {
            None => ServiceStatus::NotSet,
            Some(due) => {
                #[allow(clippy::cast_precision_loss)]
                let left = due - cumulative as f64;
                #[allow(clippy::cast_possible_truncation)]
                let seconds = left.trunc() as i64;
                if seconds > 0 {
                    ServiceStatus::Remaining { seconds }
                } else {
                    ServiceStatus::Overdue {
                        seconds: seconds.saturating_neg(),
                    }
                }
            }
        };

        Ok(StatusReport {
            at: now,
            running: guard.is_running(),
            started_at: guard.started_at(),
            effective_fuel,
            remaining_hours: fuel.remaining_hours(effective_fuel),
            tank_capacity: fuel.tank_capacity,
            day,
            week,
            cumulative_runtime_seconds: cumulative,
            service,
            low_fuel_alerted: guard.low_fuel_alerted,
            service_alerted: guard.service_alerted,
        })
    }

    /// Episodes started within the last `days`, newest first, at most
    /// [`HISTORY_LIMIT`].
    ///
    /// # Errors
    ///
    /// `Validation` for a window outside `1..=MAX_HISTORY_DAYS`; `Store` if
    /// the query fails.
    pub async fn history(&self, days: i64, now: DateTime<Utc>) -> Result<Vec<RunEpisode>, EngineError> {
        let since = window_start(days, now)?;
        Ok(self.store.episodes_since(since, HISTORY_LIMIT).await?)
    }

    /// Refuel events within the last `days`, newest first, at most
    /// [`HISTORY_LIMIT`].
    ///
    /// # Errors
    ///
    /// `Validation` for a window outside `1..=MAX_HISTORY_DAYS`; `Store` if
    /// the query fails.
    pub async fn refuel_history(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefuelEvent>, EngineError> {
        let since = window_start(days, now)?;
        Ok(self.store.refuel_events_since(since, HISTORY_LIMIT).await?)
    }

    /// Episode and refuel totals for `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the queries fail.
    pub async fn period_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodSummary, EngineError> {
        let stats = self.store.runtime_stats_between(start, end).await?;
        let refuel_added = self.store.refuel_added_between(start, end).await?;
        Ok(PeriodSummary {
            stats,
            refuel_added,
        })
    }
}

fn look_back(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn window_start(days: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
    if !(1..=MAX_HISTORY_DAYS).contains(&days) {
        return Err(EngineError::Validation(format!(
            "days must be between 1 and {MAX_HISTORY_DAYS}"
        )));
    }
    now.checked_sub_signed(Duration::days(days))
        .ok_or_else(|| EngineError::Validation("history window out of range".to_owned()))
}
