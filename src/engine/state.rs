//! The runtime state aggregate and its persisted key/value form.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::timefmt::{format_timestamp, parse_timestamp};

/// Persisted state keys. Names match databases written by earlier versions.
pub mod keys {
    /// `"1"` while the generator is running.
    pub const RUNNING: &str = "running";
    /// Start of the current episode.
    pub const START_TIME: &str = "start_time";
    /// Fuel snapshot, authoritative while stopped.
    pub const FUEL_LEFT: &str = "fuel_left";
    /// Fuel at the start of the current episode.
    pub const FUEL_START: &str = "fuel_start";
    /// Low-fuel alert latch.
    pub const LOW_FUEL_ALERTED: &str = "low_fuel_alerted";
    /// Service-due alert latch.
    pub const SERVICE_ALERTED: &str = "service_alerted";
    /// Cumulative run-time (seconds) at which service is due.
    pub const SERVICE_DUE_SECONDS: &str = "service_due_seconds";
}

/// Whether the generator is running, and the episode bookkeeping if so.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Last probe saw the generator dead.
    Stopped,
    /// Last probe saw the generator alive.
    Running {
        /// First alive sample of this episode.
        started_at: DateTime<Utc>,
        /// Fuel level the episode started from (rebased by refuels).
        fuel_start: f64,
    },
}

/// One of the two one-shot alert latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    /// Low-fuel alert.
    LowFuel,
    /// Service-due alert.
    ServiceDue,
}

/// The single mutable state of the monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeState {
    /// Running or stopped.
    pub phase: Phase,
    /// Last fuel snapshot; only authoritative while stopped.
    pub fuel_left: f64,
    /// Set once the low-fuel alert has fired.
    pub low_fuel_alerted: bool,
    /// Set once the service alert has fired.
    pub service_alerted: bool,
    /// Cumulative run-time threshold for the next service.
    pub service_due_seconds: Option<f64>,
}

impl RuntimeState {
    /// First-startup state: stopped with `initial_fuel` in the tank.
    pub fn initial(initial_fuel: f64) -> Self {
        Self {
            phase: Phase::Stopped,
            fuel_left: initial_fuel,
            low_fuel_alerted: false,
            service_alerted: false,
            service_due_seconds: None,
        }
    }

    /// Whether the generator is currently running.
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// Start of the current episode, if running.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            Phase::Running { started_at, .. } => Some(started_at),
            Phase::Stopped => None,
        }
    }

    /// Fuel at the start of the current episode, if running.
    pub fn fuel_start(&self) -> Option<f64> {
        match self.phase {
            Phase::Running { fuel_start, .. } => Some(fuel_start),
            Phase::Stopped => None,
        }
    }

    /// Read a latch.
    pub fn latch(&self, latch: Latch) -> bool {
        match latch {
            Latch::LowFuel => self.low_fuel_alerted,
            Latch::ServiceDue => self.service_alerted,
        }
    }

    /// Set or clear a latch.
    pub fn set_latch(&mut self, latch: Latch, value: bool) {
        match latch {
            Latch::LowFuel => self.low_fuel_alerted = value,
            Latch::ServiceDue => self.service_alerted = value,
        }
    }

    /// Flat key/value encoding, one entry per persisted key.
    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        let (running, start_time, fuel_start) = match self.phase {
            Phase::Stopped => ("0", String::new(), String::new()),
            Phase::Running {
                started_at,
                fuel_start,
            } => ("1", format_timestamp(started_at), fuel_start.to_string()),
        };
        vec![
            (keys::RUNNING, running.to_owned()),
            (keys::START_TIME, start_time),
            (keys::FUEL_LEFT, self.fuel_left.to_string()),
            (keys::FUEL_START, fuel_start),
            (keys::LOW_FUEL_ALERTED, flag(self.low_fuel_alerted)),
            (keys::SERVICE_ALERTED, flag(self.service_alerted)),
            (
                keys::SERVICE_DUE_SECONDS,
                self.service_due_seconds
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            ),
        ]
    }
}

fn flag(value: bool) -> String {
    let raw = if value { "1" } else { "0" };
    raw.to_owned()
}

fn parse_flag(raw: Option<&String>) -> bool {
    raw.map(|v| v.trim().to_ascii_lowercase())
        .is_some_and(|v| v == "1" || v == "true")
}

fn parse_number(raw: Option<&String>) -> Option<f64> {
    raw.and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// A correction applied while reconciling persisted state.
#[derive(Debug, Clone, PartialEq)]
pub enum Repair {
    /// No usable `fuel_left`; the configured initial fuel was used.
    MissingFuelLeft,
    /// `fuel_left` was outside `[0, capacity]`.
    FuelLeftClamped {
        /// Value as stored.
        from: f64,
        /// Value after clamping.
        to: f64,
    },
    /// Running without `fuel_start`; set from `fuel_left`.
    MissingFuelStart,
    /// `fuel_start` was outside `[0, capacity]`.
    FuelStartClamped {
        /// Value as stored.
        from: f64,
        /// Value after clamping.
        to: f64,
    },
    /// Running without a readable `start_time`; set to the repair instant.
    MissingStartTime,
    /// Stopped but `fuel_start` was still set; dropped.
    StaleFuelStart,
    /// `service_due_seconds` was negative; cleared.
    InvalidServiceDue,
}

/// State as read from the store, before reconciliation.
///
/// Unparseable values are already `None` here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawState {
    /// Persisted `running` flag.
    pub running: bool,
    /// Persisted episode start.
    pub start_time: Option<DateTime<Utc>>,
    /// Persisted fuel snapshot.
    pub fuel_left: Option<f64>,
    /// Persisted episode start fuel.
    pub fuel_start: Option<f64>,
    /// Persisted low-fuel latch.
    pub low_fuel_alerted: bool,
    /// Persisted service latch.
    pub service_alerted: bool,
    /// Persisted service threshold.
    pub service_due_seconds: Option<f64>,
}

/// Outcome of [`RawState::reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// The repaired state.
    pub state: RuntimeState,
    /// Every correction that was needed.
    pub repairs: Vec<Repair>,
}

impl RawState {
    /// Decode the flat key/value map loaded from the store.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self {
            running: parse_flag(map.get(keys::RUNNING)),
            start_time: map
                .get(keys::START_TIME)
                .and_then(|v| parse_timestamp(v)),
            fuel_left: parse_number(map.get(keys::FUEL_LEFT)),
            fuel_start: parse_number(map.get(keys::FUEL_START)),
            low_fuel_alerted: parse_flag(map.get(keys::LOW_FUEL_ALERTED)),
            service_alerted: parse_flag(map.get(keys::SERVICE_ALERTED)),
            service_due_seconds: parse_number(map.get(keys::SERVICE_DUE_SECONDS)),
        }
    }

    /// Turn raw persisted values into a valid [`RuntimeState`].
    ///
    /// Applying this to the encoding of its own output yields the same state
    /// and no repairs.
    pub fn reconcile(self, initial_fuel: f64, tank_capacity: f64, now: DateTime<Utc>) -> Reconciled {
        let mut repairs = Vec::new();

        let stored_fuel = self.fuel_left.unwrap_or_else(|| {
            repairs.push(Repair::MissingFuelLeft);
            initial_fuel
        });
        let capacity = tank_capacity.max(0.0);
        let fuel_left = stored_fuel.clamp(0.0, capacity);
        if fuel_left != stored_fuel {
            repairs.push(Repair::FuelLeftClamped {
                from: stored_fuel,
                to: fuel_left,
            });
        }

        let phase = if self.running {
            let started_at = self.start_time.unwrap_or_else(|| {
                repairs.push(Repair::MissingStartTime);
                now
            });
            let fuel_start = match self.fuel_start {
                Some(stored) => {
                    let clamped = stored.clamp(0.0, capacity);
                    if clamped != stored {
                        repairs.push(Repair::FuelStartClamped {
                            from: stored,
                            to: clamped,
                        });
                    }
                    clamped
                }
                None => {
                    repairs.push(Repair::MissingFuelStart);
                    fuel_left
                }
            };
            Phase::Running {
                started_at,
                fuel_start,
            }
        } else {
            if self.fuel_start.is_some() {
                repairs.push(Repair::StaleFuelStart);
            }
            Phase::Stopped
        };

        let service_due_seconds = match self.service_due_seconds {
            Some(v) if v < 0.0 => {
                repairs.push(Repair::InvalidServiceDue);
                None
            }
            other => other,
        };

        Reconciled {
            state: RuntimeState {
                phase,
                fuel_left,
                low_fuel_alerted: self.low_fuel_alerted,
                service_alerted: self.service_alerted,
                service_due_seconds,
            },
            repairs,
        }
    }
}
