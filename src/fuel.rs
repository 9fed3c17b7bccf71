//! Fuel estimation from run-time and a fixed consumption rate.
//!
//! Everything here is pure arithmetic. The engine decides when to call it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::state::{Phase, RuntimeState};
use crate::timefmt::elapsed_seconds;

const SECS_PER_HOUR: f64 = 3600.0;

/// Consumption model for one generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FuelModel {
    /// Litres burned per hour of run-time.
    pub consumption_rate: f64,
    /// Tank capacity in litres.
    pub tank_capacity: f64,
}

impl FuelModel {
    /// Create a model from a consumption rate (L/h) and tank capacity (L).
    pub fn new(consumption_rate: f64, tank_capacity: f64) -> Self {
        Self {
            consumption_rate,
            tank_capacity,
        }
    }

    /// Litres burned over `seconds` of run-time.
    pub fn fuel_used(&self, seconds: i64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let hours = seconds as f64 / SECS_PER_HOUR;
        hours * self.consumption_rate
    }

    /// The fuel estimate at `now`.
    ///
    /// When stopped this is the last snapshot; when running it is the level
    /// at episode start minus what has burned since, floored at zero.
    pub fn effective_fuel(&self, state: &RuntimeState, now: DateTime<Utc>) -> f64 {
        match state.phase {
            Phase::Stopped => state.fuel_left,
            Phase::Running {
                started_at,
                fuel_start,
            } => (fuel_start - self.fuel_used(elapsed_seconds(started_at, now))).max(0.0),
        }
    }

    /// Hours of run-time left on `fuel` litres; infinite without a positive rate.
    pub fn remaining_hours(&self, fuel: f64) -> f64 {
        if self.consumption_rate <= 0.0 {
            f64::INFINITY
        } else {
            (fuel / self.consumption_rate).max(0.0)
        }
    }

    /// Rebase a running episode so that `effective_fuel(state, now) == target`.
    ///
    /// `started_at` is left alone, so the episode's run-time keeps counting.
    /// Does nothing while stopped.
    pub fn apply_setpoint(&self, state: &mut RuntimeState, target: f64, now: DateTime<Utc>) {
        if let Phase::Running {
            started_at,
            fuel_start,
        } = &mut state.phase
        {
            *fuel_start = target + self.fuel_used(elapsed_seconds(*started_at, now));
        }
    }

    /// Remaining run-time for `fuel` as `"{h}h {m}m"`, or `"N/A"` when unbounded.
    pub fn format_remaining(&self, fuel: f64) -> String {
        format_hours(self.remaining_hours(fuel))
    }
}

/// Render fractional hours as `"{h}h {m}m"`, or `"N/A"` when not finite.
pub fn format_hours(hours: f64) -> String {
    if !hours.is_finite() {
        return "N/A".to_owned();
    }
    #[allow(clippy::cast_possible_truncation)]
    let total_minutes = (hours.max(0.0) * 60.0).floor() as i64;
    format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}
