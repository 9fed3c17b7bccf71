//! Low-fuel and service-due latches.
//!
//! Evaluated once per tick on the post-transition state. Each latch fires its
//! alert on the rising edge only and is cleared by the conditions documented
//! on [`evaluate`].

use chrono::{DateTime, Utc};

use super::state::RuntimeState;
use crate::fuel::FuelModel;
use crate::notify::Notice;

/// Update the latches in `state` and return the alerts that fire now.
///
/// - Low fuel is only considered while running. Below the threshold an
///   unlatched state fires and latches; at or above the threshold the latch
///   clears.
/// - Service due fires once when the cumulative run-time reaches the
///   configured mark. Only a new service setting clears it.
pub fn evaluate(
    state: &mut RuntimeState,
    fuel: &FuelModel,
    threshold_hours: f64,
    cumulative_seconds: i64,
    now: DateTime<Utc>,
) -> Vec<Notice> {
    let mut notices = Vec::new();

    if state.is_running() {
        let fuel_now = fuel.effective_fuel(state, now);
        let remaining = fuel.remaining_hours(fuel_now);
        if remaining < threshold_hours {
            if !state.low_fuel_alerted {
                state.low_fuel_alerted = true;
                notices.push(Notice::LowFuel {
                    fuel_left: fuel_now,
                    remaining_hours: remaining,
                    threshold_hours,
                });
            }
        } else {
            state.low_fuel_alerted = false;
        }
    }

    if let Some(due) = state.service_due_seconds {
        #[allow(clippy::cast_precision_loss)]
        let total = cumulative_seconds as f64;
        if total >= due && !state.service_alerted {
            state.service_alerted = true;
            notices.push(Notice::ServiceDue {
                total_runtime_seconds: cumulative_seconds,
            });
        }
    }

    notices
}
