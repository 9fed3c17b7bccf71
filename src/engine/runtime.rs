//! Cumulative run-time: finished episodes plus the one in progress.

use chrono::{DateTime, Utc};

use super::state::RuntimeState;
use crate::timefmt::elapsed_seconds;

/// Total run-time in seconds at `now`.
///
/// `historical_seconds` is the sum over logged episodes; the in-progress
/// episode (if any) is added on top.
pub fn cumulative_runtime_seconds(
    historical_seconds: i64,
    state: &RuntimeState,
    now: DateTime<Utc>,
) -> i64 {
    let in_progress = state
        .started_at()
        .map_or(0, |started_at| elapsed_seconds(started_at, now));
    historical_seconds.saturating_add(in_progress)
}
