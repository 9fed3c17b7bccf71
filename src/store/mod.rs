//! Durable state backed by SQLite.
//!
//! Holds the runtime key/value state, the append-only run-episode and refuel
//! logs, and the access whitelist. The schema migration is applied inline via
//! `include_str!` on every open; all statements are idempotent.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use tracing::warn;

use crate::timefmt::{format_timestamp, parse_timestamp};

/// Errors raised by the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The directory holding the database could not be created.
    #[error("failed to create state directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// One completed RUNNING → STOPPED interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEpisode {
    /// When the generator was first seen alive.
    pub start_time: DateTime<Utc>,
    /// When the generator was first seen dead.
    pub stop_time: DateTime<Utc>,
    /// Whole seconds between start and stop.
    pub runtime_seconds: i64,
    /// Litres burned over the episode.
    pub fuel_used: f64,
}

/// Whether a refuel event added fuel or overwrote the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefuelKind {
    /// Fuel was poured into the tank.
    Add,
    /// The estimate was reset to a measured value.
    Reset,
}

/// One manual fuel adjustment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefuelEvent {
    /// When the adjustment was applied.
    pub timestamp: DateTime<Utc>,
    /// Litres added; `0` marks a reset.
    pub amount: f64,
    /// Effective fuel before the adjustment.
    pub fuel_before: f64,
    /// Effective fuel after the adjustment.
    pub fuel_after: f64,
    /// Telegram user who issued the command, if any.
    pub user_id: Option<i64>,
    /// Telegram username of the issuer, if known.
    pub username: Option<String>,
}

impl RefuelEvent {
    /// Classify the event by its amount.
    pub fn kind(&self) -> RefuelKind {
        if self.amount > 0.0 {
            RefuelKind::Add
        } else {
            RefuelKind::Reset
        }
    }
}

/// A log row written together with a state change.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// A finished run episode.
    Episode(RunEpisode),
    /// A refuel or reset.
    Refuel(RefuelEvent),
}

/// Runtime and fuel totals over a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RuntimeStats {
    /// Sum of episode run-time in seconds.
    pub runtime_seconds: i64,
    /// Sum of fuel burned in litres.
    pub fuel_used: f64,
}

/// A user allowed to issue fuel commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhitelistEntry {
    /// Telegram user id.
    pub user_id: i64,
    /// Username at the time the user was added.
    pub username: Option<String>,
    /// When the user was added.
    pub added_at: Option<DateTime<Utc>>,
}

type EpisodeRow = (Option<String>, Option<String>, Option<i64>, Option<f64>);
type RefuelRow = (
    Option<String>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<i64>,
    Option<String>,
);

/// The generator monitor's SQLite state database.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database
    /// cannot be opened, or the migration fails.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool (e.g. in-memory for tests) and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(include_str!("../../migrations/001_schema.sql"))
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    // -- key/value state --

    /// Read one state key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT value FROM state WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(value,)| value))
    }

    /// Write one state key.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        upsert_key(&self.pool, key, value).await
    }

    /// Read every state key at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn load_state(&self) -> Result<HashMap<String, String>, StoreError> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as("SELECT key, value FROM state")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    /// Write a set of state keys plus an optional log row in one transaction.
    ///
    /// Either everything is committed or nothing is.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement or the commit fails.
    pub async fn persist(
        &self,
        entries: &[(&str, String)],
        log: Option<&LogEntry>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            upsert_key(&mut *tx, key, value).await?;
        }
        match log {
            Some(LogEntry::Episode(episode)) => insert_episode(&mut *tx, episode).await?,
            Some(LogEntry::Refuel(event)) => insert_refuel(&mut *tx, event).await?,
            None => {}
        }
        tx.commit().await?;
        Ok(())
    }

    // -- append-only logs --

    /// Append a finished run episode.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append_episode(&self, episode: &RunEpisode) -> Result<(), StoreError> {
        insert_episode(&self.pool, episode).await
    }

    /// Append a refuel or reset event.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append_refuel_event(&self, event: &RefuelEvent) -> Result<(), StoreError> {
        insert_refuel(&self.pool, event).await
    }

    /// Sum of `runtime_seconds` over every recorded episode.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn total_runtime_seconds(&self) -> Result<i64, StoreError> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(runtime_seconds), 0) FROM generator_log")
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    /// Totals for episodes that started at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn runtime_stats_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<RuntimeStats, StoreError> {
        let (runtime_seconds, fuel_used): (i64, f64) = sqlx::query_as(
            "SELECT COALESCE(SUM(runtime_seconds), 0), COALESCE(SUM(fuel_used), 0.0)
             FROM generator_log WHERE start_time >= ?1",
        )
        .bind(format_timestamp(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(RuntimeStats {
            runtime_seconds,
            fuel_used,
        })
    }

    /// Totals for episodes that started in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn runtime_stats_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RuntimeStats, StoreError> {
        let (runtime_seconds, fuel_used): (i64, f64) = sqlx::query_as(
            "SELECT COALESCE(SUM(runtime_seconds), 0), COALESCE(SUM(fuel_used), 0.0)
             FROM generator_log WHERE start_time >= ?1 AND start_time < ?2",
        )
        .bind(format_timestamp(start))
        .bind(format_timestamp(end))
        .fetch_one(&self.pool)
        .await?;
        Ok(RuntimeStats {
            runtime_seconds,
            fuel_used,
        })
    }

    /// Litres added by refuels in `[start, end)`; resets are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn refuel_added_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let (added,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0.0) FROM refuel_log
             WHERE timestamp >= ?1 AND timestamp < ?2 AND amount > 0",
        )
        .bind(format_timestamp(start))
        .bind(format_timestamp(end))
        .fetch_one(&self.pool)
        .await?;
        Ok(added)
    }

    /// Most recent episodes that started at or after `since`, newest first.
    ///
    /// Rows with unreadable timestamps are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn episodes_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RunEpisode>, StoreError> {
        let rows: Vec<EpisodeRow> = sqlx::query_as(
            "SELECT start_time, stop_time, runtime_seconds, fuel_used FROM generator_log
             WHERE start_time >= ?1 ORDER BY start_time DESC, id DESC LIMIT ?2",
        )
        .bind(format_timestamp(since))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(episode_from_row).collect())
    }

    /// Most recent refuel events at or after `since`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn refuel_events_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RefuelEvent>, StoreError> {
        let rows: Vec<RefuelRow> = sqlx::query_as(
            "SELECT timestamp, amount, fuel_before, fuel_after, user_id, username FROM refuel_log
             WHERE timestamp >= ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(format_timestamp(since))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(refuel_from_row).collect())
    }

    // -- whitelist --

    /// Add (or refresh) a whitelisted user.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn allow_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (user_id, username, added_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET username = excluded.username",
        )
        .bind(user_id)
        .bind(username)
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a user from the whitelist. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn deny_user(&self, user_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether `user_id` is on the whitelist.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn is_user_allowed(&self, user_id: i64) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT user_id FROM users WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Every whitelisted user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn whitelist(&self) -> Result<Vec<WhitelistEntry>, StoreError> {
        let rows: Vec<(i64, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT user_id, username, added_at FROM users ORDER BY added_at, user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, username, added_at)| WhitelistEntry {
                user_id,
                username,
                added_at: added_at.as_deref().and_then(parse_timestamp),
            })
            .collect())
    }
}

async fn upsert_key<'e, E>(executor: E, key: &str, value: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_episode<'e, E>(executor: E, episode: &RunEpisode) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO generator_log (start_time, stop_time, runtime_seconds, fuel_used)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(format_timestamp(episode.start_time))
    .bind(format_timestamp(episode.stop_time))
    .bind(episode.runtime_seconds)
    .bind(episode.fuel_used)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_refuel<'e, E>(executor: E, event: &RefuelEvent) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO refuel_log (timestamp, amount, fuel_before, fuel_after, user_id, username)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(format_timestamp(event.timestamp))
    .bind(event.amount)
    .bind(event.fuel_before)
    .bind(event.fuel_after)
    .bind(event.user_id)
    .bind(event.username.as_deref())
    .execute(executor)
    .await?;
    Ok(())
}

fn episode_from_row(row: EpisodeRow) -> Option<RunEpisode> {
    let (start, stop, runtime_seconds, fuel_used) = row;
    let parsed = start
        .as_deref()
        .and_then(parse_timestamp)
        .zip(stop.as_deref().and_then(parse_timestamp));
    let Some((start_time, stop_time)) = parsed else {
        warn!(start = ?start, stop = ?stop, "skipping episode with unreadable timestamps");
        return None;
    };
    Some(RunEpisode {
        start_time,
        stop_time,
        runtime_seconds: runtime_seconds.unwrap_or(0),
        fuel_used: fuel_used.unwrap_or(0.0),
    })
}

fn refuel_from_row(row: RefuelRow) -> Option<RefuelEvent> {
    let (timestamp, amount, fuel_before, fuel_after, user_id, username) = row;
    let Some(ts) = timestamp.as_deref().and_then(parse_timestamp) else {
        warn!(timestamp = ?timestamp, "skipping refuel event with unreadable timestamp");
        return None;
    };
    Some(RefuelEvent {
        timestamp: ts,
        amount: amount.unwrap_or(0.0),
        fuel_before: fuel_before.unwrap_or(0.0),
        fuel_after: fuel_after.unwrap_or(0.0),
        user_id,
        username,
    })
}
