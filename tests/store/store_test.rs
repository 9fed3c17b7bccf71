//! Tests for the SQLite state store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use genwatch::store::{LogEntry, RefuelEvent, RunEpisode, StateStore};

async fn setup() -> (SqlitePool, StateStore) {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");
    let store = StateStore::from_pool(pool.clone())
        .await
        .expect("schema should apply");
    (pool, store)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
        .single()
        .expect("valid time")
}

fn episode(start_offset_mins: i64, runtime_seconds: i64, fuel_used: f64) -> RunEpisode {
    let start_time = t0() + Duration::minutes(start_offset_mins);
    RunEpisode {
        start_time,
        stop_time: start_time + Duration::seconds(runtime_seconds),
        runtime_seconds,
        fuel_used,
    }
}

fn refuel(offset_mins: i64, amount: f64, before: f64, after: f64) -> RefuelEvent {
    RefuelEvent {
        timestamp: t0() + Duration::minutes(offset_mins),
        amount,
        fuel_before: before,
        fuel_after: after,
        user_id: Some(7),
        username: Some("ops".to_owned()),
    }
}

#[tokio::test]
async fn get_and_set_round_trip_and_missing_key_is_none() {
    let (_, store) = setup().await;

    assert_eq!(store.get("fuel_left").await.expect("get"), None);
    store.set("fuel_left", "12.5").await.expect("set");
    store.set("fuel_left", "13").await.expect("overwrite");

    assert_eq!(store.get("fuel_left").await.expect("get").as_deref(), Some("13"));
    let map = store.load_state().await.expect("load");
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("fuel_left").map(String::as_str), Some("13"));
}

#[tokio::test]
async fn schema_is_idempotent_across_reopen() {
    let (pool, store) = setup().await;
    store.set("running", "1").await.expect("set");

    let reopened = StateStore::from_pool(pool).await.expect("second migration");
    assert_eq!(reopened.get("running").await.expect("get").as_deref(), Some("1"));
}

#[tokio::test]
async fn persist_commits_state_and_log_together() {
    let (_, store) = setup().await;
    let entries = vec![("running", "0".to_owned()), ("fuel_left", "174".to_owned())];

    store
        .persist(&entries, Some(&LogEntry::Episode(episode(0, 3600, 16.0))))
        .await
        .expect("persist");

    assert_eq!(store.get("fuel_left").await.expect("get").as_deref(), Some("174"));
    assert_eq!(store.total_runtime_seconds().await.expect("total"), 3600);
}

#[tokio::test]
async fn failed_log_insert_rolls_back_state_keys() {
    let (pool, store) = setup().await;
    store.set("fuel_left", "190").await.expect("seed");
    sqlx::query("DROP TABLE generator_log")
        .execute(&pool)
        .await
        .expect("drop table");

    let entries = vec![("fuel_left", "174".to_owned())];
    let result = store
        .persist(&entries, Some(&LogEntry::Episode(episode(0, 3600, 16.0))))
        .await;

    assert!(result.is_err());
    assert_eq!(store.get("fuel_left").await.expect("get").as_deref(), Some("190"));
}

#[tokio::test]
async fn stats_cover_only_the_requested_window() {
    let (_, store) = setup().await;
    store.append_episode(&episode(-120, 600, 2.5)).await.expect("old");
    store.append_episode(&episode(0, 1800, 8.0)).await.expect("in");
    store.append_episode(&episode(30, 900, 4.0)).await.expect("in");
    store.append_episode(&episode(60, 300, 1.0)).await.expect("edge");

    let since = store.runtime_stats_since(t0()).await.expect("since");
    assert_eq!(since.runtime_seconds, 3000);
    assert!((since.fuel_used - 13.0).abs() < 1e-9);

    let between = store
        .runtime_stats_between(t0(), t0() + Duration::minutes(60))
        .await
        .expect("between");
    assert_eq!(between.runtime_seconds, 2700);
    assert!((between.fuel_used - 12.0).abs() < 1e-9);

    let empty = store
        .runtime_stats_since(t0() + Duration::days(1))
        .await
        .expect("empty");
    assert_eq!(empty.runtime_seconds, 0);
    assert_eq!(empty.fuel_used, 0.0);

    assert_eq!(store.total_runtime_seconds().await.expect("total"), 3600);
}

#[tokio::test]
async fn refuel_total_excludes_resets() {
    let (_, store) = setup().await;
    store
        .append_refuel_event(&refuel(0, 50.0, 100.0, 150.0))
        .await
        .expect("add");
    store
        .append_refuel_event(&refuel(10, 0.0, 150.0, 120.0))
        .await
        .expect("reset");
    store
        .append_refuel_event(&refuel(20, 30.0, 120.0, 150.0))
        .await
        .expect("add");

    let added = store
        .refuel_added_between(t0(), t0() + Duration::hours(1))
        .await
        .expect("sum");
    assert!((added - 80.0).abs() < 1e-9);
}

#[tokio::test]
async fn episode_query_is_newest_first_and_limited() {
    let (_, store) = setup().await;
    for i in 0..15 {
        store
            .append_episode(&episode(i * 10, 60, 0.25))
            .await
            .expect("append");
    }

    let rows = store
        .episodes_since(t0() - Duration::hours(1), 10)
        .await
        .expect("query");

    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].start_time, t0() + Duration::minutes(140));
    assert_eq!(rows[9].start_time, t0() + Duration::minutes(50));
}

#[tokio::test]
async fn refuel_rows_keep_actor_fields() {
    let (_, store) = setup().await;
    let event = refuel(5, 20.0, 10.0, 30.0);
    store.append_refuel_event(&event).await.expect("append");
    store
        .append_refuel_event(&RefuelEvent {
            user_id: None,
            username: None,
            ..refuel(6, 0.0, 30.0, 25.0)
        })
        .await
        .expect("append");

    let rows = store
        .refuel_events_since(t0(), 10)
        .await
        .expect("query");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].user_id, None);
    assert_eq!(rows[1], event);
}

#[tokio::test]
async fn legacy_rows_are_read_and_garbage_rows_skipped() {
    let (pool, store) = setup().await;
    sqlx::query(
        "INSERT INTO generator_log (start_time, stop_time, runtime_seconds, fuel_used)
         VALUES ('2026-03-02T11:00:00.123456', '2026-03-02T11:30:00.654321', 1800, 8.0)",
    )
    .execute(&pool)
    .await
    .expect("legacy row");
    sqlx::query(
        "INSERT INTO generator_log (start_time, stop_time, runtime_seconds, fuel_used)
         VALUES ('2026-03-02Tgarbage', NULL, 60, 0.3)",
    )
    .execute(&pool)
    .await
    .expect("garbage row");

    let rows = store
        .episodes_since(t0() - Duration::days(1), 10)
        .await
        .expect("query");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].runtime_seconds, 1800);
    // Unreadable rows still count toward the lifetime total.
    assert_eq!(store.total_runtime_seconds().await.expect("total"), 1860);
}

#[tokio::test]
async fn whitelist_add_refresh_and_remove() {
    let (_, store) = setup().await;

    store.allow_user(11, Some("alice"), t0()).await.expect("allow");
    store
        .allow_user(22, None, t0() + Duration::minutes(1))
        .await
        .expect("allow");
    store
        .allow_user(11, Some("alice_new"), t0() + Duration::minutes(2))
        .await
        .expect("refresh");

    let users = store.whitelist().await.expect("list");
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].user_id, 11);
    assert_eq!(users[0].username.as_deref(), Some("alice_new"));
    assert_eq!(users[0].added_at, Some(t0()));

    assert!(store.is_user_allowed(22).await.expect("check"));
    assert!(store.deny_user(22).await.expect("deny"));
    assert!(!store.deny_user(22).await.expect("deny again"));
    assert!(!store.is_user_allowed(22).await.expect("check"));
}

#[tokio::test]
async fn open_creates_parent_directory_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("data").join("generator.db");

    let store = StateStore::open(&path).await.expect("open");
    store.set("fuel_left", "42").await.expect("set");
    drop(store);

    assert!(path.exists());
    let reopened = StateStore::open(&path).await.expect("reopen");
    assert_eq!(reopened.get("fuel_left").await.expect("get").as_deref(), Some("42"));
}
