//! Tests for alert latching through `Engine::tick`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use genwatch::engine::state::Latch;
use genwatch::engine::{Actor, Engine, EngineSettings, TickReport};
use genwatch::fuel::FuelModel;
use genwatch::notify::Notice;
use genwatch::store::StateStore;

async fn setup_store() -> StateStore {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");
    StateStore::from_pool(pool)
        .await
        .expect("schema should apply")
}

fn settings() -> EngineSettings {
    EngineSettings {
        fuel: FuelModel::new(16.0, 240.0),
        initial_fuel: 190.0,
        low_fuel_threshold_hours: 4.0,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
        .single()
        .expect("valid time")
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

fn low_fuel_count(report: &TickReport) -> usize {
    report
        .notices
        .iter()
        .filter(|n| matches!(n, Notice::LowFuel { .. }))
        .count()
}

fn service_count(report: &TickReport) -> usize {
    report
        .notices
        .iter()
        .filter(|n| matches!(n, Notice::ServiceDue { .. }))
        .count()
}

#[tokio::test]
async fn low_fuel_alert_fires_once_per_episode_of_low_fuel() {
    let engine = Engine::open(setup_store().await, settings(), t0())
        .await
        .expect("engine should open");
    // 60 L at 16 L/h is 3.75 h, under the 4 h threshold.
    engine
        .reset_fuel(60.0, &Actor::default(), t0())
        .await
        .expect("reset");

    let mut fired = 0;
    for i in 0..10 {
        let report = engine.tick(true, at(i * 60)).await.expect("tick");
        fired += low_fuel_count(&report);
    }

    assert_eq!(fired, 1);
    assert!(engine.snapshot().await.low_fuel_alerted);
}

#[tokio::test]
async fn refuel_clears_low_fuel_latch_and_alert_can_fire_again() {
    let engine = Engine::open(setup_store().await, settings(), t0())
        .await
        .expect("engine should open");
    engine
        .reset_fuel(60.0, &Actor::default(), t0())
        .await
        .expect("reset");
    let first = engine.tick(true, t0()).await.expect("start");
    assert_eq!(low_fuel_count(&first), 1);

    engine
        .refuel(100.0, &Actor::default(), at(600))
        .await
        .expect("refuel");
    assert!(!engine.snapshot().await.low_fuel_alerted);
    let healthy = engine.tick(true, at(660)).await.expect("tick");
    assert_eq!(low_fuel_count(&healthy), 0);

    engine
        .reset_fuel(20.0, &Actor::default(), at(720))
        .await
        .expect("reset");
    let again = engine.tick(true, at(780)).await.expect("tick");
    assert_eq!(low_fuel_count(&again), 1);
}

#[tokio::test]
async fn service_alert_fires_at_the_mark_exactly_once() {
    let engine = Engine::open(setup_store().await, settings(), t0())
        .await
        .expect("engine should open");
    engine.set_service(100.0, t0()).await.expect("set service");
    assert_eq!(engine.snapshot().await.service_due_seconds, Some(360_000.0));

    engine.tick(true, t0()).await.expect("start");
    let before = engine.tick(true, at(359_999)).await.expect("tick");
    assert_eq!(service_count(&before), 0);

    let due = engine.tick(true, at(360_000)).await.expect("tick");
    assert_eq!(service_count(&due), 1);
    assert!(due.notices.contains(&Notice::ServiceDue {
        total_runtime_seconds: 360_000
    }));

    let after = engine.tick(true, at(360_060)).await.expect("tick");
    assert_eq!(service_count(&after), 0);
    assert!(engine.snapshot().await.service_alerted);

    engine.set_service(10.0, at(360_060)).await.expect("reschedule");
    let state = engine.snapshot().await;
    assert!(!state.service_alerted);
    assert_eq!(state.service_due_seconds, Some(360_060.0 + 36_000.0));
}

#[tokio::test]
async fn service_alert_survives_stop_and_restart() {
    let store = setup_store().await;
    let engine = Engine::open(store.clone(), settings(), t0())
        .await
        .expect("engine should open");
    engine.set_service(1.0, t0()).await.expect("set service");
    engine.tick(true, t0()).await.expect("start");
    let due = engine.tick(true, at(3_600)).await.expect("tick");
    assert_eq!(service_count(&due), 1);
    engine.tick(false, at(3_700)).await.expect("stop");
    drop(engine);

    let reopened = Engine::open(store, settings(), at(4_000))
        .await
        .expect("engine should reopen");
    assert!(reopened.snapshot().await.service_alerted);
    reopened.tick(true, at(4_000)).await.expect("start");
    let later = reopened.tick(true, at(5_000)).await.expect("tick");
    assert_eq!(service_count(&later), 0);
}

#[tokio::test]
async fn released_latch_lets_the_alert_fire_again() {
    let engine = Engine::open(setup_store().await, settings(), t0())
        .await
        .expect("engine should open");
    engine
        .reset_fuel(30.0, &Actor::default(), t0())
        .await
        .expect("reset");
    let first = engine.tick(true, t0()).await.expect("start");
    assert_eq!(low_fuel_count(&first), 1);

    engine
        .release_latch(Latch::LowFuel)
        .await
        .expect("release");
    assert!(!engine.snapshot().await.low_fuel_alerted);

    let retry = engine.tick(true, at(60)).await.expect("tick");
    assert_eq!(low_fuel_count(&retry), 1);
}

#[tokio::test]
async fn low_fuel_is_not_evaluated_while_stopped() {
    let engine = Engine::open(setup_store().await, settings(), t0())
        .await
        .expect("engine should open");
    engine
        .reset_fuel(10.0, &Actor::default(), t0())
        .await
        .expect("reset");

    for i in 0..3 {
        let report = engine.tick(false, at(i * 60)).await.expect("tick");
        assert!(report.notices.is_empty());
    }
    assert!(!engine.snapshot().await.low_fuel_alerted);
}
