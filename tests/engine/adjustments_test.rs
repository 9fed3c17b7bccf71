//! Tests for refuel, reset and service adjustments in `src/engine/mod.rs`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use genwatch::engine::{Actor, Engine, EngineError, EngineSettings, ServiceSetting, ServiceStatus};
use genwatch::fuel::FuelModel;
use genwatch::store::{RefuelKind, StateStore};

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

fn operator() -> Actor {
    Actor {
        user_id: Some(42),
        username: Some("operator".to_owned()),
    }
}

async fn engine_with_fuel(store: &StateStore, litres: f64) -> Engine {
    let engine = Engine::open(store.clone(), settings(), t0())
        .await
        .expect("engine should open");
    engine
        .reset_fuel(litres, &operator(), t0())
        .await
        .expect("reset should succeed");
    engine
}

#[tokio::test]
async fn refuel_while_stopped_adds_to_snapshot() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 50.0).await;

    let adj = engine
        .refuel(100.0, &operator(), t0() + Duration::minutes(5))
        .await
        .expect("refuel");

    assert_eq!(adj.event.amount, 100.0);
    assert_eq!(adj.event.fuel_before, 50.0);
    assert_eq!(adj.event.fuel_after, 150.0);
    assert_eq!(store.get("fuel_left").await.expect("get").as_deref(), Some("150"));

    let events = store
        .refuel_events_since(t0() - Duration::days(1), 10)
        .await
        .expect("query");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind(), RefuelKind::Add);
    assert_eq!(events[0].user_id, Some(42));
    assert_eq!(events[0].username.as_deref(), Some("operator"));
    assert_eq!(events[1].kind(), RefuelKind::Reset);
}

#[tokio::test]
async fn refuel_is_capped_at_tank_capacity() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 50.0).await;

    let adj = engine.refuel(250.0, &operator(), t0()).await.expect("refuel");

    assert_eq!(adj.event.fuel_after, 240.0);
    assert_eq!(engine.snapshot().await.fuel_left, 240.0);
}

#[tokio::test]
async fn reset_above_capacity_is_rejected_without_side_effects() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 50.0).await;
    let before = engine.snapshot().await;

    let result = engine.reset_fuel(500.0, &operator(), t0()).await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_eq!(engine.snapshot().await, before);
    assert_eq!(store.get("fuel_left").await.expect("get").as_deref(), Some("50"));
    let events = store
        .refuel_events_since(t0() - Duration::days(1), 10)
        .await
        .expect("query");
    assert_eq!(events.len(), 1, "only the setup reset should be logged");
}

#[tokio::test]
async fn non_positive_or_non_finite_refuel_is_rejected() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 50.0).await;

    for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
        let result = engine.refuel(amount, &operator(), t0()).await;
        assert!(
            matches!(result, Err(EngineError::Validation(_))),
            "amount {amount} should be rejected"
        );
    }
    assert!(matches!(
        engine.reset_fuel(-1.0, &operator(), t0()).await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(engine.snapshot().await.fuel_left, 50.0);
}

#[tokio::test]
async fn refuel_while_running_hits_target_regardless_of_elapsed_time() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 100.0).await;
    engine.tick(true, t0()).await.expect("start");

    for (offset, amount) in [(437_i64, 10.0), (3_901, 25.5), (17_777, 200.0)] {
        let now = t0() + Duration::seconds(offset);
        let before = engine.effective_fuel(now).await;

        let adj = engine.refuel(amount, &operator(), now).await.expect("refuel");

        let expected = (before + amount).min(240.0);
        assert!((adj.event.fuel_after - expected).abs() < 1e-9);
        assert!((engine.effective_fuel(now).await - expected).abs() < 1e-9);
    }

    let state = engine.snapshot().await;
    assert!(state.is_running());
    assert_eq!(state.started_at(), Some(t0()), "episode must not restart");
}

#[tokio::test]
async fn reset_while_running_keeps_episode_and_hits_value() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 100.0).await;
    engine.tick(true, t0()).await.expect("start");
    let now = t0() + Duration::seconds(5_000);

    engine.reset_fuel(75.0, &operator(), now).await.expect("reset");

    assert!((engine.effective_fuel(now).await - 75.0).abs() < 1e-9);
    let report = engine
        .tick(false, now + Duration::seconds(3_600))
        .await
        .expect("stop");
    assert!((report.effective_fuel - 59.0).abs() < 1e-9);
}

#[tokio::test]
async fn setservice_schedules_from_current_runtime() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 200.0).await;
    engine.tick(true, t0()).await.expect("start");
    engine
        .tick(false, t0() + Duration::hours(2))
        .await
        .expect("stop");

    let setting = engine
        .set_service(10.0, t0() + Duration::hours(3))
        .await
        .expect("set service");

    assert_eq!(
        setting,
        ServiceSetting::Scheduled {
            hours: 10.0,
            due_seconds: 7_200.0 + 36_000.0,
        }
    );
    let status = engine.status(t0() + Duration::hours(3)).await.expect("status");
    assert_eq!(status.service, ServiceStatus::Remaining { seconds: 36_000 });
}

#[tokio::test]
async fn setservice_zero_clears_and_negative_is_rejected() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 200.0).await;
    engine.set_service(5.0, t0()).await.expect("set");

    assert_eq!(
        engine.set_service(0.0, t0()).await.expect("clear"),
        ServiceSetting::Cleared
    );
    assert_eq!(engine.snapshot().await.service_due_seconds, None);
    assert_eq!(
        store.get("service_due_seconds").await.expect("get").as_deref(),
        Some("")
    );

    assert!(matches!(
        engine.set_service(-1.0, t0()).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn history_window_must_be_positive() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 200.0).await;

    assert!(matches!(
        engine.history(0, t0()).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.refuel_history(-3, t0()).await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(engine.refuel_history(1, t0()).await.expect("history").len(), 1);
}

#[tokio::test]
async fn history_returns_ten_newest_episodes() {
    let store = setup_store().await;
    let engine = engine_with_fuel(&store, 240.0).await;

    for i in 0..12 {
        let start = t0() + Duration::minutes(i * 10);
        engine.tick(true, start).await.expect("start");
        engine
            .tick(false, start + Duration::minutes(5))
            .await
            .expect("stop");
    }

    let episodes = engine
        .history(1, t0() + Duration::hours(3))
        .await
        .expect("history");
    assert_eq!(episodes.len(), 10);
    assert_eq!(episodes[0].start_time, t0() + Duration::minutes(110));
    assert!(episodes
        .windows(2)
        .all(|pair| pair[0].start_time > pair[1].start_time));
}
