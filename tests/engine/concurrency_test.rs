//! Tests for concurrent adjustments against a shared `Engine`.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use genwatch::engine::{Actor, Engine, EngineSettings};
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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refuels_are_not_lost() {
    let store = setup_store().await;
    let engine = Arc::new(
        Engine::open(store.clone(), settings(), t0())
            .await
            .expect("engine should open"),
    );
    engine
        .reset_fuel(100.0, &Actor::default(), t0())
        .await
        .expect("reset");

    let mut handles = Vec::new();
    for i in 0..20_i64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let actor = Actor {
                user_id: Some(i),
                username: None,
            };
            engine
                .refuel(1.0, &actor, t0() + Duration::seconds(1))
                .await
                .expect("refuel")
        }));
    }
    for handle in handles {
        handle.await.expect("task should not panic");
    }

    assert_eq!(engine.snapshot().await.fuel_left, 120.0);
    assert_eq!(store.get("fuel_left").await.expect("get").as_deref(), Some("120"));

    let adds = store
        .refuel_events_since(t0() - Duration::days(1), 100)
        .await
        .expect("query")
        .into_iter()
        .filter(|e| e.kind() == RefuelKind::Add)
        .count();
    assert_eq!(adds, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refuels_interleaved_with_ticks_stay_consistent() {
    let engine = Arc::new(
        Engine::open(setup_store().await, settings(), t0())
            .await
            .expect("engine should open"),
    );
    engine
        .reset_fuel(100.0, &Actor::default(), t0())
        .await
        .expect("reset");
    engine.tick(true, t0()).await.expect("start");
    let now = t0() + Duration::seconds(900);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let refueler = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            refueler
                .refuel(2.0, &Actor::default(), now)
                .await
                .expect("refuel");
        }));
        let ticker = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            ticker.tick(true, now).await.expect("tick");
        }));
    }
    for handle in handles {
        handle.await.expect("task should not panic");
    }

    // 100 L minus 15 minutes at 16 L/h, plus ten 2 L refuels.
    let expected = 100.0 - 4.0 + 20.0;
    assert!((engine.effective_fuel(now).await - expected).abs() < 1e-9);
    assert!(engine.snapshot().await.is_running());
}
