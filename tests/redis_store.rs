//! Runs the stores against a real Redis server.
//!
//! These tests only run when `REDIS_URL` is set (a `.env` file is honoured), e.g.
//! `REDIS_URL=redis://127.0.0.1:6379/15 cargo test --test redis_store`. Every test works under
//! freshly generated ids, so a shared database is fine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rollcall_store::config::RedisSettings;
use rollcall_store::store::{Batch, RedisStore, Reply};
use rollcall_store::{
    generate_id, AttendanceStore, ErrorKind, KeyValueStore, RateLimiter, SessionStatus, SessionStore,
    Settings, StoreError, TokenStore,
};
use serde::{Deserialize, Serialize};

async fn connect() -> Option<Arc<RedisStore>> {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").ok()?;
    let settings = RedisSettings {
        url,
        ..RedisSettings::default()
    };
    Some(Arc::new(
        RedisStore::connect(&settings)
            .await
            .expect("REDIS_URL is set but the server is unreachable"),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Named {
    name: String,
}

#[tokio::test]
async fn atomic_batch_returns_replies_in_order() {
    let Some(store) = connect().await else { return };
    let key = format!("test:{}", generate_id());

    let replies = store
        .execute_batch(
            Batch::atomic()
                .set(key.as_str(), "value", Some(Duration::from_secs(30)))
                .get(key.as_str())
                .delete(key.as_str())
                .get(key.as_str()),
        )
        .await
        .unwrap();

    assert_eq!(
        replies,
        vec![
            Reply::Ok,
            Reply::Data(b"value".to_vec()),
            Reply::Int(1),
            Reply::Nil
        ]
    );
}

#[tokio::test]
async fn wrong_type_maps_to_backend_error() {
    let Some(store) = connect().await else { return };
    let key = format!("test:{}", generate_id());
    store.hash_set(&key, "f", b"v").await.unwrap();

    let err = store.increment(&key).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
    store.delete(&key).await.unwrap();
}

#[tokio::test]
async fn session_lifecycle() {
    let Some(store) = connect().await else { return };
    let sessions = SessionStore::new(store);
    let expiring = generate_id();
    let closing = generate_id();

    sessions
        .create_session(&expiring, Duration::from_secs(1))
        .await
        .unwrap();
    sessions
        .create_session(&closing, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(sessions.is_valid(&expiring).await.unwrap());

    sessions.close_session(&closing).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(!sessions.is_valid(&expiring).await.unwrap());
    assert_eq!(sessions.status(&expiring).await.unwrap(), None);
    assert_eq!(
        sessions.status(&closing).await.unwrap(),
        Some(SessionStatus::Closed)
    );
}

#[tokio::test]
async fn token_race_has_one_winner() {
    let Some(store) = connect().await else { return };
    let tokens = Arc::new(TokenStore::new(store));
    let token = generate_id();
    tokens
        .issue_token(&token, "S1", Duration::from_secs(60))
        .await
        .unwrap();

    let racers: Vec<_> = (0..16)
        .map(|_| {
            let tokens = Arc::clone(&tokens);
            let token = token.clone();
            tokio::spawn(async move { tokens.consume_token(&token).await.unwrap() })
        })
        .collect();

    let mut winners = Vec::new();
    for racer in racers {
        if let Some(session_id) = racer.await.unwrap() {
            winners.push(session_id);
        }
    }
    assert_eq!(winners, vec!["S1".to_string()]);
}

#[tokio::test]
async fn attendance_rejects_duplicates() {
    let Some(store) = connect().await else { return };
    let attendance = AttendanceStore::new(store.clone());
    let session_id = generate_id();
    let ada = Named {
        name: "Ada".to_string(),
    };

    let empty: BTreeMap<String, Named> = attendance.export_all(&session_id).await.unwrap();
    assert!(empty.is_empty());

    attendance.add_record(&session_id, "123", &ada).await.unwrap();
    let err = attendance
        .add_record(&session_id, "123", &ada)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationConflict);
    assert!(attendance.has_submitted(&session_id, "123").await.unwrap());

    let exported: BTreeMap<String, Named> = attendance.export_all(&session_id).await.unwrap();
    assert_eq!(exported, BTreeMap::from([("123".to_string(), ada)]));

    store
        .delete(&format!("attendance:{session_id}"))
        .await
        .unwrap();
}

#[tokio::test]
async fn rate_limit_window_is_set_once() {
    let Some(store) = connect().await else { return };
    let limiter = RateLimiter::new(store.clone(), &Settings::default().rate_limit);
    let client_id = generate_id();
    let window = Duration::from_secs(2);

    assert!(!limiter.is_limited(&client_id, 2, window).await.unwrap());
    assert!(!limiter.is_limited(&client_id, 2, window).await.unwrap());
    assert!(limiter.is_limited(&client_id, 2, window).await.unwrap());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(!limiter.is_limited(&client_id, 2, window).await.unwrap());
}
