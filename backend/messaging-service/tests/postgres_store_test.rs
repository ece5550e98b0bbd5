//! Runs the core flows against a real Postgres.
//!
//! Requires `DATABASE_URL`; run with `cargo test -- --ignored`.

mod common;

use common::{test_database_url, RecordingFanout};
use messaging_service::config::Config;
use messaging_service::db;
use messaging_service::error::AppError;
use messaging_service::jobs::purge_expired_once;
use messaging_service::models::{CordMode, DeliveryStatus, MessageDraft};
use messaging_service::repository::{MessagingStore, PgMessagingStore};
use messaging_service::services::{
    AllowAllModeration, ConversationService, MessageService, PgUserDirectory, StatusTracker,
    UnreadCounter,
};
use messaging_service::state::AppState;
use messaging_service::websocket::ConnectionRegistry;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

async fn setup() -> (PgPool, AppState, Arc<RecordingFanout>) {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_database_url())
        .await
        .expect("connect to test database");
    db::run_migrations(&pool).await.expect("migrations");

    let fanout = Arc::new(RecordingFanout::default());
    let state = AppState::new(
        Arc::new(Config::test_defaults()),
        Arc::new(PgMessagingStore::new(pool.clone())),
        fanout.clone(),
        Arc::new(PgUserDirectory::new(pool.clone())),
        Arc::new(AllowAllModeration),
        ConnectionRegistry::new(),
    );
    (pool, state, fanout)
}

async fn create_user(pool: &PgPool, prefix: &str) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let username = format!("{prefix}_{}", &id.simple().to_string()[..8]);
    sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2)")
        .bind(id)
        .bind(&username)
        .execute(pool)
        .await
        .expect("insert user");
    (id, username)
}

#[tokio::test]
#[ignore]
#[serial]
async fn full_flow_on_postgres() {
    let (pool, state, fanout) = setup().await;
    let (a, _) = create_user(&pool, "alice").await;
    let (b, bob_name) = create_user(&pool, "bob").await;

    let conv = ConversationService::get_or_create_with_username(
        &state,
        a,
        &bob_name.to_uppercase(),
        CordMode::Plain,
        None,
    )
    .await
    .unwrap();
    let again = ConversationService::get_or_create(&state, b, a, CordMode::Plain, None)
        .await
        .unwrap();
    assert_eq!(conv, again);

    let msg = MessageService::send(&state, conv, a, MessageDraft::text("hello"))
        .await
        .unwrap();
    assert_eq!(msg.status, DeliveryStatus::Sent);

    let listed = ConversationService::list_for(&state, b).await.unwrap();
    let summary = listed.iter().find(|c| c.id == conv).unwrap();
    assert_eq!(summary.unread_count, 1);

    StatusTracker::update_status(&state, conv, msg.id, b, DeliveryStatus::Delivered)
        .await
        .unwrap();
    UnreadCounter::reset(&state, conv, b).await.unwrap();

    let rows = StatusTracker::list(&state, conv, msg.id, a).await.unwrap();
    assert!(rows.iter().all(|r| r.status == DeliveryStatus::Read));
    let page = MessageService::list(&state, conv, b, None, None).await.unwrap();
    assert_eq!(page[0].status, DeliveryStatus::Read);
    assert_eq!(
        fanout
            .status_updates_for(a)
            .into_iter()
            .map(|(_, s)| s)
            .collect::<Vec<_>>(),
        vec![DeliveryStatus::Delivered, DeliveryStatus::Read]
    );

    let outsider = Uuid::new_v4();
    let err = MessageService::list(&state, conv, outsider, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
}

#[tokio::test]
#[ignore]
#[serial]
async fn encrypted_messages_expire_and_purge_on_postgres() {
    let (pool, state, _) = setup().await;
    let (a, _) = create_user(&pool, "alice").await;
    let (b, _) = create_user(&pool, "bob").await;

    let conv = ConversationService::get_or_create(&state, a, b, CordMode::Encrypted, Some(60))
        .await
        .unwrap();
    let msg = MessageService::send(&state, conv, a, MessageDraft::text("secret"))
        .await
        .unwrap();
    assert!(msg.is_encrypted);

    UnreadCounter::reset(&state, conv, b).await.unwrap();
    sqlx::query("UPDATE messages SET delete_at = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(msg.id)
        .execute(&pool)
        .await
        .unwrap();

    let visible = MessageService::list(&state, conv, b, None, None).await.unwrap();
    assert!(visible.is_empty());

    let purged = purge_expired_once(state.store.as_ref(), chrono::Utc::now())
        .await
        .unwrap();
    assert!(purged >= 1);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_status WHERE message_id = $1")
        .bind(msg.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn concurrent_get_or_create_yields_one_conversation() {
    let (pool, state, _) = setup().await;
    let (a, _) = create_user(&pool, "alice").await;
    let (b, _) = create_user(&pool, "bob").await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let state = state.clone();
            let (x, y) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tokio::spawn(async move {
                ConversationService::get_or_create(&state, x, y, CordMode::Plain, None).await
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let store: &dyn MessagingStore = state.store.as_ref();
    let mut tx = store.begin().await.unwrap();
    assert!(tx.is_participant(ids[0], a).await.unwrap());
}
