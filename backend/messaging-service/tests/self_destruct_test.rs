mod common;

use chrono::{Duration, Utc};
use common::Harness;
use messaging_service::jobs::purge_expired_once;
use messaging_service::models::{CordMode, DeliveryStatus, MessageDraft};
use messaging_service::services::{ConversationService, MessageService, UnreadCounter};
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use uuid::Uuid;

async fn encrypted_pair(h: &Harness, timer: Option<i32>) -> (Uuid, Uuid, Uuid) {
    let a = h.user("alice");
    let b = h.user("bob");
    let conv = ConversationService::get_or_create(&h.state, a, b, CordMode::Encrypted, timer)
        .await
        .unwrap();
    (conv, a, b)
}

#[tokio::test]
async fn unread_message_never_gets_a_deadline() {
    let h = Harness::new();
    let (conv, a, _) = encrypted_pair(&h, Some(60)).await;

    let msg = MessageService::send(&h.state, conv, a, MessageDraft::text("psst"))
        .await
        .unwrap();
    assert!(msg.is_encrypted);
    assert!(msg.delete_at.is_none());
    assert!(h.message(conv, msg.id).await.unwrap().delete_at.is_none());
}

#[tokio::test]
async fn reset_stamps_deadline_from_read_time() {
    let h = Harness::new();
    let (conv, a, b) = encrypted_pair(&h, Some(60)).await;
    let m1 = MessageService::send(&h.state, conv, a, MessageDraft::text("one"))
        .await
        .unwrap();
    let m2 = MessageService::send(&h.state, conv, a, MessageDraft::text("two"))
        .await
        .unwrap();

    let before = Utc::now();
    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    let after = Utc::now();

    for id in [m1.id, m2.id] {
        let stored = h.message(conv, id).await.unwrap();
        let deadline = stored.delete_at.expect("deadline set on read");
        assert!(deadline >= before + Duration::seconds(59));
        assert!(deadline <= after + Duration::seconds(61));
        assert_eq!(stored.status, DeliveryStatus::Read);
    }
}

#[tokio::test]
async fn own_messages_wait_for_the_peer_to_read() {
    let h = Harness::new();
    let (conv, a, b) = encrypted_pair(&h, Some(60)).await;
    let mine = MessageService::send(&h.state, conv, a, MessageDraft::text("still unread"))
        .await
        .unwrap();
    let theirs = MessageService::send(&h.state, conv, b, MessageDraft::text("read by alice"))
        .await
        .unwrap();

    UnreadCounter::reset(&h.state, conv, a).await.unwrap();
    assert!(h.message(conv, mine.id).await.unwrap().delete_at.is_none());
    assert!(h.message(conv, theirs.id).await.unwrap().delete_at.is_some());

    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    assert!(h.message(conv, mine.id).await.unwrap().delete_at.is_some());
}

#[tokio::test]
async fn default_timer_applies_when_none_given() {
    let h = Harness::new();
    let (conv, a, b) = encrypted_pair(&h, None).await;
    let msg = MessageService::send(&h.state, conv, a, MessageDraft::text("default"))
        .await
        .unwrap();

    let read_at = Utc::now();
    UnreadCounter::reset(&h.state, conv, b).await.unwrap();

    let deadline = h.message(conv, msg.id).await.unwrap().delete_at.unwrap();
    let secs = (deadline - read_at).num_seconds();
    assert!((59..=61).contains(&secs), "deadline {secs}s after read");
}

#[tokio::test]
async fn second_reset_keeps_first_deadline() {
    let h = Harness::new();
    let (conv, a, b) = encrypted_pair(&h, Some(300)).await;
    let msg = MessageService::send(&h.state, conv, a, MessageDraft::text("once"))
        .await
        .unwrap();

    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    let first = h.message(conv, msg.id).await.unwrap().delete_at;

    tokio::time::sleep(StdDuration::from_millis(5)).await;
    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    let second = h.message(conv, msg.id).await.unwrap().delete_at;

    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn plain_conversation_never_expires() {
    let h = Harness::new();
    let a = h.user("alice");
    let b = h.user("bob");
    let conv = ConversationService::get_or_create(&h.state, a, b, CordMode::Plain, None)
        .await
        .unwrap();
    let msg = MessageService::send(&h.state, conv, a, MessageDraft::text("forever"))
        .await
        .unwrap();

    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    assert!(h.message(conv, msg.id).await.unwrap().delete_at.is_none());
}

#[tokio::test]
async fn expired_messages_are_hidden_then_purged() {
    let h = Harness::new();
    let (conv, a, b) = encrypted_pair(&h, Some(60)).await;
    let doomed = MessageService::send(&h.state, conv, a, MessageDraft::text("bye"))
        .await
        .unwrap();
    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    let fresh = MessageService::send(&h.state, conv, a, MessageDraft::text("new"))
        .await
        .unwrap();

    h.store
        .set_delete_at(doomed.id, Some(Utc::now() - Duration::seconds(1)))
        .await;

    let visible = MessageService::list(&h.state, conv, b, None, None)
        .await
        .unwrap();
    assert_eq!(visible.iter().map(|m| m.id).collect::<Vec<_>>(), vec![fresh.id]);
    assert_eq!(h.store.message_count().await, 2);

    let purged = purge_expired_once(h.store.as_ref(), Utc::now()).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(h.store.message_count().await, 1);
    assert_eq!(h.status_row_count(doomed.id).await, 0);
}

#[tokio::test]
async fn reaper_loop_sweeps_and_stops() {
    let h = Harness::new();
    let (conv, a, b) = encrypted_pair(&h, Some(60)).await;
    let msg = MessageService::send(&h.state, conv, a, MessageDraft::text("tick"))
        .await
        .unwrap();
    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    h.store
        .set_delete_at(msg.id, Some(Utc::now() - Duration::seconds(1)))
        .await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let reaper = tokio::spawn(messaging_service::jobs::start_self_destruct_reaper(
        h.state.store.clone(),
        StdDuration::from_millis(10),
        stop_rx,
    ));

    tokio::time::timeout(StdDuration::from_secs(2), async {
        while h.store.message_count().await > 0 {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .expect("reaper purged the expired message");

    stop_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(2), reaper)
        .await
        .expect("reaper stopped")
        .unwrap();
}
