//! Fanout is a hint. These tests drop or bypass it and check the poll path
//! alone brings a client to the store's state.

mod common;

use common::Harness;
use messaging_service::models::{CordMode, DeliveryStatus, MessageDraft};
use messaging_service::services::{ConversationService, MessageService, StatusTracker, UnreadCounter};
use messaging_service::sync::{StoreMessageSource, SyncClient};
use messaging_service::websocket::LocalFanout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn polling_alone_converges_when_fanout_fails() {
    let h = Harness::new();
    let a = h.user("alice");
    let b = h.user("bob");
    let conv = ConversationService::get_or_create(&h.state, a, b, CordMode::Plain, None)
        .await
        .unwrap();

    h.fanout.set_failing(true);

    let m1 = MessageService::send(&h.state, conv, a, MessageDraft::text("one"))
        .await
        .unwrap();
    let m2 = MessageService::send(&h.state, conv, b, MessageDraft::text("two"))
        .await
        .unwrap();
    StatusTracker::update_status(&h.state, conv, m1.id, b, DeliveryStatus::Read)
        .await
        .unwrap();
    assert!(h.fanout.events().is_empty());

    let mut client = SyncClient::new(StoreMessageSource::new(h.state.clone(), a), conv, 50);
    assert_eq!(client.poll_once().await.unwrap(), 2);
    assert_eq!(client.timeline().ids(), vec![m1.id, m2.id]);
    assert_eq!(
        client.timeline().get(m1.id).unwrap().status,
        DeliveryStatus::Read
    );

    // repeated polls are idempotent
    assert_eq!(client.poll_once().await.unwrap(), 0);
    assert_eq!(client.timeline().len(), 2);
}

#[tokio::test]
async fn pushed_state_is_reconciled_with_store() {
    let h = Harness::new();
    let a = h.user("alice");
    let b = h.user("bob");
    let conv = ConversationService::get_or_create(&h.state, a, b, CordMode::Encrypted, Some(60))
        .await
        .unwrap();
    let msg = MessageService::send(&h.state, conv, a, MessageDraft::text("vanishing"))
        .await
        .unwrap();

    let mut client = SyncClient::new(StoreMessageSource::new(h.state.clone(), a), conv, 50);
    for (_, event) in h.fanout.events() {
        client.on_payload(&event.to_payload().unwrap());
    }
    assert_eq!(client.timeline().len(), 1);

    UnreadCounter::reset(&h.state, conv, b).await.unwrap();
    h.store
        .set_delete_at(msg.id, Some(chrono::Utc::now() - chrono::Duration::seconds(1)))
        .await;

    client.poll_once().await.unwrap();
    assert!(client.timeline().is_empty());
}

#[tokio::test]
async fn push_triggers_early_poll() {
    let h = Harness::new();
    let a = h.user("alice");
    let b = h.user("bob");
    let conv = ConversationService::get_or_create(&h.state, a, b, CordMode::Plain, None)
        .await
        .unwrap();

    let live = h.state_with_fanout(Arc::new(LocalFanout::new(h.state.registry.clone())));
    let (_, pushes) = live.registry.add_subscriber(a).await;
    let (stop_tx, stop_rx) = watch::channel(false);

    // the timer alone would not fire again within the test
    let client = SyncClient::new(StoreMessageSource::new(live.clone(), a), conv, 50);
    let runner = tokio::spawn(client.run(Duration::from_secs(3600), pushes, stop_rx));

    let msg = MessageService::send(&live, conv, b, MessageDraft::text("ping"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    stop_tx.send(true).unwrap();
    let timeline = tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("sync client stopped")
        .unwrap();
    assert_eq!(timeline.ids(), vec![msg.id]);
}
