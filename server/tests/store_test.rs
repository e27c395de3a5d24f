//! SQLite store against a real on-disk database.

use std::time::Duration;

use huddle_server::db;
use huddle_server::engine::{OutboundMessage, Payload, UserId};
use huddle_server::store::{HistoryQuery, MessageStore, SqliteStore, UserDirectory};

fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let pool = db::init_db(&data_dir).expect("Failed to init DB");
    (tmp_dir, SqliteStore::new(pool))
}

fn contents(messages: &[huddle_server::engine::PersistedMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|m| match &m.message.payload {
            Payload::Text { content } => content.clone(),
            other => panic!("unexpected payload {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn test_channel_history_pages_backwards() {
    let (_tmp, store) = open_store();
    for i in 0..5 {
        store
            .append_message(&OutboundMessage::channel(
                "alice".into(),
                "general".into(),
                Payload::text(format!("m{i}")),
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    store
        .append_message(&OutboundMessage::channel(
            "alice".into(),
            "random".into(),
            Payload::text("elsewhere"),
        ))
        .await
        .unwrap();

    let latest = store
        .channel_history(
            &"general".into(),
            HistoryQuery {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(contents(&latest.messages), vec!["m3", "m4"]);
    assert!(latest.has_more);

    let older = store
        .channel_history(
            &"general".into(),
            HistoryQuery {
                before: Some(latest.messages[0].persisted_at),
                before_id: Some(latest.messages[0].id),
                limit: Some(3),
            },
        )
        .await
        .unwrap();
    assert_eq!(contents(&older.messages), vec!["m0", "m1", "m2"]);
    assert!(!older.has_more);
}

#[tokio::test]
async fn test_direct_history_covers_both_directions() {
    let (_tmp, store) = open_store();
    let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

    store
        .append_message(&OutboundMessage::direct(
            alice.clone(),
            bob.clone(),
            Payload::text("ping"),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    store
        .append_message(&OutboundMessage::direct(
            bob.clone(),
            alice.clone(),
            Payload::text("pong"),
        ))
        .await
        .unwrap();
    store
        .append_message(&OutboundMessage::direct(
            alice.clone(),
            "carol".into(),
            Payload::text("unrelated"),
        ))
        .await
        .unwrap();

    let from_alice = store
        .direct_history(&alice, &bob, HistoryQuery::default())
        .await
        .unwrap();
    let from_bob = store
        .direct_history(&bob, &alice, HistoryQuery::default())
        .await
        .unwrap();

    assert_eq!(contents(&from_alice.messages), vec!["ping", "pong"]);
    assert_eq!(from_alice, from_bob);
}

#[tokio::test]
async fn test_only_recipient_can_mark_read() {
    let (_tmp, store) = open_store();
    let persisted = store
        .append_message(&OutboundMessage::direct(
            "alice".into(),
            "bob".into(),
            Payload::text("read me"),
        ))
        .await
        .unwrap();

    assert!(!store.mark_read(persisted.id, &"alice".into()).await.unwrap());
    assert!(store.mark_read(persisted.id, &"bob".into()).await.unwrap());
    assert!(!store.mark_read(persisted.id, &"bob".into()).await.unwrap());

    let fetched = store.get_message(persisted.id).await.unwrap().unwrap();
    assert!(fetched.read);
}

#[tokio::test]
async fn test_users_persist_across_reopen() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let store = SqliteStore::new(db::init_db(&data_dir).unwrap());
    store.upsert_user(&"alice".into(), "Alice").await.unwrap();
    drop(store);

    let reopened = SqliteStore::new(db::init_db(&data_dir).unwrap());
    assert!(reopened.is_known_user(&"alice".into()).await.unwrap());
    assert!(!reopened.is_known_user(&"bob".into()).await.unwrap());
}

#[tokio::test]
async fn test_recent_conversations_track_latest_exchange() {
    let (_tmp, store) = open_store();
    let alice = UserId::from("alice");
    for (from, to, text) in [
        ("alice", "bob", "one"),
        ("carol", "alice", "two"),
        ("alice", "bob", "three"),
    ] {
        store
            .append_message(&OutboundMessage::direct(
                from.into(),
                to.into(),
                Payload::text(text),
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let recent = store.recent_conversations(&alice, 10).await.unwrap();
    let peers: Vec<&str> = recent.iter().map(|c| c.peer_id.as_str()).collect();
    assert_eq!(peers, vec!["bob", "carol"]);
    let last: Vec<huddle_server::engine::PersistedMessage> =
        recent.into_iter().map(|c| c.last_message).collect();
    assert_eq!(contents(&last), vec!["three", "two"]);
}
