//! The durable path: a message sent while the receiver is offline is only
//! ever recovered through the store-backed read, which also promotes it to
//! read and pushes the receipt back at the original sender.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use wirechat::cache::{LocalCache, MemoryCache};
use wirechat::client::{ConnState, SyncClient};
use wirechat::config::ClientConfig;
use wirechat::registry::{ConnectionRegistry, Registry};
use wirechat::server;
use wirechat::service::{ChatService, InProcessApi};
use wirechat::store::MemoryStore;
use wirechat::types::message::{MessageStatus, MessageType, NewMessage};

async fn start_server() -> (Arc<ChatService>, Arc<ConnectionRegistry>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(ChatService::new(store, registry.clone()));
    tokio::spawn(server::serve(listener, registry.clone()));
    (service, registry, format!("ws://{addr}"))
}

async fn connect_client(
    service: &Arc<ChatService>,
    registry: &Arc<ConnectionRegistry>,
    url: &str,
    user_id: &str,
) -> Arc<SyncClient> {
    let cache = Arc::new(MemoryCache::new());
    let api = Arc::new(InProcessApi::new(service.clone()));
    let config = ClientConfig {
        server_url: url.to_string(),
        ..ClientConfig::default()
    };
    let client = SyncClient::with_default_transport(user_id, config, cache, api);
    let run = client.clone();
    tokio::spawn(async move { run.run().await });

    let mut state = client.subscribe_state();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnState::Connected),
    )
    .await
    .expect("client did not connect in time")
    .unwrap();
    while !registry.is_online(user_id) {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    client
}

#[tokio::test]
async fn offline_send_is_recovered_by_the_read_path_and_receipted() {
    let (service, registry, url) = start_server().await;

    // Bob is offline: the live push is dropped, the store keeps the record.
    let sent = service
        .send_message(NewMessage {
            sender_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
            content: "hi while you were away".to_string(),
            message_type: MessageType::Text,
        })
        .await
        .unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);

    // Alice is online by the time Bob reads.
    let alice = connect_client(&service, &registry, &url, "alice").await;
    let mut receipts = alice.event_bus.messages_read.subscribe();

    // Bob's conversation fetch (the REST read) returns the message promoted
    // to read and fires the receipt toward Alice.
    let conversation = service.get_messages("bob", "alice").await.unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].status, MessageStatus::Read);

    let receipt = timeout(Duration::from_secs(5), receipts.recv())
        .await
        .expect("read receipt never reached the sender")
        .unwrap();
    assert_eq!(receipt.read_by.as_deref(), Some("bob"));
    assert_eq!(receipt.message_ids, vec![sent.id]);

    alice.logout().await;
}

#[tokio::test]
async fn read_through_fetch_also_marks_read_for_a_connected_reader() {
    let (service, registry, url) = start_server().await;

    service
        .send_message(NewMessage {
            sender_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
            content: "unread until opened".to_string(),
            message_type: MessageType::Text,
        })
        .await
        .unwrap();

    let bob = connect_client(&service, &registry, &url, "bob").await;

    // Cold cache: get_messages falls through to the network, which runs the
    // same read-receipt pass the REST endpoint would.
    let conversation = bob.get_messages("alice").await;
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].status, MessageStatus::Read);

    // The authoritative set also landed in the cache.
    let cached = bob.cache().get_cached_messages("bob", "alice").await;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].status, MessageStatus::Read);

    bob.logout().await;
}
