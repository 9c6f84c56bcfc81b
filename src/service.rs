use crate::client::ChatApi;
use crate::codec::Frame;
use crate::registry::Registry;
use crate::store::error::{Result, StoreError};
use crate::store::traits::Store;
use crate::types::contact::{Contact, ContactRequest};
use crate::types::message::{Message, MessageStatus, NewMessage};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Domain operations behind the REST layer, wired to the push-trigger
/// contract: every store mutation that affects a counterpart user's view
/// attempts exactly one [`Registry::route`] with the corresponding frame.
///
/// Store failures propagate to the caller; route failures never do — live
/// delivery is best-effort, the store is the durable record, and an
/// offline counterpart reconciles on their next resync or conversation
/// fetch.
pub struct ChatService {
    store: Arc<dyn Store>,
    registry: Arc<dyn Registry>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>, registry: Arc<dyn Registry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Persists a message, then pushes it to the receiver's live socket.
    /// A reached recipient promotes the message to delivered.
    pub async fn send_message(&self, new: NewMessage) -> Result<Message> {
        let mut message = self.store.create_message(new).await?;

        let delivered = self
            .registry
            .route(&message.receiver_id, &Frame::new_message(&message))
            .await;
        if delivered {
            match self
                .store
                .update_message_status(std::slice::from_ref(&message.id), MessageStatus::Delivered)
                .await
            {
                Ok(mut updated) => {
                    if let Some(promoted) = updated.pop() {
                        message = promoted;
                    }
                }
                // The send itself already succeeded; a failed delivery mark
                // is repaired by the next read-receipt pass.
                Err(e) => warn!(target: "Service", "Failed to mark {} delivered: {e}", message.id),
            }
        } else {
            debug!(target: "Service", "Receiver {} offline, message {} stays queued in store", message.receiver_id, message.id);
        }
        Ok(message)
    }

    /// Conversation fetch for `user_id`. Reading a conversation is what
    /// marks the counterpart's messages read, so this also promotes every
    /// unread incoming message and broadcasts one `MESSAGES_READ` frame per
    /// distinct sender with the batch of newly-read ids.
    pub async fn get_messages(&self, user_id: &str, contact_id: &str) -> Result<Vec<Message>> {
        let mut messages = self.store.get_messages_by_users(user_id, contact_id).await?;

        let unread: Vec<String> = messages
            .iter()
            .filter(|m| m.receiver_id == user_id && m.status != MessageStatus::Read)
            .map(|m| m.id.clone())
            .collect();
        if unread.is_empty() {
            return Ok(messages);
        }

        let updated = self
            .store
            .update_message_status(&unread, MessageStatus::Read)
            .await?;

        let mut by_sender: HashMap<String, Vec<String>> = HashMap::new();
        for message in &updated {
            by_sender
                .entry(message.sender_id.clone())
                .or_default()
                .push(message.id.clone());
        }
        for (sender_id, message_ids) in by_sender {
            self.registry
                .route(&sender_id, &Frame::messages_read(user_id, &message_ids))
                .await;
        }

        for message in messages.iter_mut() {
            if unread.contains(&message.id) {
                message.promote_status(MessageStatus::Read);
            }
        }
        Ok(messages)
    }

    pub async fn get_contacts(&self, user_id: &str) -> Result<Vec<Contact>> {
        self.store.get_contacts(user_id).await
    }

    pub async fn get_pending_requests(&self, user_id: &str) -> Result<Vec<ContactRequest>> {
        self.store.get_contact_requests(user_id).await
    }

    /// Creates a pending contact request and pushes it to the receiver.
    pub async fn send_contact_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<ContactRequest> {
        let request = self
            .store
            .create_contact_request(sender_id, receiver_id)
            .await?;
        self.registry
            .route(receiver_id, &Frame::contact_request(&request))
            .await;
        Ok(request)
    }

    /// Resolves a pending request: both parties become contacts of each
    /// other, and the original sender is told their request was accepted.
    /// Returns the accepting user's new contact.
    pub async fn accept_contact_request(&self, request_id: &str) -> Result<Contact> {
        let request = self
            .store
            .get_contact_request(request_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("contact request {request_id}")))?;
        self.store.delete_contact_request(request_id).await?;

        let sender_card = self
            .store
            .get_user(&request.sender_id)
            .await?
            .unwrap_or_else(|| placeholder_card(&request.sender_id));
        let receiver_card = self
            .store
            .get_user(&request.receiver_id)
            .await?
            .unwrap_or_else(|| placeholder_card(&request.receiver_id));

        self.store
            .add_contact(&request.receiver_id, sender_card.clone())
            .await?;
        self.store
            .add_contact(&request.sender_id, receiver_card.clone())
            .await?;

        self.registry
            .route(
                &request.sender_id,
                &Frame::contact_request_accepted(&receiver_card, Some(request_id)),
            )
            .await;
        Ok(sender_card)
    }
}

/// A user known only by id (no profile on record yet).
fn placeholder_card(user_id: &str) -> Contact {
    Contact {
        id: user_id.to_string(),
        name: user_id.to_string(),
        phone_number: String::new(),
        avatar_url: None,
    }
}

/// [`ChatApi`] served directly by the in-process service, for demos and
/// tests that don't stand up a real REST layer. Fetching a conversation
/// through it triggers the same read-receipt pass as the HTTP endpoint
/// would.
pub struct InProcessApi {
    service: Arc<ChatService>,
}

impl InProcessApi {
    pub fn new(service: Arc<ChatService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl ChatApi for InProcessApi {
    async fn fetch_messages(
        &self,
        user_id: &str,
        contact_id: &str,
    ) -> anyhow::Result<Vec<Message>> {
        Ok(self.service.get_messages(user_id, contact_id).await?)
    }

    async fn fetch_contacts(&self, user_id: &str) -> anyhow::Result<Vec<Contact>> {
        Ok(self.service.get_contacts(user_id).await?)
    }

    async fn fetch_pending_requests(&self, user_id: &str) -> anyhow::Result<Vec<ContactRequest>> {
        Ok(self.service.get_pending_requests(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncodedFrame, NormalizedFrame, decode_frame, normalize};
    use crate::registry::ConnectionRegistry;
    use crate::registry::tests::FakeSink;
    use crate::store::memory::MemoryStore;
    use crate::types::message::MessageType;

    fn service() -> (ChatService, Arc<ConnectionRegistry>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        (
            ChatService::new(store.clone(), registry.clone()),
            registry,
            store,
        )
    }

    fn new_message(sender: &str, receiver: &str, content: &str) -> NewMessage {
        NewMessage {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
        }
    }

    async fn normalized_frames(sink: &FakeSink) -> Vec<NormalizedFrame> {
        let frames = sink.sent.lock().await;
        frames
            .iter()
            .map(|f| {
                let bytes = match f {
                    EncodedFrame::Text(t) => t.as_bytes().to_vec(),
                    EncodedFrame::Binary(b) => b.clone(),
                };
                normalize(&decode_frame(&bytes).unwrap()).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn offline_send_still_succeeds_against_the_store() {
        let (service, _registry, store) = service();

        let message = service
            .send_message(new_message("alice", "bob", "hi"))
            .await
            .unwrap();

        assert_eq!(message.status, MessageStatus::Sent);
        let stored = store.get_messages_by_users("alice", "bob").await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn online_send_routes_one_frame_and_marks_delivered() {
        let (service, registry, _store) = service();
        let sink = FakeSink::new();
        registry.register("bob", sink.clone()).await;

        let message = service
            .send_message(new_message("alice", "bob", "hi"))
            .await
            .unwrap();

        assert_eq!(message.status, MessageStatus::Delivered);
        let frames = normalized_frames(&sink).await;
        assert_eq!(frames.len(), 1);
        let NormalizedFrame::Message(pushed) = &frames[0] else {
            panic!("expected a message frame");
        };
        assert_eq!(pushed.content, "hi");
        assert_eq!(pushed.sender_id, "alice");
    }

    #[tokio::test]
    async fn broken_socket_does_not_fail_the_send() {
        let (service, registry, _store) = service();
        registry.register("bob", FakeSink::failing()).await;

        let message = service
            .send_message(new_message("alice", "bob", "hi"))
            .await
            .unwrap();
        // Live delivery failed, so no delivered promotion either.
        assert_eq!(message.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn reading_a_conversation_promotes_and_broadcasts_one_batched_frame() {
        let (service, registry, _store) = service();
        service
            .send_message(new_message("alice", "bob", "one"))
            .await
            .unwrap();
        service
            .send_message(new_message("alice", "bob", "two"))
            .await
            .unwrap();

        // Alice comes online before Bob reads.
        let alice_sink = FakeSink::new();
        registry.register("alice", alice_sink.clone()).await;

        let conversation = service.get_messages("bob", "alice").await.unwrap();
        assert!(conversation.iter().all(|m| m.status == MessageStatus::Read));

        let frames = normalized_frames(&alice_sink).await;
        assert_eq!(frames.len(), 1, "ids are batched into a single frame");
        let NormalizedFrame::MessagesRead {
            read_by,
            message_ids,
        } = &frames[0]
        else {
            panic!("expected a read frame");
        };
        assert_eq!(read_by.as_deref(), Some("bob"));
        assert_eq!(message_ids.len(), 2);

        // A second read finds nothing unread and broadcasts nothing new.
        service.get_messages("bob", "alice").await.unwrap();
        assert_eq!(normalized_frames(&alice_sink).await.len(), 1);
    }

    #[tokio::test]
    async fn accept_flow_connects_both_sides_and_notifies_the_requester() {
        let (service, registry, store) = service();
        store
            .register_user(Contact {
                id: "alice".to_string(),
                name: "Alice".to_string(),
                phone_number: "+1111".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap();
        store
            .register_user(Contact {
                id: "bob".to_string(),
                name: "Bob".to_string(),
                phone_number: "+2222".to_string(),
                avatar_url: None,
            })
            .await
            .unwrap();

        let alice_sink = FakeSink::new();
        registry.register("alice", alice_sink.clone()).await;

        let request = service.send_contact_request("alice", "bob").await.unwrap();
        let new_contact = service.accept_contact_request(&request.id).await.unwrap();
        assert_eq!(new_contact.id, "alice");

        assert_eq!(service.get_contacts("bob").await.unwrap().len(), 1);
        assert_eq!(service.get_contacts("alice").await.unwrap().len(), 1);
        assert!(service.get_pending_requests("bob").await.unwrap().is_empty());

        let frames = normalized_frames(&alice_sink).await;
        let NormalizedFrame::ContactRequestAccepted {
            contact,
            request_id,
        } = frames.last().unwrap()
        else {
            panic!("expected an accepted frame");
        };
        assert_eq!(contact.id, "bob");
        assert_eq!(request_id.as_deref(), Some(request.id.as_str()));
    }

    #[tokio::test]
    async fn accepting_a_missing_request_is_not_found() {
        let (service, _registry, _store) = service();
        assert!(matches!(
            service.accept_contact_request("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
