use crate::store::error::{Result, StoreError};
use crate::store::traits::Store;
use crate::types::contact::{Contact, ContactRequest};
use crate::types::message::{Message, MessageStatus, NewMessage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// In-process store backend. Strongly consistent by construction; used by
/// the demo binary and every test.
pub struct MemoryStore {
    users: Mutex<HashMap<String, Contact>>,
    messages: Mutex<HashMap<String, Message>>,
    contacts: Mutex<HashMap<String, Vec<Contact>>>,
    requests: Mutex<HashMap<String, ContactRequest>>,
    unique_id: String,
    id_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            contacts: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            unique_id: format!("{:08x}", rand::random::<u32>()),
            id_counter: AtomicU64::new(0),
        }
    }

    fn next_id(&self, kind: &str) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{kind}-{}-{n}", self.unique_id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        let now = Utc::now();
        let message = Message {
            id: self.next_id("msg"),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            message_type: new.message_type,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        };
        self.messages
            .lock()
            .await
            .insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn get_messages_by_users(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>> {
        let messages = self.messages.lock().await;
        let mut conversation: Vec<Message> = messages
            .values()
            .filter(|m| {
                (m.sender_id == user_a && m.receiver_id == user_b)
                    || (m.sender_id == user_b && m.receiver_id == user_a)
            })
            .cloned()
            .collect();
        conversation.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(conversation)
    }

    async fn update_message_status(
        &self,
        message_ids: &[String],
        status: MessageStatus,
    ) -> Result<Vec<Message>> {
        let mut messages = self.messages.lock().await;
        let mut updated = Vec::new();
        for id in message_ids {
            if let Some(message) = messages.get_mut(id)
                && message.promote_status(status)
            {
                updated.push(message.clone());
            }
        }
        Ok(updated)
    }

    async fn register_user(&self, user: Contact) -> Result<()> {
        self.users.lock().await.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<Contact>> {
        Ok(self.users.lock().await.get(user_id).cloned())
    }

    async fn find_user_by_phone(&self, phone_number: &str) -> Result<Option<Contact>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.phone_number == phone_number)
            .cloned())
    }

    async fn get_contacts(&self, user_id: &str) -> Result<Vec<Contact>> {
        Ok(self
            .contacts
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_contact(&self, user_id: &str, contact: Contact) -> Result<()> {
        let mut contacts = self.contacts.lock().await;
        let list = contacts.entry(user_id.to_string()).or_default();
        if !list.iter().any(|c| c.id == contact.id) {
            list.push(contact);
        }
        Ok(())
    }

    async fn create_contact_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<ContactRequest> {
        let mut requests = self.requests.lock().await;
        if requests
            .values()
            .any(|r| r.sender_id == sender_id && r.receiver_id == receiver_id)
        {
            return Err(StoreError::Conflict(format!(
                "contact request from {sender_id} to {receiver_id} already pending"
            )));
        }
        let sender = self.users.lock().await.get(sender_id).cloned();
        let request = ContactRequest {
            id: self.next_id("req"),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            sender,
            created_at: Utc::now(),
        };
        requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn get_contact_request(&self, request_id: &str) -> Result<Option<ContactRequest>> {
        Ok(self.requests.lock().await.get(request_id).cloned())
    }

    async fn get_contact_requests(&self, receiver_id: &str) -> Result<Vec<ContactRequest>> {
        let requests = self.requests.lock().await;
        let mut pending: Vec<ContactRequest> = requests
            .values()
            .filter(|r| r.receiver_id == receiver_id)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn delete_contact_request(&self, request_id: &str) -> Result<()> {
        match self.requests.lock().await.remove(request_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!(
                "contact request {request_id}"
            ))),
        }
    }
}
