use super::{LocalCache, MIN_SEARCH_QUERY_LEN, SearchHit};
use crate::types::contact::Contact;
use crate::types::message::{CachedMessage, Message};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory [`LocalCache`]. Message entries are keyed by
/// `(owner, message id)` so an upsert of the same message is idempotent.
pub struct MemoryCache {
    messages: Mutex<HashMap<(String, String), CachedMessage>>,
    contacts: Mutex<HashMap<String, Contact>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            contacts: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_conversation(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn cache_messages(&self, user_id: &str, _contact_id: &str, messages: &[Message]) {
        let mut store = self.messages.lock().await;
        for message in messages {
            let cached = CachedMessage::derive(user_id, message.clone());
            store.insert((user_id.to_string(), message.id.clone()), cached);
        }
    }

    async fn get_cached_messages(&self, user_id: &str, contact_id: &str) -> Vec<Message> {
        let store = self.messages.lock().await;
        let mut conversation: Vec<Message> = store
            .values()
            .filter(|c| c.user_id == user_id && c.contact_id == contact_id)
            .map(|c| c.message.clone())
            .collect();
        sort_conversation(&mut conversation);
        conversation
    }

    async fn add_message_to_cache(&self, user_id: &str, message: &Message) {
        let cached = CachedMessage::derive(user_id, message.clone());
        self.messages
            .lock()
            .await
            .insert((user_id.to_string(), message.id.clone()), cached);
    }

    async fn replace_conversation(&self, user_id: &str, contact_id: &str, messages: &[Message]) {
        let mut store = self.messages.lock().await;
        store.retain(|_, c| !(c.user_id == user_id && c.contact_id == contact_id));
        for message in messages {
            let cached = CachedMessage::derive(user_id, message.clone());
            store.insert((user_id.to_string(), message.id.clone()), cached);
        }
    }

    async fn search_cached_messages(&self, user_id: &str, query: &str) -> Vec<SearchHit> {
        if query.chars().count() < MIN_SEARCH_QUERY_LEN {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        let store = self.messages.lock().await;
        let contacts = self.contacts.lock().await;

        let mut matches: Vec<&CachedMessage> = store
            .values()
            .filter(|c| c.user_id == user_id && c.message.content.to_lowercase().contains(&needle))
            .collect();
        // Newest first.
        matches.sort_by(|a, b| {
            b.message
                .created_at
                .cmp(&a.message.created_at)
                .then(b.message.id.cmp(&a.message.id))
        });
        matches
            .into_iter()
            .map(|c| SearchHit {
                message: c.message.clone(),
                contact: contacts.get(&c.contact_id).cloned(),
            })
            .collect()
    }

    async fn cache_contacts(&self, contacts: &[Contact]) {
        let mut store = self.contacts.lock().await;
        for contact in contacts {
            store.insert(contact.id.clone(), contact.clone());
        }
    }

    async fn get_cached_contact(&self, contact_id: &str) -> Option<Contact> {
        self.contacts.lock().await.get(contact_id).cloned()
    }

    async fn clear(&self) {
        self.messages.lock().await.clear();
        self.contacts.lock().await.clear();
    }
}
