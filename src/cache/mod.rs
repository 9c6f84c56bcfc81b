pub mod memory;

pub use memory::MemoryCache;

use crate::types::contact::Contact;
use crate::types::message::Message;
use async_trait::async_trait;

/// Minimum query length for substring search. Shorter queries return empty
/// results, not an error.
pub const MIN_SEARCH_QUERY_LEN: usize = 2;

/// A search result: the matching message plus the cached card of the
/// conversation partner, when known.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub message: Message,
    pub contact: Option<Contact>,
}

/// Client-resident message/contact cache for offline-first reads and
/// instant substring search.
///
/// The cache is a performance layer, never a correctness dependency: every
/// operation degrades gracefully (empty results, silent no-op) instead of
/// surfacing storage errors to the UI. The session owns the lifecycle —
/// opened on login, [`LocalCache::clear`]ed on logout. Any storage engine
/// (in-memory, embedded KV, SQLite) can sit behind this trait.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Upserts a batch of messages for one conversation, attaching the
    /// derived partner id (the cache never stores a message under the
    /// owning user's own id as the partner).
    async fn cache_messages(&self, user_id: &str, contact_id: &str, messages: &[Message]);

    /// The cached conversation, ascending by creation time, no duplicate
    /// ids.
    async fn get_cached_messages(&self, user_id: &str, contact_id: &str) -> Vec<Message>;

    /// Single-message upsert used on send and receive.
    async fn add_message_to_cache(&self, user_id: &str, message: &Message);

    /// Replaces a whole conversation with the authoritative server set.
    /// Used by the read-through refresh: the server list wins outright,
    /// never a field-by-field merge.
    async fn replace_conversation(&self, user_id: &str, contact_id: &str, messages: &[Message]);

    /// Case-insensitive substring search over the user's message content,
    /// newest first. Queries shorter than [`MIN_SEARCH_QUERY_LEN`] return
    /// empty.
    async fn search_cached_messages(&self, user_id: &str, query: &str) -> Vec<SearchHit>;

    async fn cache_contacts(&self, contacts: &[Contact]);
    async fn get_cached_contact(&self, contact_id: &str) -> Option<Contact>;

    /// Wipes all stores. Called on logout.
    async fn clear(&self);
}
