use crate::store::error::Result;
use crate::types::contact::{Contact, ContactRequest};
use crate::types::message::{Message, MessageStatus, NewMessage};
use async_trait::async_trait;

/// The durable persistence capability behind the REST write path.
///
/// Assumed strongly consistent enough that a read immediately after a write
/// observes the write. Store failures propagate to the caller of the
/// triggering domain operation; the real-time layer never masks them.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    /// All messages between the two users, both directions, ascending by
    /// creation time.
    async fn get_messages_by_users(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>>;

    /// Promotes the listed messages to `status`. Transitions are forward
    /// only; a message already past `status` is left untouched. Returns the
    /// messages that actually changed.
    async fn update_message_status(
        &self,
        message_ids: &[String],
        status: MessageStatus,
    ) -> Result<Vec<Message>>;

    async fn register_user(&self, user: Contact) -> Result<()>;
    async fn get_user(&self, user_id: &str) -> Result<Option<Contact>>;
    async fn find_user_by_phone(&self, phone_number: &str) -> Result<Option<Contact>>;

    async fn get_contacts(&self, user_id: &str) -> Result<Vec<Contact>>;
    async fn add_contact(&self, user_id: &str, contact: Contact) -> Result<()>;

    async fn create_contact_request(
        &self,
        sender_id: &str,
        receiver_id: &str,
    ) -> Result<ContactRequest>;
    async fn get_contact_request(&self, request_id: &str) -> Result<Option<ContactRequest>>;
    async fn get_contact_requests(&self, receiver_id: &str) -> Result<Vec<ContactRequest>>;
    async fn delete_contact_request(&self, request_id: &str) -> Result<()>;
}
