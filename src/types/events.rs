use crate::types::contact::{Contact, ContactRequest};
use crate::types::message::Message;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Socket came up and the session is live.
#[derive(Debug, Clone)]
pub struct Connected;

/// Socket went down. `retrying` is false only on explicit logout.
#[derive(Debug, Clone)]
pub struct Disconnected {
    pub retrying: bool,
}

/// A batch of our sent messages was read by the counterpart.
#[derive(Debug, Clone)]
pub struct MessagesRead {
    pub read_by: Option<String>,
    pub message_ids: Vec<String>,
}

/// A peer started or stopped typing in our direction.
#[derive(Debug, Clone)]
pub struct TypingUpdate {
    pub user_id: String,
    pub is_typing: bool,
}

/// Something happened outside the active conversation that the UI should
/// surface (new message from another chat, incoming contact request).
#[derive(Debug, Clone)]
pub struct Notification {
    pub from_user_id: String,
    pub body: String,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event kind.
        /// UI layers subscribe to the channels they care about; slow or
        /// absent subscribers never block frame handling.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Connection lifecycle
    (connected, Arc<Connected>),
    (disconnected, Arc<Disconnected>),

    // Conversation events
    (message, Arc<Message>),
    (messages_read, Arc<MessagesRead>),
    (typing, Arc<TypingUpdate>),

    // Contact events
    (contact_request, Arc<ContactRequest>),
    (contact_request_accepted, Arc<Contact>),

    // UI notifications
    (notification, Arc<Notification>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
