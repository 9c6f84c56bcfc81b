pub mod contact;
pub mod events;
pub mod message;

pub use contact::{Contact, ContactRequest};
pub use message::{CachedMessage, Message, MessageStatus, MessageType, NewMessage};
