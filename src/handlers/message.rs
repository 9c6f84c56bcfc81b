use super::traits::FrameHandler;
use crate::client::SyncClient;
use crate::codec::{FrameType, NormalizedFrame};
use async_trait::async_trait;
use std::sync::Arc;

/// Handler for `NEW_MESSAGE` frames.
///
/// Appends the message to the in-memory conversation (deduped by id),
/// writes through to the local cache and surfaces a notification when the
/// sender is not the active chat partner.
pub struct MessageHandler;

#[async_trait]
impl FrameHandler for MessageHandler {
    fn frame_type(&self) -> FrameType {
        FrameType::NewMessage
    }

    async fn handle(&self, client: Arc<SyncClient>, frame: NormalizedFrame) -> bool {
        let NormalizedFrame::Message(message) = frame else {
            return false;
        };
        client.ingest_message(message).await;
        true
    }
}
