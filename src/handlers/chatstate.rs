use super::traits::FrameHandler;
use crate::client::SyncClient;
use crate::codec::{FrameType, NormalizedFrame};
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

/// Handler for `TYPING` frames (typing indicators).
///
/// Updates the peer's typing flag; a transition to `false` schedules the
/// entry's expiry so a vanished peer never sticks around as "typing".
pub struct TypingHandler;

#[async_trait]
impl FrameHandler for TypingHandler {
    fn frame_type(&self) -> FrameType {
        FrameType::Typing
    }

    async fn handle(&self, client: Arc<SyncClient>, frame: NormalizedFrame) -> bool {
        let NormalizedFrame::Typing {
            sender_id,
            is_typing,
            ..
        } = frame
        else {
            return false;
        };
        let Some(sender_id) = sender_id else {
            warn!(target: "Client", "Dropping typing frame without sender");
            return true;
        };
        client.apply_peer_typing(sender_id, is_typing).await;
        true
    }
}
