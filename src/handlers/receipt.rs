use super::traits::FrameHandler;
use crate::client::SyncClient;
use crate::codec::{FrameType, NormalizedFrame};
use async_trait::async_trait;
use std::sync::Arc;

/// Handler for `MESSAGES_READ` frames: promotes the listed messages to
/// read. The transition is one-directional; a frame can never demote a
/// message back to delivered or sent.
pub struct ReceiptHandler;

#[async_trait]
impl FrameHandler for ReceiptHandler {
    fn frame_type(&self) -> FrameType {
        FrameType::MessagesRead
    }

    async fn handle(&self, client: Arc<SyncClient>, frame: NormalizedFrame) -> bool {
        let NormalizedFrame::MessagesRead {
            read_by,
            message_ids,
        } = frame
        else {
            return false;
        };
        client.apply_read_receipt(read_by, message_ids).await;
        true
    }
}
