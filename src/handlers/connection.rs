use super::traits::FrameHandler;
use crate::client::SyncClient;
use crate::codec::{FrameType, NormalizedFrame};
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// Handler for `CONNECTION` acknowledgement frames.
///
/// The server sends one after registering the socket. It carries no state
/// we don't already have, so we just log it at DEBUG level.
pub struct ConnectionHandler;

#[async_trait]
impl FrameHandler for ConnectionHandler {
    fn frame_type(&self) -> FrameType {
        FrameType::Connection
    }

    async fn handle(&self, _client: Arc<SyncClient>, frame: NormalizedFrame) -> bool {
        let NormalizedFrame::Connection { user_id } = frame else {
            return false;
        };
        debug!(target: "Client", "Received connection ack for {}", user_id.as_deref().unwrap_or("unknown"));
        true
    }
}
