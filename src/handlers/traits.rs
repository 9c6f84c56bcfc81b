use crate::client::SyncClient;
use crate::codec::{FrameType, NormalizedFrame};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for handling one type of normalized frame received over the
/// socket.
///
/// Each handler is responsible for a single frame type (message, read
/// receipt, contact request, ...). This keeps the per-type state updates
/// out of the client's dispatch loop and makes new frame types additive.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// The frame type this handler is responsible for.
    fn frame_type(&self) -> FrameType;

    /// Asynchronously handle the incoming frame.
    ///
    /// Returns `true` if the frame was processed. Handlers must swallow
    /// their own failures; nothing they do may close the socket.
    async fn handle(&self, client: Arc<SyncClient>, frame: NormalizedFrame) -> bool;
}
