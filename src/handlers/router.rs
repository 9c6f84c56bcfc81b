use super::traits::FrameHandler;
use crate::client::SyncClient;
use crate::codec::{FrameType, NormalizedFrame};
use std::collections::HashMap;
use std::sync::Arc;

/// Central router for dispatching normalized frames to their handlers.
pub struct FrameRouter {
    /// Map of frame type -> handler for fast lookups
    handlers: HashMap<FrameType, Arc<dyn FrameHandler>>,
}

impl FrameRouter {
    /// Create a new empty router.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for its frame type.
    ///
    /// # Panics
    /// Panics if a handler is already registered for the same frame type to
    /// prevent accidental overwrites during initialization.
    pub fn register(&mut self, handler: Arc<dyn FrameHandler>) {
        let frame_type = handler.frame_type();
        if self.handlers.insert(frame_type, handler).is_some() {
            panic!(
                "Handler for frame type '{}' already registered",
                frame_type.canonical()
            );
        }
    }

    /// Dispatch a frame to its handler.
    ///
    /// Returns `true` if a handler was found and processed the frame,
    /// `false` for frame types nothing is registered for.
    pub async fn dispatch(&self, client: Arc<SyncClient>, frame: NormalizedFrame) -> bool {
        let Some(frame_type) = frame.frame_type() else {
            return false;
        };
        if let Some(handler) = self.handlers.get(&frame_type) {
            handler.handle(client, frame).await
        } else {
            false
        }
    }

    /// Get the number of registered handlers (useful for testing).
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for FrameRouter {
    fn default() -> Self {
        Self::new()
    }
}
