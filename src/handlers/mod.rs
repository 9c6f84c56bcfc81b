mod chatstate;
mod connection;
mod contact;
mod message;
mod receipt;
mod router;
mod traits;

pub use router::FrameRouter;
pub use traits::FrameHandler;

use std::sync::Arc;

/// Builds the router with every frame handler the sync engine dispatches
/// to. PING/PONG are transport-level concerns handled by the client itself
/// and deliberately have no handler here.
pub fn build_frame_router() -> FrameRouter {
    let mut router = FrameRouter::new();
    router.register(Arc::new(message::MessageHandler));
    router.register(Arc::new(receipt::ReceiptHandler));
    router.register(Arc::new(contact::ContactRequestHandler));
    router.register(Arc::new(contact::ContactAcceptedHandler));
    router.register(Arc::new(chatstate::TypingHandler));
    router.register(Arc::new(connection::ConnectionHandler));
    router
}
