use super::traits::FrameHandler;
use crate::client::SyncClient;
use crate::codec::{FrameType, NormalizedFrame};
use async_trait::async_trait;
use std::sync::Arc;

/// Handler for incoming `CONTACT_REQUEST` frames.
pub struct ContactRequestHandler;

#[async_trait]
impl FrameHandler for ContactRequestHandler {
    fn frame_type(&self) -> FrameType {
        FrameType::ContactRequest
    }

    async fn handle(&self, client: Arc<SyncClient>, frame: NormalizedFrame) -> bool {
        let NormalizedFrame::ContactRequest(request) = frame else {
            return false;
        };
        client.apply_contact_request(request).await;
        true
    }
}

/// Handler for `CONTACT_REQUEST_ACCEPTED` frames: adds the new contact
/// (deduped by id) and drops the resolved request from the pending list.
pub struct ContactAcceptedHandler;

#[async_trait]
impl FrameHandler for ContactAcceptedHandler {
    fn frame_type(&self) -> FrameType {
        FrameType::ContactRequestAccepted
    }

    async fn handle(&self, client: Arc<SyncClient>, frame: NormalizedFrame) -> bool {
        let NormalizedFrame::ContactRequestAccepted {
            contact,
            request_id,
        } = frame
        else {
            return false;
        };
        client.apply_contact_accepted(contact, request_id).await;
        true
    }
}
