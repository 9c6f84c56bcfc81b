use crate::client::SyncClient;
use crate::codec::Frame;
use crate::types::events::TypingUpdate;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;

/// How long a "typing" state may outlive the sender's last keystroke
/// before an automatic `isTyping: false` goes out.
pub const TYPING_AUTO_STOP: Duration = Duration::from_secs(3);

/// How long a peer's `false` entry lingers before it is removed from the
/// typing map.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(1500);

impl SyncClient {
    /// Marks the conversation the user is currently looking at. Messages
    /// from this partner skip the notification event, and typing frames go
    /// to them.
    pub async fn set_active_chat(&self, contact_id: Option<&str>) {
        self.conversation.lock().await.active_chat = contact_id.map(str::to_string);
    }

    pub async fn is_peer_typing(&self, user_id: &str) -> bool {
        self.conversation
            .lock()
            .await
            .peer_typing
            .get(user_id)
            .map(|(typing, _)| *typing)
            .unwrap_or(false)
    }

    /// Sender-side typing debounce.
    ///
    /// A keystroke burst collapses into one `true` frame plus an armed
    /// auto-stop: if no further keystroke renews it within
    /// [`TYPING_AUTO_STOP`], a `false` frame goes out by itself, so the
    /// recipient never sees a stale "typing" hang around. An explicit
    /// `false` (input cleared) cancels the timer and sends immediately.
    /// No-op without an open socket or an active conversation partner.
    pub async fn send_typing_status(self: &Arc<Self>, is_typing: bool) {
        if !self.is_connected() {
            return;
        }
        let Some(partner) = self.conversation.lock().await.active_chat.clone() else {
            return;
        };

        // Cancel-before-reschedule: at most one auto-stop timer exists.
        if let Some(task) = self.typing_stop_task.lock().await.take() {
            task.abort();
        }

        let frame = Frame::typing(self.user_id(), &partner, is_typing);
        if let Err(e) = self.send_frame(&frame).await {
            warn!(target: "Client", "Failed to send typing status: {e}");
            return;
        }

        if is_typing {
            let client = self.clone();
            let handle = tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(TYPING_AUTO_STOP) => {
                        let frame = Frame::typing(client.user_id(), &partner, false);
                        if let Err(e) = client.send_frame(&frame).await {
                            debug!(target: "Client", "Typing auto-stop not sent: {e}");
                        }
                    }
                    _ = client.shutdown_notifier.notified() => {}
                }
            });
            *self.typing_stop_task.lock().await = Some(handle);
        }
    }

    /// Receiver side: records the peer's typing flag and, on `false`,
    /// schedules the entry's removal. The sequence tag makes the delayed
    /// removal a no-op if the flag was overwritten in the meantime.
    pub(crate) async fn apply_peer_typing(self: &Arc<Self>, sender_id: String, is_typing: bool) {
        let seq = self.typing_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.conversation
            .lock()
            .await
            .peer_typing
            .insert(sender_id.clone(), (is_typing, seq));

        let _ = self.event_bus.typing.send(Arc::new(TypingUpdate {
            user_id: sender_id.clone(),
            is_typing,
        }));

        if !is_typing {
            let client = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sleep(TYPING_EXPIRY) => {
                        let mut convo = client.conversation.lock().await;
                        if let Some((typing, tag)) = convo.peer_typing.get(&sender_id)
                            && *tag == seq
                            && !*typing
                        {
                            convo.peer_typing.remove(&sender_id);
                        }
                    }
                    _ = client.shutdown_notifier.notified() => {}
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_utils::{force_connected, test_client};
    use crate::codec::{NormalizedFrame, decode_frame, normalize};

    async fn sent_typing_flags(tc: &crate::client::test_utils::TestClient) -> Vec<bool> {
        let transport = tc.factory.transport(0);
        let frames = transport.sent_frames.lock().await;
        frames
            .iter()
            .filter_map(|bytes| {
                let raw = decode_frame(bytes).ok()?;
                match normalize(&raw).ok()? {
                    NormalizedFrame::Typing { is_typing, .. } => Some(is_typing),
                    _ => None,
                }
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn auto_stop_fires_after_inactivity() {
        let tc = test_client("alice");
        force_connected(&tc).await;
        tc.client.set_active_chat(Some("bob")).await;

        tc.client.send_typing_status(true).await;
        assert_eq!(sent_typing_flags(&tc).await, vec![true]);

        tokio::time::sleep(TYPING_AUTO_STOP + Duration::from_millis(100)).await;
        assert_eq!(sent_typing_flags(&tc).await, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_keystrokes_defer_the_auto_stop() {
        let tc = test_client("alice");
        force_connected(&tc).await;
        tc.client.set_active_chat(Some("bob")).await;

        tc.client.send_typing_status(true).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        tc.client.send_typing_status(true).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        // 4s after the first keystroke but only 2s after the last: the
        // auto-stop must not have fired yet.
        assert_eq!(sent_typing_flags(&tc).await, vec![true, true]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sent_typing_flags(&tc).await, vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_the_timer() {
        let tc = test_client("alice");
        force_connected(&tc).await;
        tc.client.set_active_chat(Some("bob")).await;

        tc.client.send_typing_status(true).await;
        tc.client.send_typing_status(false).await;
        assert_eq!(sent_typing_flags(&tc).await, vec![true, false]);

        // The aborted timer must not add a second `false`.
        tokio::time::sleep(TYPING_AUTO_STOP * 2).await;
        assert_eq!(sent_typing_flags(&tc).await, vec![true, false]);
    }

    #[tokio::test]
    async fn typing_is_a_noop_without_socket_or_partner() {
        let tc = test_client("alice");
        // Not connected at all.
        tc.client.send_typing_status(true).await;
        assert_eq!(tc.factory.created(), 0);

        // Connected but no active conversation.
        force_connected(&tc).await;
        tc.client.send_typing_status(true).await;
        assert_eq!(tc.factory.transport(0).sent_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_entry_expires_after_false() {
        let tc = test_client("bob");
        tc.client
            .apply_peer_typing("alice".to_string(), true)
            .await;
        assert!(tc.client.is_peer_typing("alice").await);

        tc.client
            .apply_peer_typing("alice".to_string(), false)
            .await;
        assert!(!tc.client.is_peer_typing("alice").await);

        tokio::time::sleep(TYPING_EXPIRY + Duration::from_millis(100)).await;
        let convo = tc.client.conversation.lock().await;
        assert!(!convo.peer_typing.contains_key("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_cancelled_by_a_newer_true() {
        let tc = test_client("bob");
        tc.client
            .apply_peer_typing("alice".to_string(), false)
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        tc.client
            .apply_peer_typing("alice".to_string(), true)
            .await;

        // The expiry armed for the earlier `false` must not remove the
        // fresher `true`.
        tokio::time::sleep(TYPING_EXPIRY).await;
        assert!(tc.client.is_peer_typing("alice").await);
    }
}
