use crate::client::SyncClient;
use crate::codec::Frame;
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;

const KEEP_ALIVE_INTERVAL_MIN: Duration = Duration::from_secs(20);
const KEEP_ALIVE_INTERVAL_MAX: Duration = Duration::from_secs(30);

impl SyncClient {
    /// The heartbeat loop for one connection. Spawned on socket open;
    /// exits when the socket dies, the session shuts down, or a newer
    /// connection supersedes `generation`.
    ///
    /// Each tick first checks whether the previous PING was ever answered.
    /// A missing PONG means the socket is silently dead, so the transport
    /// is torn down and the run loop's reconnect takes over.
    pub(crate) async fn keepalive_loop(self: Arc<Self>, generation: u64) {
        loop {
            let interval_ms = rand::rng().random_range(
                KEEP_ALIVE_INTERVAL_MIN.as_millis() as u64..=KEEP_ALIVE_INTERVAL_MAX.as_millis() as u64,
            );

            tokio::select! {
                _ = sleep(Duration::from_millis(interval_ms)) => {
                    if self.connection_generation.load(Ordering::SeqCst) != generation {
                        debug!(target: "Client/Keepalive", "Connection superseded, exiting keepalive loop.");
                        return;
                    }
                    if !self.is_connected() {
                        debug!(target: "Client/Keepalive", "Not connected, exiting keepalive loop.");
                        return;
                    }

                    if self.awaiting_pong.swap(true, Ordering::SeqCst) {
                        warn!(target: "Client/Keepalive", "No pong since last ping, forcing reconnect.");
                        self.force_disconnect().await;
                        return;
                    }

                    debug!(target: "Client/Keepalive", "Sending heartbeat ping");
                    if let Err(e) = self.send_frame(&Frame::ping()).await {
                        warn!(target: "Client/Keepalive", "Heartbeat ping failed: {e}");
                        self.force_disconnect().await;
                        return;
                    }
                },
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Keepalive", "Shutdown signaled, exiting keepalive loop.");
                    return;
                }
            }
        }
    }

    async fn force_disconnect(&self) {
        if let Some(transport) = self.transport.lock().await.clone() {
            transport.disconnect().await;
        }
    }
}
