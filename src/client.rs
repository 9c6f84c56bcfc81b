use crate::cache::LocalCache;
use crate::codec::{self, Frame, NormalizedFrame};
use crate::config::ClientConfig;
use crate::handlers::{FrameRouter, build_frame_router};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::contact::{Contact, ContactRequest};
use crate::types::events::{Connected, Disconnected, EventBus, MessagesRead, Notification};
use crate::types::message::{Message, MessageStatus};
use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Connection lifecycle of the sync engine. There is no terminal state
/// while the session is authenticated; the engine keeps cycling through
/// `ReconnectWait` until an explicit logout lands it in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ReconnectWait,
}

/// The REST read capability the engine resyncs through. Live frames keep a
/// connected client current; everything missed while offline is recovered
/// here, never through the socket layer.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_messages(&self, user_id: &str, contact_id: &str) -> Result<Vec<Message>>;
    async fn fetch_contacts(&self, user_id: &str) -> Result<Vec<Contact>>;
    async fn fetch_pending_requests(&self, user_id: &str) -> Result<Vec<ContactRequest>>;
}

/// In-memory conversational state, discarded wholesale on logout.
#[derive(Default)]
pub(crate) struct ConversationState {
    pub messages: Vec<Message>,
    pub contacts: Vec<Contact>,
    pub pending_requests: Vec<ContactRequest>,
    pub active_chat: Option<String>,
    /// Peer typing flags, tagged with a sequence number so the delayed
    /// expiry task only removes the entry it armed for.
    pub peer_typing: HashMap<String, (bool, u64)>,
}

pub(crate) fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

pub struct SyncClient {
    user_id: String,
    pub(crate) config: ClientConfig,
    transport_factory: Arc<dyn TransportFactory>,
    pub(crate) transport: Mutex<Option<Arc<dyn Transport>>>,
    pub(crate) transport_events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,

    pub(crate) state_tx: watch::Sender<ConnState>,
    state_rx: watch::Receiver<ConnState>,
    is_running: AtomicBool,
    is_connecting: AtomicBool,
    enable_auto_reconnect: AtomicBool,
    auto_reconnect_errors: AtomicU32,
    pub(crate) shutdown_notifier: Notify,

    /// Incremented on every socket open. Background loops spawned for a
    /// connection carry the generation they were born under and exit when
    /// it moves on, so a stale loop never outlives its socket.
    pub(crate) connection_generation: AtomicU64,
    pub(crate) awaiting_pong: AtomicBool,

    pub event_bus: EventBus,
    pub(crate) cache: Arc<dyn LocalCache>,
    api: Arc<dyn ChatApi>,
    router: FrameRouter,

    pub(crate) conversation: Mutex<ConversationState>,
    pub(crate) typing_seq: AtomicU64,
    pub(crate) typing_stop_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    pub fn new(
        user_id: impl Into<String>,
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        cache: Arc<dyn LocalCache>,
        api: Arc<dyn ChatApi>,
    ) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
        Arc::new(Self {
            user_id: user_id.into(),
            config,
            transport_factory,
            transport: Mutex::new(None),
            transport_events: Mutex::new(None),
            state_tx,
            state_rx,
            is_running: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            enable_auto_reconnect: AtomicBool::new(true),
            auto_reconnect_errors: AtomicU32::new(0),
            shutdown_notifier: Notify::new(),
            connection_generation: AtomicU64::new(0),
            awaiting_pong: AtomicBool::new(false),
            event_bus: EventBus::new(),
            cache,
            api,
            router: build_frame_router(),
            conversation: Mutex::new(ConversationState::default()),
            typing_seq: AtomicU64::new(0),
            typing_stop_task: Mutex::new(None),
        })
    }

    /// Convenience constructor wiring the default websocket transport to
    /// `config.server_url`.
    pub fn with_default_transport(
        user_id: impl Into<String>,
        config: ClientConfig,
        cache: Arc<dyn LocalCache>,
        api: Arc<dyn ChatApi>,
    ) -> Arc<Self> {
        let user_id = user_id.into();
        let factory = Arc::new(crate::transport::TokioWebSocketTransportFactory::new(
            config.ws_url(&user_id),
        ));
        Self::new(user_id, config, factory, cache, api)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnState::Connected
    }

    pub fn cache(&self) -> &Arc<dyn LocalCache> {
        &self.cache
    }

    /// The engine's main loop: connect, pump frames until the socket dies,
    /// then wait out the reconnect delay and try again. Exactly one
    /// reconnect schedule exists at a time; this loop owns it.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Client", "Client `run` method called while already running.");
            return;
        }
        while self.is_running.load(Ordering::Relaxed) {
            self.state_tx.send_replace(ConnState::Connecting);

            match self.connect().await {
                Err(e) => error!(target: "Client", "Failed to connect: {e}"),
                Ok(()) => {
                    self.read_frames_loop().await;
                    self.cleanup_connection_state().await;
                }
            }

            if !self.is_running.load(Ordering::Relaxed)
                || !self.enable_auto_reconnect.load(Ordering::Relaxed)
            {
                info!(target: "Client", "Auto-reconnect disabled, shutting down.");
                break;
            }

            let error_count = self.auto_reconnect_errors.fetch_add(1, Ordering::SeqCst);
            let delay = self.reconnect_delay(error_count);
            info!(
                target: "Client",
                "Will attempt to reconnect in {delay:?} (attempt {})",
                error_count + 1
            );
            self.state_tx.send_replace(ConnState::ReconnectWait);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown_notifier.notified() => break,
            }
        }
        self.is_running.store(false, Ordering::Relaxed);
        self.state_tx.send_replace(ConnState::Disconnected);
        info!(target: "Client", "Client run loop has shut down.");
    }

    fn reconnect_delay(&self, error_count: u32) -> Duration {
        let backoff = Duration::from_secs(u64::from(error_count) * 2);
        (self.config.reconnect_delay + backoff).min(self.config.max_reconnect_delay)
    }

    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let (transport, events) = self
            .transport_factory
            .create_transport()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        *self.transport.lock().await = Some(transport);
        *self.transport_events.lock().await = Some(events);
        Ok(())
    }

    pub(crate) async fn read_frames_loop(self: &Arc<Self>) {
        let Some(mut events) = self.transport_events.lock().await.take() else {
            return;
        };
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => self.on_socket_open().await,
                    Some(TransportEvent::FrameReceived(payload)) => {
                        self.handle_raw_frame(&payload).await;
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        debug!(target: "Client", "Transport disconnected");
                        break;
                    }
                },
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client", "Shutdown signaled, leaving read loop");
                    break;
                }
            }
        }
    }

    async fn on_socket_open(self: &Arc<Self>) {
        info!(target: "Client", "Socket open, session is live");
        let generation = self.connection_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.auto_reconnect_errors.store(0, Ordering::SeqCst);
        self.awaiting_pong.store(false, Ordering::SeqCst);
        self.state_tx.send_replace(ConnState::Connected);
        let _ = self.event_bus.connected.send(Arc::new(Connected));

        tokio::spawn(self.clone().keepalive_loop(generation));

        // Full resync, not a delta: contacts and pending requests are
        // re-fetched every time the socket comes up.
        let client = self.clone();
        tokio::spawn(async move { client.resync().await });
    }

    pub(crate) async fn resync(self: &Arc<Self>) {
        match self.api.fetch_contacts(&self.user_id).await {
            Ok(contacts) => {
                self.cache.cache_contacts(&contacts).await;
                self.conversation.lock().await.contacts = contacts;
            }
            Err(e) => warn!(target: "Client", "Contact resync failed: {e}"),
        }
        match self.api.fetch_pending_requests(&self.user_id).await {
            Ok(requests) => {
                self.conversation.lock().await.pending_requests = requests;
            }
            Err(e) => warn!(target: "Client", "Pending request resync failed: {e}"),
        }
    }

    /// Decodes, normalizes and dispatches one inbound frame. Malformed
    /// frames are logged and dropped; nothing that arrives here may take
    /// the read loop down.
    pub(crate) async fn handle_raw_frame(self: &Arc<Self>, payload: &[u8]) {
        let raw = match codec::decode_frame(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(target: "Client", "Dropping undecodable frame: {e}");
                return;
            }
        };
        let normalized = match codec::normalize(&raw) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!(target: "Client", "Dropping malformed {} frame: {e}", raw.type_name);
                return;
            }
        };
        match normalized {
            NormalizedFrame::Unknown(type_name) => {
                debug!(target: "Client", "Ignoring unknown frame type {type_name}");
            }
            NormalizedFrame::Ping => {
                if let Err(e) = self.send_frame(&Frame::pong()).await {
                    debug!(target: "Client", "Failed to answer ping: {e}");
                }
            }
            NormalizedFrame::Pong => {
                self.awaiting_pong.store(false, Ordering::SeqCst);
            }
            other => {
                if !self.router.dispatch(self.clone(), other).await {
                    debug!(target: "Client", "No handler processed frame");
                }
            }
        }
    }

    pub(crate) async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        let encoded = codec::encode_frame(frame);
        transport
            .send_frame(encoded.as_bytes())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    /// Read-through conversation fetch: cached messages are returned
    /// immediately while a network refresh replaces the cache in the
    /// background. With a cold cache the network result is the first paint.
    pub async fn get_messages(self: &Arc<Self>, contact_id: &str) -> Vec<Message> {
        let cached = self
            .cache
            .get_cached_messages(&self.user_id, contact_id)
            .await;
        if cached.is_empty() {
            return self.refresh_messages(contact_id).await.unwrap_or_default();
        }
        let client = self.clone();
        let contact = contact_id.to_string();
        tokio::spawn(async move {
            client.refresh_messages(&contact).await;
        });
        cached
    }

    /// Fetches the authoritative conversation and overwrites both the cache
    /// and in-memory copy with it. The server set wins outright; nothing is
    /// merged field by field.
    pub(crate) async fn refresh_messages(self: &Arc<Self>, contact_id: &str) -> Option<Vec<Message>> {
        match self.api.fetch_messages(&self.user_id, contact_id).await {
            Ok(messages) => {
                self.cache
                    .replace_conversation(&self.user_id, contact_id, &messages)
                    .await;
                let mut convo = self.conversation.lock().await;
                convo
                    .messages
                    .retain(|m| m.partner_of(&self.user_id) != contact_id);
                convo.messages.extend(messages.iter().cloned());
                sort_messages(&mut convo.messages);
                Some(messages)
            }
            Err(e) => {
                warn!(target: "Client", "Conversation refresh for {contact_id} failed: {e}");
                None
            }
        }
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.conversation.lock().await.contacts.clone()
    }

    pub async fn pending_requests(&self) -> Vec<ContactRequest> {
        self.conversation.lock().await.pending_requests.clone()
    }

    /// The in-memory copy of one conversation, ascending by creation time.
    pub async fn conversation_messages(&self, contact_id: &str) -> Vec<Message> {
        let convo = self.conversation.lock().await;
        convo
            .messages
            .iter()
            .filter(|m| m.partner_of(&self.user_id) == contact_id)
            .cloned()
            .collect()
    }

    // --- frame ingestion, called from handlers ---

    pub(crate) async fn ingest_message(&self, message: Message) {
        let active_chat = {
            let mut convo = self.conversation.lock().await;
            if convo.messages.iter().any(|m| m.id == message.id) {
                debug!(target: "Client", "Duplicate message {}, ignoring", message.id);
                return;
            }
            convo.messages.push(message.clone());
            sort_messages(&mut convo.messages);
            convo.active_chat.clone()
        };

        self.cache.add_message_to_cache(&self.user_id, &message).await;
        let _ = self.event_bus.message.send(Arc::new(message.clone()));

        let from_peer = message.sender_id != self.user_id;
        let in_active_chat = active_chat.as_deref() == Some(message.sender_id.as_str());
        if from_peer && !in_active_chat {
            let _ = self.event_bus.notification.send(Arc::new(Notification {
                from_user_id: message.sender_id.clone(),
                body: message.content.clone(),
            }));
        }
    }

    pub(crate) async fn apply_read_receipt(&self, read_by: Option<String>, message_ids: Vec<String>) {
        let changed = {
            let mut convo = self.conversation.lock().await;
            let mut changed = Vec::new();
            for message in convo.messages.iter_mut() {
                if message_ids.iter().any(|id| *id == message.id)
                    && message.promote_status(MessageStatus::Read)
                {
                    changed.push(message.clone());
                }
            }
            changed
        };
        for message in &changed {
            self.cache.add_message_to_cache(&self.user_id, message).await;
        }
        let _ = self.event_bus.messages_read.send(Arc::new(MessagesRead {
            read_by,
            message_ids,
        }));
    }

    pub(crate) async fn apply_contact_request(&self, request: ContactRequest) {
        {
            let mut convo = self.conversation.lock().await;
            if convo.pending_requests.iter().any(|r| r.id == request.id) {
                debug!(target: "Client", "Duplicate contact request {}, ignoring", request.id);
                return;
            }
            convo.pending_requests.push(request.clone());
        }
        let _ = self.event_bus.notification.send(Arc::new(Notification {
            from_user_id: request.sender_id.clone(),
            body: "sent you a contact request".to_string(),
        }));
        let _ = self.event_bus.contact_request.send(Arc::new(request));
    }

    pub(crate) async fn apply_contact_accepted(&self, contact: Contact, request_id: Option<String>) {
        {
            let mut convo = self.conversation.lock().await;
            if !convo.contacts.iter().any(|c| c.id == contact.id) {
                convo.contacts.push(contact.clone());
            }
            convo.pending_requests.retain(|r| {
                if let Some(id) = &request_id
                    && r.id == *id
                {
                    return false;
                }
                r.sender_id != contact.id && r.receiver_id != contact.id
            });
        }
        self.cache.cache_contacts(std::slice::from_ref(&contact)).await;
        let _ = self.event_bus.notification.send(Arc::new(Notification {
            from_user_id: contact.id.clone(),
            body: "accepted your contact request".to_string(),
        }));
        let _ = self
            .event_bus
            .contact_request_accepted
            .send(Arc::new(contact));
    }

    pub(crate) async fn cleanup_connection_state(&self) {
        *self.transport.lock().await = None;
        *self.transport_events.lock().await = None;
        self.awaiting_pong.store(false, Ordering::SeqCst);
        if self.is_running.load(Ordering::Relaxed)
            && self.enable_auto_reconnect.load(Ordering::Relaxed)
        {
            let _ = self
                .event_bus
                .disconnected
                .send(Arc::new(Disconnected { retrying: true }));
        }
    }

    /// Permanent teardown. Pending reconnect and typing timers are
    /// cancelled so no stale callback can revive the socket or resend
    /// typing state afterwards, conversational state is discarded, and the
    /// local cache is wiped.
    pub async fn logout(self: &Arc<Self>) {
        info!(target: "Client", "Logging out");
        self.enable_auto_reconnect.store(false, Ordering::SeqCst);
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown_notifier.notify_waiters();

        if let Some(task) = self.typing_stop_task.lock().await.take() {
            task.abort();
        }
        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        *self.transport_events.lock().await = None;

        *self.conversation.lock().await = ConversationState::default();
        self.cache.clear().await;

        self.state_tx.send_replace(ConnState::Disconnected);
        let _ = self
            .event_bus
            .disconnected
            .send(Arc::new(Disconnected { retrying: false }));
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::transport::mock::MockTransportFactory;

    #[derive(Default)]
    pub(crate) struct StubApi {
        pub contacts: Vec<Contact>,
        pub requests: Vec<ContactRequest>,
        pub messages: Vec<Message>,
    }

    #[async_trait::async_trait]
    impl ChatApi for StubApi {
        async fn fetch_messages(&self, _user_id: &str, _contact_id: &str) -> Result<Vec<Message>> {
            Ok(self.messages.clone())
        }

        async fn fetch_contacts(&self, _user_id: &str) -> Result<Vec<Contact>> {
            Ok(self.contacts.clone())
        }

        async fn fetch_pending_requests(&self, _user_id: &str) -> Result<Vec<ContactRequest>> {
            Ok(self.requests.clone())
        }
    }

    pub(crate) struct TestClient {
        pub client: Arc<SyncClient>,
        pub factory: Arc<MockTransportFactory>,
        pub cache: Arc<MemoryCache>,
    }

    pub(crate) fn test_client_with_api(user_id: &str, api: Arc<dyn ChatApi>) -> TestClient {
        let factory = Arc::new(MockTransportFactory::new());
        let cache = Arc::new(MemoryCache::new());
        let client = SyncClient::new(
            user_id,
            ClientConfig::default(),
            factory.clone(),
            cache.clone(),
            api,
        );
        TestClient {
            client,
            factory,
            cache,
        }
    }

    pub(crate) fn test_client(user_id: &str) -> TestClient {
        test_client_with_api(user_id, Arc::new(StubApi::default()))
    }

    /// Wires a mock transport and marks the client connected, without
    /// starting the run loop or its background tasks.
    pub(crate) async fn force_connected(tc: &TestClient) {
        let (transport, events) = tc.factory.create_transport().await.unwrap();
        *tc.client.transport.lock().await = Some(transport);
        *tc.client.transport_events.lock().await = Some(events);
        tc.client.state_tx.send_replace(ConnState::Connected);
    }
}
