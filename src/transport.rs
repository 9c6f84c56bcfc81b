use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A frame payload has been received from the server. May be plain JSON
    /// text or gzip'd bytes; the codec sniffs which.
    FrameReceived(Bytes),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection to the chat server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one encoded frame to the server.
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances, one per
/// connection attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

/// Tokio WebSocket transport.
pub struct TokioWebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;
        sink.send(Message::binary(frame.to_vec()))
            .await
            .map_err(|e| anyhow::anyhow!("websocket send error: {e}"))
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
    }
}

/// Factory that dials the chat server's `/ws` endpoint with the user bound
/// in the connection URI.
pub struct TokioWebSocketTransportFactory {
    url: String,
}

impl TokioWebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!(target: "Transport", "Dialing {}", self.url);
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("websocket connect failed: {e}"))?;

        let (sink, stream) = ws.split();
        let transport = Arc::new(TokioWebSocketTransport {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        });

        let (event_tx, event_rx) = mpsc::channel(100);
        tokio::task::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                let payload = match msg {
                    Message::Text(text) => Bytes::from(text),
                    Message::Binary(bytes) => bytes,
                    Message::Close(_) => {
                        trace!(target: "Transport", "Received close frame");
                        break;
                    }
                    _ => continue,
                };
                debug!(target: "Transport", "<-- Received frame: {} bytes", payload.len());
                if event_tx
                    .send(TransportEvent::FrameReceived(payload))
                    .await
                    .is_err()
                {
                    trace!(target: "Transport", "Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Err(e)) => {
                error!(target: "Transport", "Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!(target: "Transport", "Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::codec::{self, Frame};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A transport that records sent frames instead of hitting the network.
    pub struct MockTransport {
        pub sent_frames: Mutex<Vec<Vec<u8>>>,
        disconnected: AtomicBool,
        event_tx: mpsc::Sender<TransportEvent>,
    }

    impl MockTransport {
        pub async fn sent_count(&self) -> usize {
            self.sent_frames.lock().await.len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
            if self.disconnected.load(Ordering::SeqCst) {
                anyhow::bail!("transport is disconnected");
            }
            self.sent_frames.lock().await.push(frame.to_vec());
            Ok(())
        }

        async fn disconnect(&self) {
            if !self.disconnected.swap(true, Ordering::SeqCst) {
                let _ = self.event_tx.send(TransportEvent::Disconnected).await;
            }
        }
    }

    /// Factory handing out [`MockTransport`]s. The test drives the event
    /// stream of each created transport through the kept senders.
    #[derive(Default)]
    pub struct MockTransportFactory {
        transports: std::sync::Mutex<Vec<Arc<MockTransport>>>,
        event_senders: std::sync::Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn created(&self) -> usize {
            self.transports.lock().unwrap().len()
        }

        pub fn transport(&self, index: usize) -> Arc<MockTransport> {
            self.transports.lock().unwrap()[index].clone()
        }

        fn latest_sender(&self) -> mpsc::Sender<TransportEvent> {
            self.event_senders
                .lock()
                .unwrap()
                .last()
                .expect("no transport created yet")
                .clone()
        }

        /// Simulates the server pushing a frame to the client.
        pub async fn push_frame(&self, frame: &Frame) {
            self.push_raw(codec::encode_frame(frame).into_bytes()).await;
        }

        pub async fn push_raw(&self, bytes: Vec<u8>) {
            let _ = self
                .latest_sender()
                .send(TransportEvent::FrameReceived(Bytes::from(bytes)))
                .await;
        }

        /// Simulates the server dropping the connection.
        pub async fn drop_connection(&self) {
            let _ = self.latest_sender().send(TransportEvent::Disconnected).await;
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            let (event_tx, event_rx) = mpsc::channel(100);
            let transport = Arc::new(MockTransport {
                sent_frames: Mutex::new(Vec::new()),
                disconnected: AtomicBool::new(false),
                event_tx: event_tx.clone(),
            });
            let _ = event_tx.send(TransportEvent::Connected).await;
            self.transports.lock().unwrap().push(transport.clone());
            self.event_senders.lock().unwrap().push(event_tx);
            Ok((transport, event_rx))
        }
    }
}
