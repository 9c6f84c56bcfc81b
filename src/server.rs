use crate::codec::{self, EncodedFrame, Frame, NormalizedFrame};
use crate::registry::{FrameSink, Registry};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Accept loop for the `/ws` endpoint. One task per connection; the
/// injected registry is the only shared state.
pub async fn serve(listener: TcpListener, registry: Arc<dyn Registry>) -> anyhow::Result<()> {
    info!(target: "Server", "Listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, registry).await {
                debug!(target: "Server", "Connection from {peer} ended: {e}");
            }
        });
    }
}

/// Extracts `userId` from the upgrade request's query string.
fn user_id_from_uri(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next() == Some("userId") {
            return urlencoding::decode(kv.next().unwrap_or(""))
                .ok()
                .map(|decoded| decoded.into_owned())
                .filter(|id| !id.is_empty());
        }
    }
    None
}

/// The write half of an accepted socket, as registered with the registry.
struct WsFrameSink {
    sink: Mutex<Option<SplitSink<WebSocketStream<TcpStream>, Message>>>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&self, frame: EncodedFrame) -> Result<(), anyhow::Error> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;
        let message = match frame {
            EncodedFrame::Text(text) => Message::text(text),
            EncodedFrame::Binary(bytes) => Message::binary(bytes),
        };
        sink.send(message)
            .await
            .map_err(|e| anyhow::anyhow!("websocket send error: {e}"))
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<dyn Registry>,
) -> anyhow::Result<()> {
    let mut uri: Option<Uri> = None;
    let mut ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        uri = Some(request.uri().clone());
        Ok(response)
    })
    .await?;

    let Some(user_id) = uri.as_ref().and_then(user_id_from_uri) else {
        warn!(target: "Server", "Connection from {peer} without userId, closing");
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "userId query parameter is required".into(),
            }))
            .await;
        return Ok(());
    };

    info!(target: "Server", "User {user_id} connected from {peer}");
    let (sink, mut stream) = ws.split();
    let sink = Arc::new(WsFrameSink {
        sink: Mutex::new(Some(sink)),
    });

    let generation = registry.register(&user_id, sink.clone()).await;
    let ack = EncodedFrame::Text(codec::encode_frame(&Frame::connection(&user_id)));
    if let Err(e) = sink.send(ack).await {
        debug!(target: "Server", "Failed to send connection ack to {user_id}: {e}");
    }

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_client_frame(&user_id, text.as_bytes(), &sink, registry.as_ref()).await;
            }
            Ok(Message::Binary(bytes)) => {
                handle_client_frame(&user_id, &bytes, &sink, registry.as_ref()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(target: "Server", "Read error from {user_id}: {e}");
                break;
            }
        }
    }

    registry.unregister(&user_id, generation).await;
    info!(target: "Server", "User {user_id} disconnected");
    Ok(())
}

/// Handles one frame sent by a connected client. Bad frames are logged and
/// dropped; the connection stays open regardless of what arrives here.
async fn handle_client_frame(
    user_id: &str,
    payload: &[u8],
    sink: &Arc<WsFrameSink>,
    registry: &dyn Registry,
) {
    let raw = match codec::decode_frame(payload) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(target: "Server", "Dropping undecodable frame from {user_id}: {e}");
            return;
        }
    };
    let normalized = match codec::normalize(&raw) {
        Ok(normalized) => normalized,
        Err(e) => {
            warn!(target: "Server", "Dropping malformed {} frame from {user_id}: {e}", raw.type_name);
            return;
        }
    };
    match normalized {
        NormalizedFrame::Ping => {
            let pong = EncodedFrame::Text(codec::encode_frame(&Frame::pong()));
            if let Err(e) = sink.send(pong).await {
                debug!(target: "Server", "Failed to answer ping from {user_id}: {e}");
            }
        }
        NormalizedFrame::Typing {
            receiver_id: Some(receiver_id),
            is_typing,
            ..
        } => {
            // The sender is rewritten to the authenticated user; clients
            // don't get to speak for each other.
            let frame = Frame::typing(user_id, &receiver_id, is_typing);
            registry.route(&receiver_id, &frame).await;
        }
        NormalizedFrame::Typing { .. } => {
            warn!(target: "Server", "Dropping typing frame from {user_id} without recipient");
        }
        NormalizedFrame::Unknown(type_name) => {
            debug!(target: "Server", "Ignoring unknown frame type {type_name} from {user_id}");
        }
        other => {
            debug!(
                target: "Server",
                "Ignoring unexpected client frame {:?} from {user_id}",
                other.frame_type().map(|t| t.canonical())
            );
        }
    }
}
