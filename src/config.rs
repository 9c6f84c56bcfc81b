use std::time::Duration;

/// Client-side tunables. The defaults match the server demo binary.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the chat server, e.g. `ws://127.0.0.1:8765`.
    pub server_url: String,
    /// Base delay before a reconnect attempt. An error-count backoff is
    /// layered on top, capped at [`ClientConfig::max_reconnect_delay`].
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl ClientConfig {
    /// The websocket endpoint with the user bound in the connection URI.
    pub fn ws_url(&self, user_id: &str) -> String {
        format!(
            "{}/ws?userId={}",
            self.server_url,
            urlencoding::encode(user_id)
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8765".to_string(),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
        }
    }
}
