pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod handlers;
pub mod keepalive;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod transport;
pub mod types;
pub mod typing;

pub use client::{ChatApi, ConnState, SyncClient};
pub use config::{ClientConfig, ServerConfig};
pub use registry::{ConnectionRegistry, Registry};
pub use service::{ChatService, InProcessApi};
