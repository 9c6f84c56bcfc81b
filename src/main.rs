use chrono::Utc;
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;
use wirechat::registry::ConnectionRegistry;
use wirechat::server;

// Demo fan-out server: accepts websocket clients on /ws?userId=<id> and
// routes frames between them through the in-process registry.
//
// Usage:
//   cargo run                                  # listen on 127.0.0.1:8765
//   cargo run -- --bind 0.0.0.0:9000
//   cargo run -- --compress                    # gzip frames above 1KB

#[derive(Parser, Debug)]
#[command(about = "WebSocket fan-out server for the wirechat core")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8765")]
    bind: String,

    /// Gzip outbound frames above the size threshold.
    #[arg(long)]
    compress: bool,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Utc::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let registry = ConnectionRegistry::new();
        let registry = Arc::new(if args.compress {
            registry.with_compression()
        } else {
            registry
        });

        let listener = match TcpListener::bind(&args.bind).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {}: {e}", args.bind);
                return;
            }
        };

        tokio::select! {
            result = server::serve(listener, registry) => {
                if let Err(e) = result {
                    error!("Server loop failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down.");
            }
        }
    });
}
