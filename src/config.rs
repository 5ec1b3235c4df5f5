//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::registry::DEFAULT_KEY_ATTEMPTS;

#[derive(Parser, Debug)]
#[command(
    name = "rendezvous-relay",
    about = "Pairs a streamer and a receiver by short key and relays their WebRTC signaling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the signaling broker.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address of the websocket signaling listener.
    #[arg(long, env = "RELAY_SIGNAL_ADDR", default_value = "0.0.0.0:5070")]
    pub signal_addr: SocketAddr,

    /// Request path peers upgrade on.
    #[arg(long, env = "RELAY_SIGNAL_PATH", default_value = "/api/signal")]
    pub signal_path: String,

    /// Address of the static UI and status server. It runs beside the signaling
    /// listener; pages learn the websocket URL from `signal_url` in `/api/status`.
    #[arg(long, env = "RELAY_HTTP_ADDR", default_value = "0.0.0.0:5080")]
    pub http_addr: SocketAddr,

    /// Do not start the static UI and status server.
    #[arg(long, default_value_t = false)]
    pub no_ui: bool,

    /// Directory of static assets for the UI.
    #[arg(long, env = "RELAY_WEB_DIR", default_value = "web")]
    pub web_dir: PathBuf,

    /// How many keys to draw before giving up on a collision-free one.
    #[arg(long, env = "RELAY_KEY_ATTEMPTS", default_value_t = DEFAULT_KEY_ATTEMPTS)]
    pub key_attempts: usize,
}

/// Everything the server needs to start, independent of how it was parsed.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub signal_addr: SocketAddr,
    pub signal_path: String,
    pub http_addr: Option<SocketAddr>,
    pub web_dir: PathBuf,
    pub key_attempts: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            signal_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            signal_path: "/api/signal".to_string(),
            http_addr: None,
            web_dir: PathBuf::from("web"),
            key_attempts: DEFAULT_KEY_ATTEMPTS,
        }
    }
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        ServerConfig {
            signal_addr: args.signal_addr,
            signal_path: normalize_path(args.signal_path),
            http_addr: (!args.no_ui).then_some(args.http_addr),
            web_dir: args.web_dir,
            key_attempts: args.key_attempts,
        }
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}
