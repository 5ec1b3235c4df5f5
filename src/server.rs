//! Signaling server
//!
//! Accepts websocket connections, feeds their text frames to the [`Router`]
//! and delivers the router's responses. A small HTTP server runs on its own
//! thread next to it, serving the static UI and a status document.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rouille::{Request, Response, Server};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::model::connection::ConnectionId;
use crate::registry::{RegistryStats, SessionRegistry};
use crate::router::{Outbound, Router};
use crate::util::{advertised_addr, select_host_address};

pub type SignalRouter = Router<Connections>;

/// Frames that may wait for one slow peer before sends to it fail.
pub const OUTBOUND_QUEUE: usize = 128;

/// Installs the global `tracing` subscriber. `RUST_LOG` takes precedence
/// over `level`. Calling it twice is harmless.
pub fn init_log(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Outgoing queues of every open websocket, keyed by connection handle.
pub struct Connections {
    peers: DashMap<ConnectionId, Sender<String>>,
    capacity: usize,
}

impl Default for Connections {
    fn default() -> Self {
        Connections::with_capacity(OUTBOUND_QUEUE)
    }
}

impl Connections {
    pub fn with_capacity(capacity: usize) -> Connections {
        Connections {
            peers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn register(&self, conn: ConnectionId) -> Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.peers.insert(conn, tx);
        rx
    }

    fn unregister(&self, conn: ConnectionId) {
        self.peers.remove(&conn);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Outbound for Connections {
    fn send(&self, to: ConnectionId, frame: String) -> Result<()> {
        let peer = self.peers.get(&to).ok_or(RelayError::SendFailure(to))?;
        // A peer that stopped reading fails the send instead of growing its queue.
        peer.try_send(frame).map_err(|_| RelayError::SendFailure(to))
    }
}

pub struct SignalServer {
    listener: TcpListener,
    router: Arc<SignalRouter>,
    path: Arc<str>,
}

impl SignalServer {
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<SignalServer> {
        let listener = TcpListener::bind(config.signal_addr)
            .await
            .with_context(|| format!("binding the signaling listener on {}", config.signal_addr))?;

        let registry = Arc::new(SessionRegistry::new(config.key_attempts));
        let router = Arc::new(Router::new(registry, Arc::new(Connections::default())));

        Ok(SignalServer {
            listener,
            router,
            path: Arc::from(config.signal_path.as_str()),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> Arc<SignalRouter> {
        Arc::clone(&self.router)
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Signaling server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted.context("accepting a connection")?;
                    let router = Arc::clone(&self.router);
                    let path = Arc::clone(&self.path);
                    tokio::spawn(handle_connection(stream, addr, router, path));
                }
            }
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(std::future::pending()).await
    }
}

/// Drives one websocket from handshake to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    router: Arc<SignalRouter>,
    path: Arc<str>,
) {
    let check_path = |request: &UpgradeRequest, response: UpgradeResponse| {
        if request.uri().path() == &*path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("unknown signaling path".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%addr, "Websocket handshake failed: {}", e);
            return;
        }
    };

    let conn = ConnectionId::next();
    let mut outgoing = router.outbound().register(conn);
    info!(%conn, %addr, "Peer connected");
    router.on_connect(conn);

    let (mut sink, mut frames) = ws.split();

    // Frames for one connection leave in the order the router queued them.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if let Err(e) = sink.send(Message::Text(frame)).await {
                warn!(%conn, "Failed to send websocket frame: {}", e);
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = router.handle_frame(conn, &text) {
                    warn!(%conn, error = %e, "Message dropped");
                }
            }
            // Keep reading after a close so tungstenite can flush its close
            // reply; the stream ends once the handshake is complete.
            Ok(Message::Close(close)) => match close {
                Some(close) => info!(
                    %conn,
                    code = u16::from(close.code),
                    reason = %close.reason,
                    "Peer closed the connection"
                ),
                None => info!(%conn, "Peer closed the connection"),
            },
            Ok(Message::Binary(data)) => {
                debug!(%conn, len = data.len(), "Ignoring binary frame");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%conn, "Websocket error: {}", e);
                break;
            }
        }
    }

    // Dropping the queue's sender lets the writer drain what is left and stop.
    router.outbound().unregister(conn);
    router.on_disconnect(conn);
    if let Err(e) = writer.await {
        debug!(%conn, "Writer task ended abnormally: {}", e);
    }
}

#[derive(Debug, Serialize)]
struct Status<'a> {
    #[serde(flatten)]
    rooms: RegistryStats,
    connections: usize,
    started_at: String,
    signal_url: &'a str,
}

/// State behind the static UI and status server.
///
/// The UI is served from its own port, so pages cannot derive the websocket
/// address from their own location. They read `signal_url` from
/// `/api/status` instead.
pub struct UiContext {
    pub web_dir: PathBuf,
    pub router: Arc<SignalRouter>,
    pub signal_url: String,
    pub started_at: DateTime<Utc>,
}

/// Starts the static UI and status server on a background thread.
pub fn spawn_ui_server(addr: SocketAddr, context: UiContext) -> anyhow::Result<SocketAddr> {
    let server = Server::new(addr, move |request| web_request(request, &context))
        .map_err(|e| anyhow!("starting the web server on {addr}: {e}"))?;

    let bound = server.server_addr();
    thread::spawn(move || server.run());

    Ok(bound)
}

fn web_request(request: &Request, context: &UiContext) -> Response {
    debug!(method = %request.method(), url = %request.url(), "HTTP request");

    match request.url().as_str() {
        "/api/status" => Response::json(&Status {
            rooms: context.router.registry().stats(),
            connections: context.router.outbound().len(),
            started_at: context.started_at.to_rfc3339(),
            signal_url: &context.signal_url,
        }),
        "/" => index(&context.web_dir),
        _ => rouille::match_assets(request, &context.web_dir),
    }
}

fn index(web_dir: &Path) -> Response {
    match std::fs::File::open(web_dir.join("index.html")) {
        Ok(file) => Response::from_file("text/html; charset=utf-8", file),
        Err(_) => Response::empty_404(),
    }
}

/// Runs the broker until Ctrl-C.
#[tokio::main]
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let server = SignalServer::bind(&config).await?;
    let host = select_host_address();

    let signal_url = format!(
        "ws://{}{}",
        advertised_addr(server.local_addr()?, host),
        config.signal_path
    );
    info!("Peers signal on {}", signal_url);

    if let Some(http_addr) = config.http_addr {
        let context = UiContext {
            web_dir: config.web_dir.clone(),
            router: server.router(),
            signal_url,
            started_at: Utc::now(),
        };
        let bound = spawn_ui_server(http_addr, context)?;
        info!("Connect a browser to http://{}", advertised_addr(bound, host));
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Listening for Ctrl-C failed: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
