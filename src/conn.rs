//! Per-connection context and the multiplexer that pumps global requests and channel opens into
//! the handler registry.
//!
//! Grounded on `warpgate-protocol-ssh/src/server/mod.rs`'s connection setup (construct context,
//! spawn the session future alongside the transport-driving future) and on the dispatch-loop shape
//! of `warpgate-protocol-ssh/src/server/session.rs::handle_server_handler_event`, generalized to
//! route through [`crate::registry::HandlerRegistry`] instead of a fixed proxy-specific match.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::forward_table::ForwardTable;
use crate::messages::{ExecMsg, PtyRequestMsg, PtyWindowChangeMsg, SetenvRequest};
use crate::permissions::Permissions;
use crate::registry::{HandlerRegistry, RequestOutcome};
use crate::shell::Shell;

/// Blanket marker for anything this crate can treat as an opaque duplex byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

#[async_trait]
pub trait TcpConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<Box<dyn AsyncStream>>;
}

pub struct DefaultTcpConnector;

#[async_trait]
impl TcpConnector for DefaultTcpConnector {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<Box<dyn AsyncStream>> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }
}

#[async_trait]
pub trait UnixConnector: Send + Sync {
    async fn connect(&self, path: &str) -> std::io::Result<Box<dyn AsyncStream>>;
}

pub struct DefaultUnixConnector;

#[async_trait]
impl UnixConnector for DefaultUnixConnector {
    async fn connect(&self, path: &str) -> std::io::Result<Box<dyn AsyncStream>> {
        let stream = UnixStream::connect(path).await?;
        Ok(Box::new(stream))
    }
}

/// A bound TCP listener plus the port it actually ended up on (relevant when port 0 was
/// requested).
pub struct BoundTcpListener {
    pub local_port: u16,
    pub listener: TcpListener,
}

#[async_trait]
pub trait TcpListenerFactory: Send + Sync {
    async fn bind(&self, addr: &str, port: u16) -> std::io::Result<BoundTcpListener>;
}

pub struct DefaultTcpListenerFactory;

#[async_trait]
impl TcpListenerFactory for DefaultTcpListenerFactory {
    async fn bind(&self, addr: &str, port: u16) -> std::io::Result<BoundTcpListener> {
        let listener = TcpListener::bind((addr, port)).await?;
        let local_port = listener.local_addr()?.port();
        Ok(BoundTcpListener {
            local_port,
            listener,
        })
    }
}

#[async_trait]
pub trait UnixListenerFactory: Send + Sync {
    async fn bind(&self, path: &str) -> std::io::Result<UnixListener>;
}

pub struct DefaultUnixListenerFactory;

#[async_trait]
impl UnixListenerFactory for DefaultUnixListenerFactory {
    async fn bind(&self, path: &str) -> std::io::Result<UnixListener> {
        let _ = std::fs::remove_file(path);
        UnixListener::bind(path)
    }
}

/// Session-channel request types, unmarshalled from their raw wire payloads at the
/// `HandlerAdapter` boundary and forwarded to the session handler task owning that channel.
#[derive(Debug, Clone)]
pub enum SessionRequest {
    Pty(PtyRequestMsg),
    WindowChange(PtyWindowChangeMsg),
    Env(SetenvRequest),
    Shell,
    Exec(ExecMsg),
    Subsystem(String),
    Other(String),
}

impl SessionRequest {
    /// The SSH request-type string, as consulted against `Permissions::allow("session", _)`.
    pub fn type_str(&self) -> &str {
        match self {
            SessionRequest::Pty(_) => "pty-req",
            SessionRequest::WindowChange(_) => "window-change",
            SessionRequest::Env(_) => "env",
            SessionRequest::Shell => "shell",
            SessionRequest::Exec(_) => "exec",
            SessionRequest::Subsystem(_) => "subsystem",
            SessionRequest::Other(t) => t,
        }
    }
}

/// One event destined for the task handling a specific already-open channel.
pub enum ChannelEvent {
    Request {
        request: SessionRequest,
        reply: oneshot::Sender<bool>,
    },
    Data(Bytes),
    ExtendedData {
        ext: u32,
        data: Bytes,
    },
    Eof,
    Close,
}

/// A freshly opened channel, handed to whichever [`crate::registry::ChannelHandler`] is
/// registered for `channel_type`. The handler must send its admit/reject decision on `decision`
/// before doing anything else observable (dialing, binding, reading the channel) — the transport
/// is still waiting to send the peer a channel-open confirmation or failure.
pub struct NewChannel {
    pub channel_type: String,
    pub channel_id: ChannelId,
    pub channel: Channel<Msg>,
    /// The encoded channel-open parameters (e.g. a `ChannelOpenDirectMsg`) for channel types that
    /// carry them; empty for `session`, which carries none.
    pub params: Bytes,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub decision: oneshot::Sender<bool>,
}

/// A global (connection-scoped) request, already carrying the reply channel the multiplexer's
/// request pump will answer through.
pub struct GlobalRequest {
    pub verb: String,
    pub payload: Bytes,
    pub reply: oneshot::Sender<RequestOutcome>,
}

/// Per-connection state shared by every handler task. Constructed once per authenticated SSH
/// connection and handed out as an `Arc`.
pub struct ConnContext {
    pub handle: Handle,
    pub permissions: Permissions,
    pub dialer: Arc<dyn TcpConnector>,
    pub unix_dialer: Arc<dyn UnixConnector>,
    pub tcp_listener_factory: Arc<dyn TcpListenerFactory>,
    pub unix_listener_factory: Arc<dyn UnixListenerFactory>,
    pub environment: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
    pub forward_table: ForwardTable,
    pub registry: Arc<HandlerRegistry>,
    pub channel_routes: Mutex<HashMap<ChannelId, mpsc::UnboundedSender<ChannelEvent>>>,
    pub username: Option<String>,
    pub shell: Arc<dyn Shell>,
}

impl ConnContext {
    pub async fn route_channel_event(&self, id: ChannelId, event: ChannelEvent) {
        let routes = self.channel_routes.lock().await;
        if let Some(tx) = routes.get(&id) {
            let _ = tx.send(event);
        }
    }

    pub async fn register_channel_route(&self, id: ChannelId, tx: mpsc::UnboundedSender<ChannelEvent>) {
        self.channel_routes.lock().await.insert(id, tx);
    }

    pub async fn remove_channel_route(&self, id: ChannelId) {
        self.channel_routes.lock().await.remove(&id);
    }
}

/// Runs the per-connection multiplexer: a request pump (global requests, handled one at a time
/// in arrival order so Forward/Cancel pairs are observed in order) and a channel pump (each
/// accepted channel dispatched to a freshly spawned task). Returns once the channel pump's input
/// closes; the request pump is allowed to outlive it briefly but is not awaited.
pub async fn run_multiplexer(
    ctx: Arc<ConnContext>,
    mut requests: mpsc::UnboundedReceiver<GlobalRequest>,
    mut channels: mpsc::UnboundedReceiver<NewChannel>,
) {
    let request_ctx = ctx.clone();
    tokio::spawn(async move {
        while let Some(req) = requests.recv().await {
            let handler = request_ctx.registry.request_handler(&req.verb);
            let outcome = match handler {
                Some(h) => h.handle(&req.verb, req.payload, request_ctx.clone()).await,
                None => {
                    tracing::debug!(verb = %req.verb, "no handler registered for request verb");
                    RequestOutcome::reject()
                }
            };
            let _ = req.reply.send(outcome);
        }
    });

    while let Some(new_channel) = channels.recv().await {
        let handler = ctx.registry.channel_handler(&new_channel.channel_type);
        match handler {
            Some(h) => {
                let ctx = ctx.clone();
                let channel_type = new_channel.channel_type.clone();
                tokio::spawn(async move {
                    h.handle(new_channel, ctx).await;
                    tracing::debug!(channel_type = %channel_type, "channel handler finished");
                });
            }
            None => {
                tracing::warn!(channel_type = %new_channel.channel_type, "no handler registered for channel type, rejecting as administratively prohibited");
                let _ = new_channel.decision.send(false);
            }
        }
    }

    ctx.forward_table.close_all().await;
    tracing::debug!("connection multiplexer finished, listeners torn down");
}
