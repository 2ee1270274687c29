//! `tcpip-forward` / `cancel-tcpip-forward`: server→client TCP reverse-forwarding.
//!
//! Binds a listener on behalf of the peer, and for each accepted connection opens a
//! `forwarded-tcpip` channel back to the client and tunnels the two together. Grounded on spec
//! §4.G; the `Handle::channel_open_forwarded_tcpip` signature mirrors
//! `other_examples/.../russh-src-server-session.rs.rs`'s client-facing `Handle` API.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::server::Handle;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::channel_stream::ChannelStream;
use crate::channel_writer::ChannelWriter;
use crate::closed::is_use_of_closed_connection;
use crate::conn::{ConnContext, TcpListenerFactory};
use crate::error::ForwardError;
use crate::forward_table::ForwardKey;
use crate::messages::{ForwardMsg, ForwardResponseMsg};
use crate::registry::{HandlerRegistry, RequestHandler, RequestOutcome};
use crate::tunnel::tunnel;

pub const VERB: &str = "tcpip-forward";
pub const CANCEL_VERB: &str = "cancel-tcpip-forward";

pub(crate) fn register(registry: &mut HandlerRegistry) {
    registry.register_request(VERB, Arc::new(TcpipForwardHandler));
    registry.register_request(CANCEL_VERB, Arc::new(CancelTcpipForwardHandler));
}

struct TcpipForwardHandler;

#[async_trait]
impl RequestHandler for TcpipForwardHandler {
    async fn handle(&self, _verb: &str, payload: Bytes, ctx: Arc<ConnContext>) -> RequestOutcome {
        let parsed = match ForwardMsg::decode(payload) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("malformed tcpip-forward payload");
                return RequestOutcome::reject();
            }
        };

        let requested_port = match u16::try_from(parsed.bind_port) {
            Ok(port) => port,
            Err(_) => return RequestOutcome::reject(),
        };

        if !ctx.permissions.allow(VERB, &parsed.bind_port.to_string()) {
            tracing::debug!(port = parsed.bind_port, "tcpip-forward denied by permissions");
            return RequestOutcome::reject();
        }

        // Close any existing binding for this key before (re)binding so the port is free and the
        // old accept loop cannot race the new one.
        ctx.forward_table.remove(&ForwardKey::Port(requested_port)).await;

        let bound = match ctx.tcp_listener_factory.bind(&parsed.bind_addr, requested_port).await {
            Ok(bound) => bound,
            Err(io_err) => {
                let err = ForwardError::Bind(io_err);
                tracing::warn!(?err, addr = %parsed.bind_addr, port = requested_port, "tcpip-forward bind failed");
                return RequestOutcome::reject();
            }
        };
        let bound_port = bound.local_port;

        let accept_loop = tokio::spawn(accept_loop(
            bound.listener,
            parsed.bind_addr.clone(),
            bound_port,
            ctx.handle.clone(),
            ctx.clone(),
        ));
        ctx.forward_table
            .insert(ForwardKey::Port(bound_port), accept_loop)
            .await;

        tracing::info!(addr = %parsed.bind_addr, port = bound_port, "tcpip-forward bound");
        RequestOutcome::accept_with(
            ForwardResponseMsg {
                bound_port: bound_port as u32,
            }
            .encode(),
        )
    }
}

struct CancelTcpipForwardHandler;

#[async_trait]
impl RequestHandler for CancelTcpipForwardHandler {
    async fn handle(&self, _verb: &str, payload: Bytes, ctx: Arc<ConnContext>) -> RequestOutcome {
        let parsed = match ForwardMsg::decode(payload) {
            Ok(p) => p,
            Err(_) => return RequestOutcome::reject(),
        };
        let port = match u16::try_from(parsed.bind_port) {
            Ok(port) => port,
            Err(_) => return RequestOutcome::reject(),
        };
        if ctx.forward_table.remove(&ForwardKey::Port(port)).await {
            tracing::info!(port, "tcpip-forward cancelled");
            RequestOutcome::accept()
        } else {
            RequestOutcome::reject()
        }
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    bind_addr: String,
    bound_port: u16,
    handle: Handle,
    ctx: Arc<ConnContext>,
) {
    loop {
        let (stream, origin) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                if is_use_of_closed_connection(&err) {
                    tracing::debug!(port = bound_port, "tcpip-forward listener closed");
                } else {
                    tracing::warn!(?err, port = bound_port, "tcpip-forward accept failed");
                }
                return;
            }
        };
        let handle = handle.clone();
        let ctx = ctx.clone();
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            handle_accepted(stream, origin, bind_addr, bound_port, handle, ctx).await;
        });
    }
}

async fn handle_accepted(
    stream: TcpStream,
    origin: SocketAddr,
    bind_addr: String,
    bound_port: u16,
    handle: Handle,
    ctx: Arc<ConnContext>,
) {
    let channel = match handle
        .channel_open_forwarded_tcpip(
            &bind_addr,
            bound_port as u32,
            &origin.ip().to_string(),
            origin.port() as u32,
        )
        .await
    {
        Ok(channel) => channel,
        Err(err) => {
            tracing::debug!(?err, "peer refused forwarded-tcpip channel");
            return;
        }
    };
    let channel_id = channel.id();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    ctx.register_channel_route(channel_id, event_tx).await;

    let writer = ChannelWriter::new(handle.clone(), channel_id);
    let channel_stream = ChannelStream::new(event_rx, writer);

    if let Err(err) = tunnel(stream, channel_stream).await {
        tracing::warn!(?err, "forwarded-tcpip tunnel ended with an error");
    }

    let _ = handle.close(channel_id).await;
    ctx.remove_channel_route(channel_id).await;
    drop(channel);
}
