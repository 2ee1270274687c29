//! `streamlocal-forward@openssh.com` / `cancel-streamlocal-forward@openssh.com`: the OpenSSH
//! Unix-domain-socket counterpart to [`crate::handlers::tcpip_forward`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::server::Handle;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::channel_stream::ChannelStream;
use crate::channel_writer::ChannelWriter;
use crate::closed::is_use_of_closed_connection;
use crate::conn::{ConnContext, UnixListenerFactory};
use crate::error::ForwardError;
use crate::forward_table::ForwardKey;
use crate::messages::StreamLocalChannelForwardMsg;
use crate::registry::{HandlerRegistry, RequestHandler, RequestOutcome};
use crate::tunnel::tunnel;

pub const VERB: &str = "streamlocal-forward@openssh.com";
pub const CANCEL_VERB: &str = "cancel-streamlocal-forward@openssh.com";

pub(crate) fn register(registry: &mut HandlerRegistry) {
    registry.register_request(VERB, Arc::new(StreamlocalForwardHandler));
    registry.register_request(CANCEL_VERB, Arc::new(CancelStreamlocalForwardHandler));
}

struct StreamlocalForwardHandler;

#[async_trait]
impl RequestHandler for StreamlocalForwardHandler {
    async fn handle(&self, _verb: &str, payload: Bytes, ctx: Arc<ConnContext>) -> RequestOutcome {
        let parsed = match StreamLocalChannelForwardMsg::decode(payload) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("malformed streamlocal-forward payload");
                return RequestOutcome::reject();
            }
        };

        if !ctx.permissions.allow(VERB, &parsed.socket_path) {
            tracing::debug!(path = %parsed.socket_path, "streamlocal-forward denied by permissions");
            return RequestOutcome::reject();
        }

        let key = ForwardKey::Path(parsed.socket_path.clone());
        // Close any existing binding for this path first: the prior listener must be gone before
        // we try to bind over the same socket path.
        ctx.forward_table.remove(&key).await;

        let listener = match ctx.unix_listener_factory.bind(&parsed.socket_path).await {
            Ok(listener) => listener,
            Err(io_err) => {
                let err = ForwardError::Bind(io_err);
                tracing::warn!(?err, path = %parsed.socket_path, "streamlocal-forward bind failed");
                return RequestOutcome::reject();
            }
        };

        let accept_loop = tokio::spawn(accept_loop(
            listener,
            parsed.socket_path.clone(),
            ctx.handle.clone(),
            ctx.clone(),
        ));
        ctx.forward_table.insert(key, accept_loop).await;

        tracing::info!(path = %parsed.socket_path, "streamlocal-forward bound");
        RequestOutcome::accept()
    }
}

struct CancelStreamlocalForwardHandler;

#[async_trait]
impl RequestHandler for CancelStreamlocalForwardHandler {
    async fn handle(&self, _verb: &str, payload: Bytes, ctx: Arc<ConnContext>) -> RequestOutcome {
        let parsed = match StreamLocalChannelForwardMsg::decode(payload) {
            Ok(p) => p,
            Err(_) => return RequestOutcome::reject(),
        };
        let key = ForwardKey::Path(parsed.socket_path.clone());
        if ctx.forward_table.remove(&key).await {
            tracing::info!(path = %parsed.socket_path, "streamlocal-forward cancelled");
            RequestOutcome::accept()
        } else {
            RequestOutcome::reject()
        }
    }
}

async fn accept_loop(listener: tokio::net::UnixListener, socket_path: String, handle: Handle, ctx: Arc<ConnContext>) {
    loop {
        let (stream, _origin) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                if is_use_of_closed_connection(&err) {
                    tracing::debug!(path = %socket_path, "streamlocal-forward listener closed");
                } else {
                    tracing::warn!(?err, path = %socket_path, "streamlocal-forward accept failed");
                }
                return;
            }
        };
        let handle = handle.clone();
        let ctx = ctx.clone();
        let socket_path = socket_path.clone();
        tokio::spawn(async move {
            handle_accepted(stream, socket_path, handle, ctx).await;
        });
    }
}

async fn handle_accepted(stream: UnixStream, socket_path: String, handle: Handle, ctx: Arc<ConnContext>) {
    let channel = match handle.channel_open_forwarded_streamlocal(&socket_path).await {
        Ok(channel) => channel,
        Err(err) => {
            tracing::debug!(?err, "peer refused forwarded-streamlocal channel");
            return;
        }
    };
    let channel_id = channel.id();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    ctx.register_channel_route(channel_id, event_tx).await;

    let writer = ChannelWriter::new(handle.clone(), channel_id);
    let channel_stream = ChannelStream::new(event_rx, writer);

    if let Err(err) = tunnel(stream, channel_stream).await {
        tracing::warn!(?err, "forwarded-streamlocal tunnel ended with an error");
    }

    let _ = handle.close(channel_id).await;
    ctx.remove_channel_route(channel_id).await;
    drop(channel);
}
