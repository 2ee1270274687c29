//! `direct-streamlocal@openssh.com` channel handler: the OpenSSH Unix-domain-socket counterpart
//! to [`crate::handlers::direct_tcpip`].
//!
//! Grounded on spec §4.F; same shape as `direct_tcpip.rs` with a `unix` dial instead of `tcp`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel_stream::ChannelStream;
use crate::channel_writer::ChannelWriter;
use crate::conn::{ConnContext, NewChannel};
use crate::messages::StreamLocalChannelOpenDirectMsg;
use crate::registry::{ChannelHandler, HandlerRegistry};
use crate::tunnel::tunnel;

pub const CHANNEL_TYPE: &str = "direct-streamlocal@openssh.com";

pub(crate) fn register(registry: &mut HandlerRegistry) {
    registry.register_channel(CHANNEL_TYPE, Arc::new(DirectStreamlocalHandler));
}

struct DirectStreamlocalHandler;

#[async_trait]
impl ChannelHandler for DirectStreamlocalHandler {
    async fn handle(&self, new_channel: NewChannel, ctx: Arc<ConnContext>) {
        let NewChannel {
            channel_id,
            params,
            events,
            decision,
            ..
        } = new_channel;

        let parsed = match StreamLocalChannelOpenDirectMsg::decode(params) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("malformed direct-streamlocal channel-open payload");
                let _ = decision.send(false);
                return;
            }
        };

        if !ctx.permissions.allow(CHANNEL_TYPE, &parsed.socket_path) {
            tracing::debug!(path = %parsed.socket_path, "direct-streamlocal denied by permissions");
            let _ = decision.send(false);
            return;
        }

        let dialed = match ctx.unix_dialer.connect(&parsed.socket_path).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(path = %parsed.socket_path, ?err, "direct-streamlocal dial failed");
                let _ = decision.send(false);
                return;
            }
        };

        if decision.send(true).is_err() {
            return;
        }

        let writer = ChannelWriter::new(ctx.handle.clone(), channel_id);
        let channel_stream = ChannelStream::new(events, writer);

        if let Err(err) = tunnel(dialed, channel_stream).await {
            tracing::warn!(path = %parsed.socket_path, ?err, "direct-streamlocal tunnel ended with an error");
        }

        let _ = ctx.handle.close(channel_id).await;
    }
}
