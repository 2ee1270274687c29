//! `direct-tcpip` channel handler: the client asks us to dial a TCP endpoint on its behalf and
//! tunnels its channel traffic through it.
//!
//! Grounded on spec §4.F; the dial-then-tunnel shape follows
//! `warpgate-protocol-ssh/src/client/channel_direct_tcpip.rs`, generalized to dial directly
//! (via the configured [`crate::conn::TcpConnector`]) instead of proxying through a remote client.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel_stream::ChannelStream;
use crate::channel_writer::ChannelWriter;
use crate::conn::{ConnContext, NewChannel};
use crate::messages::ChannelOpenDirectMsg;
use crate::registry::{ChannelHandler, HandlerRegistry};
use crate::tunnel::tunnel;

pub const CHANNEL_TYPE: &str = "direct-tcpip";

pub(crate) fn register(registry: &mut HandlerRegistry) {
    registry.register_channel(CHANNEL_TYPE, Arc::new(DirectTcpIpHandler));
}

struct DirectTcpIpHandler;

#[async_trait]
impl ChannelHandler for DirectTcpIpHandler {
    async fn handle(&self, new_channel: NewChannel, ctx: Arc<ConnContext>) {
        let NewChannel {
            channel_id,
            params,
            events,
            decision,
            ..
        } = new_channel;

        let parsed = match ChannelOpenDirectMsg::decode(params) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("malformed direct-tcpip channel-open payload");
                let _ = decision.send(false);
                return;
            }
        };

        let destination = format!("{}:{}", parsed.remote_addr, parsed.remote_port);
        if !ctx.permissions.allow(CHANNEL_TYPE, &destination) {
            tracing::debug!(%destination, "direct-tcpip denied by permissions");
            let _ = decision.send(false);
            return;
        }

        let port = match u16::try_from(parsed.remote_port) {
            Ok(port) => port,
            Err(_) => {
                let _ = decision.send(false);
                return;
            }
        };

        let dialed = match ctx.dialer.connect(&parsed.remote_addr, port).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%destination, ?err, "direct-tcpip dial failed");
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
            tracing::warn!(%destination, ?err, "direct-tcpip tunnel ended with an error");
        }

        let _ = ctx.handle.close(channel_id).await;
    }
}
