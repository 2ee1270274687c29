//! The thin `russh::server::Handler` implementation that turns each transport-level callback into
//! either a [`GlobalRequest`](crate::conn::GlobalRequest) or a
//! [`NewChannel`](crate::conn::NewChannel)/[`ChannelEvent`](crate::conn::ChannelEvent), fed into
//! the per-connection multiplexer ([`crate::conn::run_multiplexer`]).
//!
//! Pattern grounded on `warpgate-protocol-ssh/src/server/russh_handler.rs`'s `ServerHandler`:
//! every trait method builds a reply channel, forwards an event, awaits the reply, then answers
//! russh through `session.channel_success`/`channel_failure`/`request_success`/`request_failure`.
//! This crate generalizes the fixed match-arm-per-callback shape of that file into dispatch
//! through a string-keyed registry (`crate::registry::HandlerRegistry`) instead.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId};
use tokio::sync::{mpsc, oneshot};

use crate::conn::{ChannelEvent, ConnContext, GlobalRequest, NewChannel, SessionRequest};
use crate::messages::{
    ChannelOpenDirectMsg, ExecMsg, ForwardMsg, PtyRequestMsg, PtyWindowChangeMsg, SetenvRequest,
    StreamLocalChannelForwardMsg, StreamLocalChannelOpenDirectMsg,
};
use crate::registry::RequestOutcome;
use crate::server::ServerShared;

/// One `HandlerAdapter` is constructed per accepted transport connection by
/// `russh::server::Server::new_client`.
pub struct HandlerAdapter {
    pub(crate) shared: Arc<ServerShared>,
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) username: Option<String>,
    pub(crate) ctx: Option<Arc<ConnContext>>,
    pub(crate) ctx_tx: Option<oneshot::Sender<Arc<ConnContext>>>,
    pub(crate) global_tx: mpsc::UnboundedSender<GlobalRequest>,
    pub(crate) channel_tx: mpsc::UnboundedSender<NewChannel>,
}

impl HandlerAdapter {
    pub fn new(shared: Arc<ServerShared>, peer_addr: Option<SocketAddr>) -> (Self, ConnReceivers) {
        let (global_tx, global_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (ctx_tx, ctx_rx) = oneshot::channel();
        (
            Self {
                shared,
                peer_addr,
                username: None,
                ctx: None,
                ctx_tx: Some(ctx_tx),
                global_tx,
                channel_tx,
            },
            ConnReceivers {
                global_rx,
                channel_rx,
                ctx_rx,
            },
        )
    }

    fn ctx(&self) -> Arc<ConnContext> {
        self.ctx
            .clone()
            .expect("ConnContext is built in auth_succeeded, before any channel/request callback")
    }

    async fn dispatch_global(&self, verb: &str, payload: Bytes) -> RequestOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = GlobalRequest {
            verb: verb.to_string(),
            payload,
            reply: reply_tx,
        };
        if self.global_tx.send(req).is_err() {
            return RequestOutcome::reject();
        }
        reply_rx.await.unwrap_or_else(|_| RequestOutcome::reject())
    }

    async fn open_channel(
        &self,
        channel_type: &str,
        channel_id: ChannelId,
        channel: Channel<Msg>,
        params: Bytes,
    ) -> bool {
        let ctx = self.ctx();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        ctx.register_channel_route(channel_id, event_tx).await;

        let (decision_tx, decision_rx) = oneshot::channel();
        let new_channel = NewChannel {
            channel_type: channel_type.to_string(),
            channel_id,
            channel,
            params,
            events: event_rx,
            decision: decision_tx,
        };
        if self.channel_tx.send(new_channel).is_err() {
            ctx.remove_channel_route(channel_id).await;
            return false;
        }
        decision_rx.await.unwrap_or(false)
    }
}

pub struct ConnReceivers {
    pub global_rx: mpsc::UnboundedReceiver<GlobalRequest>,
    pub channel_rx: mpsc::UnboundedReceiver<NewChannel>,
    pub ctx_rx: oneshot::Receiver<Arc<ConnContext>>,
}

#[async_trait]
impl russh::server::Handler for HandlerAdapter {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(self.shared.credentials.check_none(user))
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(self.shared.credentials.check_password(user, password))
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(self.shared.credentials.check_publickey(user, key))
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(self.shared.credentials.check_publickey(user, key))
    }

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        let handle = session.handle();
        let permissions = match (&self.username, &self.shared.authorization_factory) {
            (Some(user), Some(factory)) => factory(user),
            _ => crate::permissions::Permissions::allow_all(),
        };
        let ctx = Arc::new(ConnContext {
            handle,
            permissions,
            dialer: self.shared.dialer.clone(),
            unix_dialer: self.shared.unix_dialer.clone(),
            tcp_listener_factory: self.shared.tcp_listener_factory.clone(),
            unix_listener_factory: self.shared.unix_listener_factory.clone(),
            environment: self.shared.environment.clone(),
            workdir: self.shared.workdir.clone(),
            forward_table: crate::forward_table::ForwardTable::new(),
            registry: self.shared.registry.clone(),
            channel_routes: Default::default(),
            username: self.username.clone(),
            shell: self.shared.shell.clone(),
        });
        self.ctx = Some(ctx.clone());
        if let Some(tx) = self.ctx_tx.take() {
            let _ = tx.send(ctx);
        }
        tracing::info!(peer = ?self.peer_addr, user = ?self.username, "ssh authentication succeeded");
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        Ok(self.open_channel("session", id, channel, Bytes::new()).await)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let params = ChannelOpenDirectMsg {
            remote_addr: host_to_connect.to_string(),
            remote_port: port_to_connect,
            origin_addr: originator_address.to_string(),
            origin_port: originator_port,
        }
        .encode();
        Ok(self.open_channel("direct-tcpip", id, channel, params).await)
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        channel: Channel<Msg>,
        socket_path: &str,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let params = StreamLocalChannelOpenDirectMsg {
            socket_path: socket_path.to_string(),
        }
        .encode();
        Ok(self
            .open_channel("direct-streamlocal@openssh.com", id, channel, params)
            .await)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let msg = PtyRequestMsg {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
            width_px: pix_width,
            height_px: pix_height,
            modes: Bytes::new(),
        };
        self.reply_channel_request(channel, SessionRequest::Pty(msg), session)
            .await
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let msg = PtyWindowChangeMsg {
            cols: col_width,
            rows: row_height,
            width_px: pix_width,
            height_px: pix_height,
        };
        self.reply_channel_request(channel, SessionRequest::WindowChange(msg), session)
            .await
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let msg = SetenvRequest {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.reply_channel_request(channel, SessionRequest::Env(msg), session)
            .await
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reply_channel_request(channel, SessionRequest::Shell, session)
            .await
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        self.reply_channel_request(
            channel,
            SessionRequest::Exec(ExecMsg { command }),
            session,
        )
        .await
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reply_channel_request(
            channel,
            SessionRequest::Subsystem(name.to_string()),
            session,
        )
        .await
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.ctx()
            .route_channel_event(channel, ChannelEvent::Data(Bytes::copy_from_slice(data)))
            .await;
        Ok(())
    }

    async fn extended_data(
        &mut self,
        channel: ChannelId,
        code: u32,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.ctx()
            .route_channel_event(
                channel,
                ChannelEvent::ExtendedData {
                    ext: code,
                    data: Bytes::copy_from_slice(data),
                },
            )
            .await;
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.ctx().route_channel_event(channel, ChannelEvent::Eof).await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let ctx = self.ctx();
        ctx.route_channel_event(channel, ChannelEvent::Close).await;
        ctx.remove_channel_route(channel).await;
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let payload = ForwardMsg {
            bind_addr: address.to_string(),
            bind_port: *port,
        }
        .encode();
        let outcome = self.dispatch_global("tcpip-forward", payload).await;
        if outcome.accepted {
            if let Some(resp) = outcome.response {
                if let Ok(parsed) = crate::messages::ForwardResponseMsg::decode(resp) {
                    *port = parsed.bound_port;
                }
            }
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(outcome.accepted)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let payload = ForwardMsg {
            bind_addr: address.to_string(),
            bind_port: port,
        }
        .encode();
        let outcome = self.dispatch_global("cancel-tcpip-forward", payload).await;
        if outcome.accepted {
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(outcome.accepted)
    }

    async fn streamlocal_forward(
        &mut self,
        socket_path: &str,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let payload = StreamLocalChannelForwardMsg {
            socket_path: socket_path.to_string(),
        }
        .encode();
        let outcome = self
            .dispatch_global("streamlocal-forward@openssh.com", payload)
            .await;
        if outcome.accepted {
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(outcome.accepted)
    }

    async fn cancel_streamlocal_forward(
        &mut self,
        socket_path: &str,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let payload = StreamLocalChannelForwardMsg {
            socket_path: socket_path.to_string(),
        }
        .encode();
        let outcome = self
            .dispatch_global("cancel-streamlocal-forward@openssh.com", payload)
            .await;
        if outcome.accepted {
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(outcome.accepted)
    }
}

impl HandlerAdapter {
    async fn reply_channel_request(
        &self,
        channel: ChannelId,
        request: SessionRequest,
        session: &mut Session,
    ) -> Result<(), anyhow::Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ctx()
            .route_channel_event(
                channel,
                ChannelEvent::Request {
                    request,
                    reply: reply_tx,
                },
            )
            .await;
        let accepted = reply_rx.await.unwrap_or(false);
        if accepted {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }
}

impl Drop for HandlerAdapter {
    fn drop(&mut self) {
        tracing::debug!(peer = ?self.peer_addr, "ssh connection handler dropped");
    }
}
