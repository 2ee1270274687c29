//! Process-wide `Server` configuration and the accept loop.
//!
//! `Config`/`Preferred` construction and the accept-loop shape are grounded on
//! `warpgate-protocol-ssh/src/server/mod.rs::run_server`.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::{Algorithm, HashAlg, PrivateKey, PublicKey};
use russh::server::{Auth, Config, Session};
use russh::{MethodSet, Preferred};
use tokio::net::TcpListener;

use crate::authorized_keys::AuthorizedKeysIndex;
use crate::conn::{
    self, run_multiplexer, DefaultTcpConnector, DefaultTcpListenerFactory, DefaultUnixConnector,
    DefaultUnixListenerFactory, TcpConnector, TcpListenerFactory, UnixConnector,
    UnixListenerFactory,
};
use crate::handler_adapter::HandlerAdapter;
use crate::permissions::Permissions;
use crate::registry::HandlerRegistry;
use crate::shell::{Shell, UnsupportedShell};

/// How inbound authentication is evaluated for a connection. Built from the CLI's `-u`/`-p`/`-f`
/// flags (see `bin/sshd.rs`), but constructible directly by embedders too.
pub enum Credentials {
    /// No client authentication is required at all ("NoClientAuth"): every auth callback accepts
    /// unconditionally. Selected when neither a username nor an authorized-keys file is given.
    AllowAll,
    Check {
        username: Option<String>,
        password: Option<String>,
        authorized_keys: Option<Arc<AuthorizedKeysIndex>>,
    },
}

impl Credentials {
    fn username_matches(&self, user: &str) -> bool {
        match self {
            Credentials::AllowAll => true,
            Credentials::Check { username, .. } => {
                username.as_deref().map(|u| u == user).unwrap_or(true)
            }
        }
    }

    pub(crate) fn check_none(&self, user: &str) -> Auth {
        match self {
            Credentials::AllowAll => Auth::Accept,
            Credentials::Check { .. } => reject(),
        }
        .let_if_user_mismatches(self, user)
    }

    pub(crate) fn check_password(&self, user: &str, password: &str) -> Auth {
        if !self.username_matches(user) {
            return reject();
        }
        match self {
            Credentials::AllowAll => Auth::Accept,
            Credentials::Check {
                password: Some(expected),
                ..
            } => {
                if expected == password {
                    Auth::Accept
                } else {
                    reject()
                }
            }
            Credentials::Check { password: None, .. } => reject(),
        }
    }

    pub(crate) fn check_publickey(&self, user: &str, key: &PublicKey) -> Auth {
        if !self.username_matches(user) {
            return reject();
        }
        match self {
            Credentials::AllowAll => Auth::Accept,
            Credentials::Check {
                authorized_keys: Some(index),
                ..
            } => {
                if index.contains(key).is_some() {
                    Auth::Accept
                } else {
                    reject()
                }
            }
            Credentials::Check {
                authorized_keys: None,
                ..
            } => reject(),
        }
    }

    /// Returns the `russh::MethodSet` to advertise: empty when authentication is fully disabled,
    /// else every method this crate can evaluate.
    pub(crate) fn method_set(&self) -> MethodSet {
        match self {
            Credentials::AllowAll => MethodSet::empty(),
            Credentials::Check { .. } => {
                MethodSet::from(&[russh::MethodKind::PublicKey, russh::MethodKind::Password][..])
            }
        }
    }
}

trait AuthExt {
    fn let_if_user_mismatches(self, creds: &Credentials, user: &str) -> Auth;
}

impl AuthExt for Auth {
    fn let_if_user_mismatches(self, creds: &Credentials, user: &str) -> Auth {
        if matches!(self, Auth::Accept) && !creds.username_matches(user) {
            return reject();
        }
        self
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

/// Process-wide configuration shared by every accepted connection, cloned into each
/// [`crate::conn::ConnContext`] on successful authentication.
pub struct ServerShared {
    pub registry: Arc<HandlerRegistry>,
    pub dialer: Arc<dyn TcpConnector>,
    pub unix_dialer: Arc<dyn UnixConnector>,
    pub tcp_listener_factory: Arc<dyn TcpListenerFactory>,
    pub unix_listener_factory: Arc<dyn UnixListenerFactory>,
    pub environment: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
    pub credentials: Credentials,
    pub authorization_factory: Option<Arc<dyn Fn(&str) -> Permissions + Send + Sync>>,
    pub shell: Arc<dyn Shell>,
}

/// Process-wide, long-lived SSH server. Construct once via [`Server::builder`], then call
/// [`Server::serve`].
pub struct Server {
    config: Arc<Config>,
    shared: Arc<ServerShared>,
}

pub struct ServerBuilder {
    host_keys: Vec<PrivateKey>,
    registry: Option<HandlerRegistry>,
    dialer: Arc<dyn TcpConnector>,
    unix_dialer: Arc<dyn UnixConnector>,
    tcp_listener_factory: Arc<dyn TcpListenerFactory>,
    unix_listener_factory: Arc<dyn UnixListenerFactory>,
    environment: Vec<(String, String)>,
    workdir: Option<PathBuf>,
    credentials: Credentials,
    authorization_factory: Option<Arc<dyn Fn(&str) -> Permissions + Send + Sync>>,
    inactivity_timeout: Option<Duration>,
    keepalive_interval: Option<Duration>,
    shell: Arc<dyn Shell>,
}

impl ServerBuilder {
    pub fn new(host_keys: Vec<PrivateKey>) -> Self {
        Self {
            host_keys,
            registry: None,
            dialer: Arc::new(DefaultTcpConnector),
            unix_dialer: Arc::new(DefaultUnixConnector),
            tcp_listener_factory: Arc::new(DefaultTcpListenerFactory),
            unix_listener_factory: Arc::new(DefaultUnixListenerFactory),
            environment: Vec::new(),
            workdir: None,
            credentials: Credentials::AllowAll,
            authorization_factory: None,
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            shell: Arc::new(UnsupportedShell),
        }
    }

    pub fn shell(mut self, shell: impl Shell + 'static) -> Self {
        self.shell = Arc::new(shell);
        self
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn authorization_factory(
        mut self,
        factory: impl Fn(&str) -> Permissions + Send + Sync + 'static,
    ) -> Self {
        self.authorization_factory = Some(Arc::new(factory));
        self
    }

    pub fn environment(mut self, environment: Vec<(String, String)>) -> Self {
        self.environment = environment;
        self
    }

    pub fn workdir(mut self, workdir: PathBuf) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn build(self) -> Server {
        let methods = self.credentials.method_set();
        let config = Config {
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            inactivity_timeout: self.inactivity_timeout,
            keepalive_interval: self.keepalive_interval,
            methods,
            keys: self.host_keys,
            event_buffer_size: 100,
            nodelay: true,
            preferred: Preferred {
                key: Cow::Borrowed(&[
                    Algorithm::Ed25519,
                    Algorithm::Rsa {
                        hash: Some(HashAlg::Sha512),
                    },
                    Algorithm::Rsa {
                        hash: Some(HashAlg::Sha256),
                    },
                    Algorithm::Rsa { hash: None },
                ]),
                ..Preferred::default()
            },
            ..Config::default()
        };

        crate::registry::ensure_default_registry();
        let registry = Arc::new(self.registry.unwrap_or_default());

        let shared = Arc::new(ServerShared {
            registry,
            dialer: self.dialer,
            unix_dialer: self.unix_dialer,
            tcp_listener_factory: self.tcp_listener_factory,
            unix_listener_factory: self.unix_listener_factory,
            environment: self.environment,
            workdir: self.workdir,
            credentials: self.credentials,
            authorization_factory: self.authorization_factory,
            shell: self.shell,
        });

        Server {
            config: Arc::new(config),
            shared,
        }
    }
}

impl Server {
    pub fn builder(host_keys: Vec<PrivateKey>) -> ServerBuilder {
        ServerBuilder::new(host_keys)
    }

    /// Binds `addr` and serves connections until the process is asked to stop (the returned
    /// future simply never resolves on success; cancel it, e.g. via `tokio::select!` against a
    /// shutdown signal, to stop serving).
    pub async fn serve(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "ssh server listening");
        loop {
            let (socket, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(?err, "failed to accept transport connection");
                    continue;
                }
            };
            let _ = socket.set_nodelay(true);

            let config = self.config.clone();
            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(err) =
                    serve_one_connection(config, shared, socket, Some(peer_addr)).await
                {
                    tracing::warn!(?err, ?peer_addr, "ssh connection ended with an error");
                }
            });
        }
    }
}

/// Drives one accepted transport connection: the russh handshake/session future and the
/// multiplexer run concurrently, matching `warpgate-protocol-ssh/src/server/mod.rs`'s two spawned
/// per-connection tasks (`ServerSession` future + `_run_stream`).
async fn serve_one_connection(
    config: Arc<Config>,
    shared: Arc<ServerShared>,
    socket: tokio::net::TcpStream,
    peer_addr: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let (adapter, receivers) = HandlerAdapter::new(shared, peer_addr);

    let multiplexer = tokio::spawn(async move {
        let crate::handler_adapter::ConnReceivers {
            global_rx,
            channel_rx,
            ctx_rx,
        } = receivers;
        if let Ok(ctx) = ctx_rx.await {
            run_multiplexer(ctx, global_rx, channel_rx).await;
        }
    });

    let session = russh::server::run_stream(config, socket, adapter).await?;
    session.await?;
    let _ = multiplexer.await;
    Ok(())
}
