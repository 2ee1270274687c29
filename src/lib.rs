//! An embeddable SSH connection-protocol dispatcher.
//!
//! Consumes an already-negotiated [`russh`] server transport and multiplexes its two
//! Connection Protocol streams — global requests and channel opens — into a pluggable handler
//! registry ([`registry::HandlerRegistry`]). Four built-in handlers cover the common cases:
//! local command execution (`session`), client→server TCP/Unix forwarding (`direct-tcpip`,
//! `direct-streamlocal@openssh.com`), and server→client reverse forwarding (`tcpip-forward`,
//! `streamlocal-forward@openssh.com`).
//!
//! The transport itself — key exchange, MAC, authentication callbacks — is [`russh`]'s job; this
//! crate starts once a connection has already authenticated. See [`server::Server`] for the
//! accept loop and [`server::ServerBuilder`] for wiring host keys, a dialer, a listener factory,
//! and an authorization callback.

pub mod authorized_keys;
pub mod channel_stream;
pub mod channel_writer;
pub mod closed;
pub mod conn;
pub mod error;
pub mod forward_table;
pub mod handler_adapter;
pub mod handlers;
pub mod keys;
#[cfg(feature = "cli")]
pub mod logging;
pub mod messages;
pub mod permissions;
pub mod registry;
pub mod server;
pub mod session_state;
pub mod shell;
pub mod tunnel;

pub use conn::ConnContext;
pub use permissions::Permissions;
pub use registry::HandlerRegistry;
pub use server::{Credentials, Server, ServerBuilder};
