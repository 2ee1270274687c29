//! Channel-type and request-verb handler registries.
//!
//! A process-wide default registry is populated by the built-in handler modules at startup
//! (`register_builtin_handlers`), mirroring how `warpgate-protocol-ssh/src/server/mod.rs` wires a
//! fixed set of channel types into one `run_server` call — generalized here into an explicit,
//! pluggable table so an embedder can add channel types/verbs without forking this crate. A
//! [`Server`](crate::server::Server) may carry its own [`HandlerRegistry`] which is consulted
//! first and falls back to the global default for anything it doesn't itself contain.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::conn::{ConnContext, NewChannel};

/// Outcome of a global request: whether it was accepted, and an optional response payload (used
/// only by `tcpip-forward` to carry back the bound port when port 0 was requested).
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub accepted: bool,
    pub response: Option<Bytes>,
}

impl RequestOutcome {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            response: None,
        }
    }

    pub fn accept_with(response: Bytes) -> Self {
        Self {
            accepted: true,
            response: Some(response),
        }
    }

    pub fn reject() -> Self {
        Self {
            accepted: false,
            response: None,
        }
    }
}

#[async_trait]
pub trait ChannelHandler: Send + Sync {
    async fn handle(&self, new_channel: NewChannel, ctx: Arc<ConnContext>);
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, verb: &str, payload: Bytes, ctx: Arc<ConnContext>) -> RequestOutcome;
}

#[derive(Default)]
pub struct HandlerRegistry {
    channel_handlers: HashMap<String, Arc<dyn ChannelHandler>>,
    request_handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_channel(&mut self, channel_type: impl Into<String>, handler: Arc<dyn ChannelHandler>) {
        self.channel_handlers.insert(channel_type.into(), handler);
    }

    pub fn register_request(&mut self, verb: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.request_handlers.insert(verb.into(), handler);
    }

    pub fn channel_handler(&self, channel_type: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.channel_handlers
            .get(channel_type)
            .cloned()
            .or_else(|| default_registry().channel_handlers.get(channel_type).cloned())
    }

    pub fn request_handler(&self, verb: &str) -> Option<Arc<dyn RequestHandler>> {
        self.request_handlers
            .get(verb)
            .cloned()
            .or_else(|| default_registry().request_handlers.get(verb).cloned())
    }
}

static DEFAULT_REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();

fn default_registry() -> &'static HandlerRegistry {
    DEFAULT_REGISTRY.get_or_init(build_default_registry)
}

/// Builds the process-wide registry of built-in handlers. Called lazily on first use; a `Server`
/// built with [`HandlerRegistry::default`] and no overrides falls back entirely to this table.
fn build_default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    crate::handlers::session::register(&mut registry);
    crate::handlers::direct_tcpip::register(&mut registry);
    crate::handlers::direct_streamlocal::register(&mut registry);
    crate::handlers::tcpip_forward::register(&mut registry);
    crate::handlers::streamlocal_forward::register(&mut registry);
    registry
}

/// Forces initialization of the default registry. Exposed so a `Server` can eagerly validate
/// wiring at startup rather than on first connection.
pub fn ensure_default_registry() {
    default_registry();
}
