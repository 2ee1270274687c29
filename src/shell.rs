//! The user-overridable `shell` hook invoked for a session channel's `shell` request.
//!
//! Grounded on spec §9 "Shell hook": the default implementation always fails with "not
//! supported", matching the teacher's scope (no interactive shell is part of this crate), but the
//! hook itself is a trait object so an embedder can plug in a real one without forking the crate.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::channel_writer::ChannelWriter;
use crate::session_state::{PtyRequest, WindowChangeReceiver};

/// Everything a `Shell` implementation needs to drive an interactive session: the merged
/// environment, working directory, the `pty-req` details (if any), a receiver for subsequent
/// `window-change` notifications, a writer for the channel's stdout/stderr, and the stream of
/// bytes the client sends as channel data (its stdin).
pub struct ShellContext {
    pub environment: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
    pub pty: Option<PtyRequest>,
    pub window_change: Option<WindowChangeReceiver>,
    pub writer: ChannelWriter,
    pub stdin: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
pub trait Shell: Send + Sync {
    async fn run(&self, ctx: ShellContext) -> std::io::Result<()>;
}

/// The built-in default: every `shell` request fails.
pub struct UnsupportedShell;

#[async_trait]
impl Shell for UnsupportedShell {
    async fn run(&self, _ctx: ShellContext) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "not supported"))
    }
}
