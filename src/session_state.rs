//! Per session-channel state: cached PTY request, environment, window-change notifications, and
//! the cancellation handle an in-flight `exec` is torn down with.
//!
//! The `PtyRequest` shape mirrors `warpgate-protocol-ssh/src/common.rs`'s `PtyRequest` struct.

use tokio::sync::watch;

use crate::messages::{PtyRequestMsg, PtyWindowChangeMsg};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub col_width: u32,
    pub row_height: u32,
    pub pix_width: u32,
    pub pix_height: u32,
    pub modes: Vec<u8>,
}

impl From<&PtyRequestMsg> for PtyRequest {
    fn from(msg: &PtyRequestMsg) -> Self {
        Self {
            term: msg.term.clone(),
            col_width: msg.cols,
            row_height: msg.rows,
            pix_width: msg.width_px,
            pix_height: msg.height_px,
            modes: msg.modes.to_vec(),
        }
    }
}

/// A lightweight cooperative cancellation handle: `cancel()` trips the flag and wakes every
/// clone's `cancelled()` waiter. No external crate dependency is taken for this since the need is
/// this one bit of state, not a hierarchy of tokens.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel()` has been called (immediately, if already cancelled).
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One size-1, drop-oldest slot: a resize that arrives before the previous one is consumed simply
/// overwrites it, since only the most recent terminal size ever matters.
pub struct WindowChangeChannel {
    tx: watch::Sender<PtyWindowChangeMsg>,
}

pub struct WindowChangeReceiver {
    rx: watch::Receiver<PtyWindowChangeMsg>,
}

impl WindowChangeChannel {
    pub fn new(initial: PtyWindowChangeMsg) -> (Self, WindowChangeReceiver) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, WindowChangeReceiver { rx })
    }

    pub fn send(&self, msg: PtyWindowChangeMsg) {
        let _ = self.tx.send(msg);
    }
}

impl WindowChangeReceiver {
    pub async fn changed(&mut self) -> PtyWindowChangeMsg {
        let _ = self.rx.changed().await;
        *self.rx.borrow()
    }
}

pub struct SessionState {
    pub pty: Option<PtyRequest>,
    pub environment: Vec<(String, String)>,
    pub window_change: Option<WindowChangeChannel>,
    /// The receiving half of `window_change`, held here until a `shell` request claims it via
    /// [`SessionState::take_window_change_receiver`].
    window_change_rx: Option<WindowChangeReceiver>,
    pub cancel: CancelHandle,
}

impl SessionState {
    pub fn new(inherited_env: Vec<(String, String)>) -> Self {
        Self {
            pty: None,
            environment: inherited_env,
            window_change: None,
            window_change_rx: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Hands the `window-change` receiver to its caller (the `shell` hook), leaving `None` behind
    /// so a second `shell` request on the same channel doesn't get a stale clone.
    pub fn take_window_change_receiver(&mut self) -> Option<WindowChangeReceiver> {
        self.window_change_rx.take()
    }

    /// `env NAME=v1` then `env NAME=v2` replaces the existing entry in place rather than
    /// appending a duplicate.
    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.environment.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            self.environment.push((name, value));
        }
    }

    pub fn apply_pty(&mut self, msg: &PtyRequestMsg) {
        self.pty = Some(PtyRequest::from(msg));
        self.set_env("TERM", msg.term.clone());
        let (chan, rx) = WindowChangeChannel::new(PtyWindowChangeMsg {
            cols: msg.cols,
            rows: msg.rows,
            width_px: msg.width_px,
            height_px: msg.height_px,
        });
        self.window_change = Some(chan);
        self.window_change_rx = Some(rx);
    }

    pub fn apply_window_change(&mut self, msg: PtyWindowChangeMsg) {
        if let Some(chan) = &self.window_change {
            chan.send(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_merge_replaces_existing_entry() {
        let mut state = SessionState::new(vec![]);
        state.set_env("LANG", "C");
        state.set_env("LANG", "C.UTF-8");
        assert_eq!(
            state.environment,
            vec![("LANG".to_string(), "C.UTF-8".to_string())]
        );
    }

    #[test]
    fn env_merge_appends_new_entries() {
        let mut state = SessionState::new(vec![]);
        state.set_env("A", "1");
        state.set_env("B", "2");
        assert_eq!(
            state.environment,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn pty_request_sets_term_env() {
        let mut state = SessionState::new(vec![]);
        let msg = PtyRequestMsg {
            term: "xterm".into(),
            cols: 80,
            rows: 24,
            width_px: 0,
            height_px: 0,
            modes: bytes::Bytes::new(),
        };
        state.apply_pty(&msg);
        assert!(state.pty.is_some());
        assert_eq!(
            state.environment,
            vec![("TERM".to_string(), "xterm".to_string())]
        );
        assert!(state.window_change.is_some());
    }

    #[tokio::test]
    async fn cancel_handle_wakes_waiters() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        assert!(!handle.is_cancelled());
        handle.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("cancellation should be observed promptly")
            .unwrap();
        assert!(handle.is_cancelled());
    }
}
