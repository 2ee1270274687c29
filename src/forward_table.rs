//! Per-connection registry of listeners bound on behalf of a peer via `tcpip-forward` /
//! `streamlocal-forward@openssh.com`. Never process-global: each `ServerConn` owns its own table,
//! so one connection can never cancel another's bindings.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ForwardKey {
    Port(u16),
    Path(String),
}

impl std::fmt::Display for ForwardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardKey::Port(p) => write!(f, "port {p}"),
            ForwardKey::Path(p) => write!(f, "path {p}"),
        }
    }
}

/// A bound listener's accept-loop task. Aborting it drops the listener it owns, closing the bind.
struct Binding {
    accept_loop: JoinHandle<()>,
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

#[derive(Default)]
pub struct ForwardTable {
    bindings: Mutex<HashMap<ForwardKey, Binding>>,
}

impl ForwardTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new binding for `key`, closing and replacing any existing one atomically.
    pub async fn insert(&self, key: ForwardKey, accept_loop: JoinHandle<()>) {
        let mut guard = self.bindings.lock().await;
        guard.insert(key, Binding { accept_loop });
    }

    /// Removes and closes the binding for `key`, if any. Returns whether one was present.
    pub async fn remove(&self, key: &ForwardKey) -> bool {
        let mut guard = self.bindings.lock().await;
        guard.remove(key).is_some()
    }

    pub async fn contains(&self, key: &ForwardKey) -> bool {
        self.bindings.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.bindings.lock().await.len()
    }

    /// Closes every remaining binding. Called on connection teardown.
    pub async fn close_all(&self) {
        self.bindings.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spinner() -> JoinHandle<()> {
        tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        })
    }

    #[tokio::test]
    async fn insert_then_remove() {
        let table = ForwardTable::new();
        let key = ForwardKey::Port(2222);
        table.insert(key.clone(), spinner()).await;
        assert!(table.contains(&key).await);
        assert!(table.remove(&key).await);
        assert!(!table.contains(&key).await);
        assert!(!table.remove(&key).await);
    }

    #[tokio::test]
    async fn replacing_a_key_aborts_the_old_binding() {
        let table = ForwardTable::new();
        let key = ForwardKey::Path("/tmp/a.sock".into());
        let first = spinner();
        let first_id = first.id();
        table.insert(key.clone(), first).await;
        table.insert(key.clone(), spinner()).await;
        assert_eq!(table.len().await, 1);
        // first task was dropped (and thus aborted) by the replace; ids never reused while alive.
        assert_ne!(first_id, spinner().id());
    }

    #[tokio::test]
    async fn close_all_empties_the_table() {
        let table = ForwardTable::new();
        table.insert(ForwardKey::Port(1), spinner()).await;
        table.insert(ForwardKey::Port(2), spinner()).await;
        assert_eq!(table.len().await, 2);
        table.close_all().await;
        assert_eq!(table.len().await, 0);
    }
}
