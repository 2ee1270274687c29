//! Per-connection capability oracle consulted by every request/channel handler before any
//! externally visible side effect (dial, bind, exec).

use std::sync::Arc;

type Predicate = dyn Fn(&str, &str) -> bool + Send + Sync;

/// Grants or denies `(verb, argument)` pairs for one connection's lifetime. A `Permissions` wraps
/// no predicate only via [`Permissions::allow_all`], matching the "nil permissions" convention of
/// allow-everything; once attached to a `ServerConn` it is never mutated.
#[derive(Clone)]
pub struct Permissions {
    predicate: Option<Arc<Predicate>>,
}

impl Permissions {
    /// Builds a `Permissions` from an arbitrary predicate.
    pub fn new(predicate: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Some(Arc::new(predicate)),
        }
    }

    /// A `Permissions` that allows every verb/argument pair.
    pub fn allow_all() -> Self {
        Self { predicate: None }
    }

    /// A `Permissions` that denies every verb/argument pair.
    pub fn deny_all() -> Self {
        Self::new(|_, _| false)
    }

    pub fn allow(&self, verb: &str, argument: &str) -> bool {
        match &self.predicate {
            None => true,
            Some(p) => p(verb, argument),
        }
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl std::fmt::Debug for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permissions")
            .field("custom", &self.predicate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows_everything() {
        let p = Permissions::allow_all();
        assert!(p.allow("session", ""));
        assert!(p.allow("direct-tcpip", "example.com:443"));
    }

    #[test]
    fn deny_all_denies_everything() {
        let p = Permissions::deny_all();
        assert!(!p.allow("session", ""));
    }

    #[test]
    fn custom_predicate_is_consulted() {
        let p = Permissions::new(|verb, arg| verb == "direct-tcpip" && arg == "example.com:443");
        assert!(p.allow("direct-tcpip", "example.com:443"));
        assert!(!p.allow("direct-tcpip", "evil.example:443"));
        assert!(!p.allow("session", ""));
    }
}
