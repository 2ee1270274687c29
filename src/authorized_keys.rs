//! Parses an OpenSSH `authorized_keys` file into an in-memory index consulted by
//! [`crate::server::Credentials::check_publickey`].
//!
//! Grounded on the host/private-key handling shape of `warpgate-protocol-ssh/src/keys.rs` (same
//! `russh::keys`/`ssh_key` stack, just the public-key/parse side of it instead of the
//! private-key/load side).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use russh::keys::{Algorithm, PublicKey};

/// One OpenSSH public key per line, `#`-prefixed and blank lines skipped, keyed by
/// `(algorithm, base64 of the key's wire form)` so lookup doesn't depend on the trailing comment.
pub struct AuthorizedKeysIndex {
    entries: HashMap<(Algorithm, String), String>,
}

impl AuthorizedKeysIndex {
    pub fn parse(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading authorized_keys at {}", path.display()))?;

        let mut entries = HashMap::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match PublicKey::from_openssh(line) {
                Ok(key) => {
                    let (algorithm, encoded) = key_identity(&key)?;
                    entries.insert((algorithm, encoded), key.comment().to_string());
                }
                Err(err) => {
                    tracing::warn!(line = lineno + 1, ?err, "skipping unparsable authorized_keys entry");
                }
            }
        }

        Ok(Self { entries })
    }

    pub fn contains(&self, key: &PublicKey) -> Option<&str> {
        let (algorithm, encoded) = key_identity(key).ok()?;
        self.entries.get(&(algorithm, encoded)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `to_openssh()` re-encodes the key's algorithm + base64 body deterministically regardless of the
/// comment attached to it, so two `PublicKey`s with the same material but different comments
/// collapse to the same identity.
fn key_identity(key: &PublicKey) -> Result<(Algorithm, String)> {
    let encoded = key.to_openssh().context("encoding public key")?;
    let base64 = encoded
        .split_whitespace()
        .nth(1)
        .context("malformed openssh public key encoding")?
        .to_string();
    Ok((key.algorithm(), base64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ED25519_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ alice@example.com";

    fn write_temp(contents: &str) -> tempfile_path::TempPath {
        tempfile_path::TempPath::with_contents(contents)
    }

    mod tempfile_path {
        use std::path::{Path, PathBuf};

        pub struct TempPath(PathBuf);

        impl TempPath {
            pub fn with_contents(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("sshd-authorized-keys-test-{}", uuid::Uuid::new_v4()));
                std::fs::write(&path, contents).unwrap();
                Self(path)
            }
        }

        impl AsRef<Path> for TempPath {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn parses_one_key_per_line_skipping_blanks_and_comments() {
        let contents = format!("# a comment\n\n{ED25519_KEY}\n");
        let path = write_temp(&contents);
        let index = AuthorizedKeysIndex::parse(path.as_ref()).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn contains_matches_by_key_material_not_comment() {
        let contents = format!("{ED25519_KEY}\n");
        let path = write_temp(&contents);
        let index = AuthorizedKeysIndex::parse(path.as_ref()).unwrap();

        let key = PublicKey::from_openssh("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ bob@elsewhere").unwrap();
        assert_eq!(index.contains(&key), Some("alice@example.com"));
    }

    #[test]
    fn unknown_key_is_absent() {
        let path = write_temp("");
        let index = AuthorizedKeysIndex::parse(path.as_ref()).unwrap();
        let key = PublicKey::from_openssh(ED25519_KEY).unwrap();
        assert_eq!(index.contains(&key), None);
    }
}
