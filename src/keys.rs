//! Host-key loading and generation.
//!
//! Grounded on `warpgate-protocol-ssh/src/keys.rs`'s `generate_host_keys`/`load_host_keys` pair
//! (one Ed25519 key, one RSA key, generate-if-missing then load), ported onto the current
//! `russh::keys` API (`PrivateKey::random`/`random_rsa`, `load_secret_key`, `PrivateKey::to_openssh`).

use std::fs;
use std::path::Path;

use russh::keys::{Algorithm, PrivateKey};

use crate::error::KeyError;

const ED25519_FILENAME: &str = "host-ed25519";
const RSA_FILENAME: &str = "host-rsa";
const RSA_BITS: usize = 2048;

/// Loads the Ed25519 and RSA-2048 host keys under `dir`, generating and persisting (as PEM)
/// whichever one of the two is missing.
pub fn load_or_generate_host_keys(dir: &Path) -> Result<Vec<PrivateKey>, KeyError> {
    fs::create_dir_all(dir).map_err(|source| KeyError::Write {
        path: dir.display().to_string(),
        source,
    })?;

    let ed25519_path = dir.join(ED25519_FILENAME);
    let ed25519 = load_or_generate(&ed25519_path, || {
        PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).map_err(KeyError::Invalid)
    })?;

    let rsa_path = dir.join(RSA_FILENAME);
    let rsa = load_or_generate(&rsa_path, || {
        PrivateKey::random_rsa(&mut rand::thread_rng(), RSA_BITS).map_err(KeyError::Invalid)
    })?;

    Ok(vec![ed25519, rsa])
}

/// A fresh, unpersisted 2048-bit RSA host key, generated once per process launch. Used when no
/// `-h` directory is configured at all.
pub fn ephemeral_rsa_host_key() -> Result<PrivateKey, KeyError> {
    PrivateKey::random_rsa(&mut rand::thread_rng(), RSA_BITS).map_err(KeyError::Invalid)
}

fn load_or_generate(
    path: &Path,
    generate: impl FnOnce() -> Result<PrivateKey, KeyError>,
) -> Result<PrivateKey, KeyError> {
    if path.exists() {
        return russh::keys::load_secret_key(path, None).map_err(|source| KeyError::Read {
            path: path.display().to_string(),
            source,
        });
    }

    let key = generate()?;
    let pem = key
        .to_openssh(russh::keys::ssh_key::LineEnding::LF)
        .map_err(KeyError::Invalid)?;
    fs::write(path, pem.as_bytes()).map_err(|source| KeyError::Write {
        path: path.display().to_string(),
        source,
    })?;
    tracing::info!(path = %path.display(), algorithm = %key.algorithm(), "generated host key");
    Ok(key)
}
