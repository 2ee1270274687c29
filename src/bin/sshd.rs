//! CLI launcher for the bundled SSH daemon.
//!
//! Flag surface and shutdown shape grounded on `warpgate-cli/src/main.rs`'s `clap::Parser` derive
//! style and `warpgate/src/main.rs`'s `#[tokio::main]` + `tracing_subscriber` wiring, cut down to
//! this crate's scope: no subcommands, just the daemon itself.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sshd::authorized_keys::AuthorizedKeysIndex;
use sshd::keys;
use sshd::server::{Credentials, Server};

/// An embeddable SSH server: local command execution plus TCP/Unix forwarding in both
/// directions.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Listen address, e.g. `127.0.0.1:2222` or `:22` for "any interface, port 22".
    #[clap(short = 'a', long = "addr", default_value = ":22")]
    addr: String,

    /// Username required for password/public-key authentication. If neither this nor `-f` is
    /// set, clients are admitted with no authentication at all.
    #[clap(short = 'u', long = "user")]
    user: Option<String>,

    /// Password accepted for the configured user.
    #[clap(short = 'p', long = "password")]
    password: Option<String>,

    /// Path to an `authorized_keys` file accepted for the configured user.
    #[clap(short = 'f', long = "authorized-keys")]
    authorized_keys: Option<PathBuf>,

    /// Directory holding (or to generate) persistent Ed25519/RSA host keys. If omitted, a fresh
    /// 2048-bit RSA host key is generated in memory for this run only.
    #[clap(short = 'h', long = "host-key-dir")]
    host_key_dir: Option<PathBuf>,
}

fn parse_listen_addr(raw: &str) -> Result<SocketAddr> {
    let normalized = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_string()
    };
    normalized
        .to_socket_addrs()
        .with_context(|| format!("resolving listen address {raw}"))?
        .next()
        .with_context(|| format!("listen address {raw} resolved to no addresses"))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = run().await {
        tracing::error!(?err, "sshd exited with an error");
        eprintln!("sshd: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    sshd::logging::init_logging()?;

    let cli = Cli::parse();
    let addr = parse_listen_addr(&cli.addr)?;

    let host_keys = match &cli.host_key_dir {
        Some(dir) => keys::load_or_generate_host_keys(dir)?,
        None => vec![keys::ephemeral_rsa_host_key()?],
    };

    let authorized_keys = cli
        .authorized_keys
        .as_ref()
        .map(|path| AuthorizedKeysIndex::parse(path).map(Arc::new))
        .transpose()?;

    let credentials = if cli.user.is_none() && authorized_keys.is_none() {
        tracing::warn!("no -u/-f given: accepting every client with no authentication");
        Credentials::AllowAll
    } else {
        Credentials::Check {
            username: cli.user,
            password: cli.password,
            authorized_keys,
        }
    };

    let server = Server::builder(host_keys).credentials(credentials).build();

    tokio::select! {
        result = server.serve(addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_port_as_any_interface() {
        let addr = parse_listen_addr(":2222").unwrap();
        assert_eq!(addr.port(), 2222);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn parses_explicit_host_and_port() {
        let addr = parse_listen_addr("127.0.0.1:2222").unwrap();
        assert_eq!(addr.port(), 2222);
        assert!(addr.ip().is_loopback());
    }
}
