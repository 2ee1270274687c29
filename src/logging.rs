//! `tracing-subscriber` wiring for the CLI binary.
//!
//! Grounded on `warpgate/src/logging.rs`'s `init_logging`: an `EnvFilter` honoring `RUST_LOG`, a
//! `fmt::layer()` with a local-time `OffsetTime` timer, colors gated on `console::user_attended()`.
//! Trimmed to this crate's scope — no JSON/database/socket log sinks, since those are
//! `warpgate-core`/`warpgate-common` features this crate has no counterpart for.

use anyhow::Result;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing` subscriber. Must only be called once, by the binary's
/// `main` — a library crate embedding [`crate::server::Server`] directly is expected to wire its
/// own subscriber.
pub fn init_logging() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "sshd=info");
    }

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let enable_colors = console::user_attended();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(enable_colors)
        .with_timer(OffsetTime::new(offset, Rfc3339))
        .init();

    Ok(())
}
