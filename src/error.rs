use std::io;

/// Errors surfaced by the per-connection machinery.
#[derive(thiserror::Error, Debug)]
pub enum ConnError {
    #[error("handshake failed: {0}")]
    Handshake(#[source] russh::Error),

    #[error("channel rejected: {0}")]
    ChannelRejected(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the reverse-forward engine.
#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("listener bind failed: {0}")]
    Bind(#[source] io::Error),

    #[error("forward denied")]
    Denied,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors from the session-channel state machine.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("malformed request payload")]
    Malformed,

    #[error("command line could not be parsed: {0}")]
    BadCommandLine(#[from] shell_words::ParseError),

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors from host-key loading/generation.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: russh::keys::Error,
    },

    #[error("failed to write key file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("key material invalid: {0}")]
    Invalid(#[source] russh::keys::Error),
}
