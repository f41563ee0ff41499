//! Error types for every pipeline stage, composing into [`ClientError`] at
//! the process boundary. Each stage gets its own enum so call sites can
//! match on the failure they actually care about; `main` only needs the
//! composed type to decide an exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid scheme {0:?}: expected \"ws\" or \"wss\"")]
    InvalidScheme(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("filter JSON on stdin could not be parsed: {0}")]
    FilterJson(#[from] serde_json::Error),
    #[error("failed to read filter document from stdin: {0}")]
    FilterRead(std::io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("DNS resolution failed for {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },
    #[error("TCP connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        source: std::io::Error,
    },
    #[error("transport closed unexpectedly: {0}")]
    Closed(std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("transport error during metadata probe: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata probe response ended before headers terminated")]
    TruncatedHeaders,
    #[error("chunked transfer-encoding had a malformed chunk size line: {0:?}")]
    BadChunkSize(String),
    #[error("gzip-decoding the probe body failed: {0}")]
    Gzip(std::io::Error),
    #[error("metadata probe body was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("residual bytes remained buffered after the metadata probe")]
    ProbeResidualBytes,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("transport error during WebSocket upgrade: {0}")]
    Io(#[from] std::io::Error),
    #[error("server did not respond with HTTP 101 Switching Protocols (got {0:?})")]
    NotUpgraded(String),
    #[error("server's Sec-WebSocket-Accept value did not match the expected digest")]
    BadAccept,
    #[error(
        "server returned more than one contradictory permessage-deflate acceptance: {0:?}"
    )]
    ExtensionMismatch(String),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("transport closed mid-frame")]
    TransportClosed,
    #[error("reserved bit set on a control frame")]
    ReservedBitOnControl,
    #[error("control frame payload exceeded 125 bytes")]
    ControlFrameTooLarge,
    #[error("unknown or unsupported opcode: {0:#x}")]
    UnknownOpcode(u8),
    #[error("continuation frame received with no message in progress")]
    UnexpectedContinuation,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("server message was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server message array was empty")]
    EmptyMessage,
    #[error("server message tag was not a string")]
    TagNotString,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to generate an ephemeral keypair: {0}")]
    KeyGeneration(String),
    #[error("failed to sign the authentication event: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create output file {path:?}: {source}")]
    Create {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write event to output: {0}")]
    Write(#[from] std::io::Error),
}

/// Top-level error composed from every stage; this is what `main` matches
/// on to decide the process exit code.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    /// The relay dropped the TCP/TLS stream without sending a WebSocket
    /// close frame first. Per spec this is logged and treated as a clean
    /// exit, never propagated as a crash — surfaced here only so `main`
    /// can log the distinct message before exiting 0.
    #[error("relay closed the connection ungracefully")]
    UngracefulClose,
}

impl ClientError {
    /// Maps this error onto a process exit code per the propagation policy:
    /// pre-connection and protocol failures are non-zero, an ungraceful
    /// mid-stream close is zero (it is logged, not fatal).
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::UngracefulClose => 0,
            _ => 1,
        }
    }
}
