//! The WebSocket client handshake: upgrades the transport used by the
//! metadata probe, offering `permessage-deflate` with both context-takeover
//! flags left to server discretion. Parses whatever the server grants into
//! an [`ExtensionState`].

use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::HandshakeError;
use crate::io_util::LineReader;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Fixed for the lifetime of the connection once the handshake completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionState {
    pub compression_active: bool,
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
}

pub struct HandshakeOutcome {
    pub extensions: ExtensionState,
    /// Bytes the upgrade layer read past the response headers that belong
    /// to the first WebSocket frame(s); the frame codec must consume these
    /// before reading anything further from the transport.
    pub prebuffer: Vec<u8>,
}

pub async fn upgrade<T: AsyncRead + AsyncWrite + Unpin>(
    transport: &mut T,
    hostname: &str,
) -> Result<HandshakeOutcome, HandshakeError> {
    let mut key_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

    crate::io_util::write_request_lines(
        transport,
        &[
            "GET / HTTP/1.1".to_owned(),
            format!("Host: {hostname}"),
            "Upgrade: websocket".to_owned(),
            "Connection: Upgrade".to_owned(),
            format!("Sec-WebSocket-Key: {key}"),
            "Sec-WebSocket-Version: 13".to_owned(),
            "Sec-WebSocket-Extensions: permessage-deflate".to_owned(),
            "User-Agent: nostr-deflate-client/1.0".to_owned(),
        ],
    )
    .await?;

    let mut reader = LineReader::new(transport);
    let status_line = reader
        .read_line()
        .await?
        .ok_or_else(|| HandshakeError::NotUpgraded(String::new()))?;
    if !status_line.contains("101") {
        return Err(HandshakeError::NotUpgraded(status_line));
    }

    let mut accept = None;
    let mut extensions_header = None;
    loop {
        let line = reader
            .read_line()
            .await?
            .ok_or_else(|| HandshakeError::NotUpgraded("truncated headers".to_owned()))?;
        if line.is_empty() {
            break;
        }
        if let Some((key, val)) = line.split_once(':') {
            match key.trim().to_ascii_lowercase().as_str() {
                "sec-websocket-accept" => accept = Some(val.trim().to_owned()),
                "sec-websocket-extensions" => extensions_header = Some(val.trim().to_owned()),
                _ => {}
            }
        }
    }

    let expected_accept = expected_accept_value(&key);
    if accept.as_deref() != Some(expected_accept.as_str()) {
        return Err(HandshakeError::BadAccept);
    }

    let extensions = match extensions_header {
        Some(header) => parse_extensions(&header)?,
        None => ExtensionState::default(),
    };

    Ok(HandshakeOutcome {
        extensions,
        prebuffer: reader.into_residual(),
    })
}

fn expected_accept_value(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Parses a `Sec-WebSocket-Extensions` header value, token by token. The
/// first token whose name exactly matches `permessage-deflate` sets
/// `compression_active`; its parameters set the two takeover flags. If
/// more than one token matches with contradicting takeover parameters,
/// the response is rejected as a mismatch the client cannot honor.
fn parse_extensions(header: &str) -> Result<ExtensionState, HandshakeError> {
    let mut matches: Vec<(bool, bool)> = Vec::new();
    for offer in header.split(',') {
        let mut parts = offer.split(';').map(str::trim);
        let name = parts.next().unwrap_or("");
        if name != "permessage-deflate" {
            continue;
        }
        let mut client_nct = false;
        let mut server_nct = false;
        for param in parts {
            let pname = param.split('=').next().unwrap_or("").trim();
            match pname {
                "client_no_context_takeover" => client_nct = true,
                "server_no_context_takeover" => server_nct = true,
                _ => {}
            }
        }
        matches.push((client_nct, server_nct));
    }

    match matches.as_slice() {
        [] => Ok(ExtensionState::default()),
        [(client_nct, server_nct)] => Ok(ExtensionState {
            compression_active: true,
            client_no_context_takeover: *client_nct,
            server_no_context_takeover: *server_nct,
        }),
        _ => {
            let first = matches[0];
            if matches.iter().all(|m| *m == first) {
                Ok(ExtensionState {
                    compression_active: true,
                    client_no_context_takeover: first.0,
                    server_no_context_takeover: first.1,
                })
            } else {
                Err(HandshakeError::ExtensionMismatch(header.to_owned()))
            }
        }
    }
}
