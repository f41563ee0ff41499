//! The pre-upgrade HTTP metadata probe (NIP-11-style relay information
//! document). Issues one GET on the raw transport, parses a minimal
//! response by hand (chunked transfer, optional gzip content-encoding),
//! and hands back the decoded document. Must leave the transport with
//! zero residual buffered bytes — the WebSocket upgrade immediately
//! follows on the same stream.

use std::io::Read;

use flate2::read::GzDecoder;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProbeError;
use crate::io_util::LineReader;

/// The only field of the relay information document the core consumes.
#[derive(Debug, Deserialize)]
pub struct RelayInfo {
    #[serde(default)]
    pub software: Option<String>,
}

pub async fn probe<T: AsyncRead + AsyncWrite + Unpin>(
    transport: &mut T,
    hostname: &str,
) -> Result<RelayInfo, ProbeError> {
    crate::io_util::write_request_lines(
        transport,
        &[
            "GET / HTTP/1.1".to_owned(),
            format!("Host: {hostname}"),
            "User-Agent: nostr-deflate-client/1.0".to_owned(),
            "Accept: application/nostr+json".to_owned(),
            "Accept-Encoding: gzip".to_owned(),
        ],
    )
    .await?;

    let mut reader = LineReader::new(transport);
    let mut chunked = false;
    let mut gzip = false;
    loop {
        let line = reader
            .read_line()
            .await?
            .ok_or(ProbeError::TruncatedHeaders)?;
        if line.is_empty() {
            break;
        }
        if let Some((key, val)) = line.split_once(':') {
            match key.trim().to_ascii_lowercase().as_str() {
                "transfer-encoding" => chunked = val.trim().eq_ignore_ascii_case("chunked"),
                "content-encoding" => gzip = val.trim().eq_ignore_ascii_case("gzip"),
                _ => {}
            }
        }
    }

    let info: RelayInfo = if chunked {
        let body = read_chunked_body(&mut reader).await?;
        decode_body(&body, gzip)?
    } else if gzip {
        decode_gzip_stream(&mut reader).await?
    } else {
        reader.decode_json().await?
    };

    if reader.residual() != 0 {
        return Err(ProbeError::ProbeResidualBytes);
    }

    Ok(info)
}

async fn read_chunked_body<T: AsyncRead + Unpin>(
    reader: &mut LineReader<'_, T>,
) -> Result<Vec<u8>, ProbeError> {
    let mut body = Vec::new();
    loop {
        let size_line = reader
            .read_line()
            .await?
            .ok_or(ProbeError::TruncatedHeaders)?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ProbeError::BadChunkSize(size_line.clone()))?;
        if size == 0 {
            // Trailing CRLF after the terminating zero-size chunk.
            reader.read_exact_bytes(2).await.ok();
            break;
        }
        let chunk = reader.read_exact_bytes(size).await?;
        body.extend_from_slice(&chunk);
        // CRLF after each chunk's data.
        reader.read_exact_bytes(2).await?;
    }
    Ok(body)
}

/// Reads bytes incrementally, attempting a gzip decode of the buffered
/// prefix after each fill, until the gzip stream itself reports a clean
/// end. Only the bytes gzip actually consumed are marked as read, so any
/// leftover bytes on the wire still count toward the zero-residual
/// invariant.
async fn decode_gzip_stream<T: AsyncRead + Unpin>(
    reader: &mut LineReader<'_, T>,
) -> Result<RelayInfo, ProbeError> {
    loop {
        if let Some((value, consumed)) = try_gzip_decode(reader.buffered()) {
            reader.advance(consumed);
            return Ok(value?);
        }
        if reader.fill_more_pub().await? == 0 {
            return Err(ProbeError::TruncatedHeaders);
        }
    }
}

/// Attempts a full gzip decode + JSON parse of `buffered`. Returns `None`
/// if the compressed stream is not yet complete (more bytes needed);
/// returns `Some((result, bytes_consumed))` once gzip reports a clean EOF.
fn try_gzip_decode(
    buffered: &[u8],
) -> Option<(Result<RelayInfo, ProbeError>, usize)> {
    let cursor = std::io::Cursor::new(buffered);
    let mut decoder = GzDecoder::new(cursor);
    let mut decompressed = Vec::new();
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => {
            let consumed = decoder.into_inner().position() as usize;
            let parsed = serde_json::from_slice(&decompressed).map_err(ProbeError::from);
            Some((parsed, consumed))
        }
        Err(_) => None,
    }
}

fn decode_body(body: &[u8], gzip: bool) -> Result<RelayInfo, ProbeError> {
    if gzip {
        let mut decoder = GzDecoder::new(body);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(ProbeError::Gzip)?;
        Ok(serde_json::from_slice(&decompressed)?)
    } else {
        Ok(serde_json::from_slice(body)?)
    }
}
