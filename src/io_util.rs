//! A tiny buffered line/byte reader shared by the metadata probe and the
//! WebSocket upgrade. Both stages share one transport and must account
//! exactly for how many bytes they buffered but did not consume, so this
//! type exposes that count instead of hiding it behind `tokio::io::BufReader`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const FILL_CHUNK: usize = 512;

pub struct LineReader<'a, T> {
    inner: &'a mut T,
    buf: Vec<u8>,
    pos: usize,
}

impl<'a, T: AsyncRead + Unpin> LineReader<'a, T> {
    pub fn new(inner: &'a mut T) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn residual(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consumes the reader, returning whatever bytes were buffered but not
    /// read — these must be replayed to the next stage before it reads
    /// anything further from the transport.
    pub fn into_residual(self) -> Vec<u8> {
        self.buf[self.pos..].to_vec()
    }

    /// The currently-buffered, not-yet-consumed bytes.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Marks `n` buffered bytes as consumed.
    pub fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Pulls more bytes from the transport into the buffer; returns the
    /// number of bytes read (0 at EOF).
    pub async fn fill_more_pub(&mut self) -> std::io::Result<usize> {
        self.fill_more().await
    }

    async fn fill_more(&mut self) -> std::io::Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + FILL_CHUNK, 0);
        let n = self.inner.read(&mut self.buf[start..]).await?;
        self.buf.truncate(start + n);
        Ok(n)
    }

    /// Reads one line terminated by `\n`, stripping a trailing `\r` if
    /// present. Returns `Ok(None)` on EOF with no bytes read.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(nl) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let line_end = self.pos + nl;
                let mut line = self.buf[self.pos..line_end].to_vec();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.pos = line_end + 1;
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.fill_more().await? == 0 {
                if self.residual() == 0 {
                    return Ok(None);
                }
                // Partial line with no terminator before EOF.
                let line = self.buf[self.pos..].to_vec();
                self.pos = self.buf.len();
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
        }
    }

    /// Reads exactly `n` bytes, buffering more from the transport as needed.
    pub async fn read_exact_bytes(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        while self.residual() < n {
            if self.fill_more().await? == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
            }
        }
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Decodes exactly one JSON value directly off the buffered stream,
    /// pulling more bytes from the transport only as needed — mirroring
    /// `encoding/json.Decoder`'s incremental behavior in the original
    /// implementation. Whatever bytes are read but not consumed by the
    /// value remain in the buffer and count toward [`residual`].
    ///
    /// [`residual`]: Self::residual
    pub async fn decode_json<D: serde::de::DeserializeOwned>(&mut self) -> std::io::Result<D> {
        loop {
            let slice = &self.buf[self.pos..];
            if !slice.is_empty() {
                let mut stream = serde_json::Deserializer::from_slice(slice).into_iter::<D>();
                match stream.next() {
                    Some(Ok(value)) => {
                        self.pos += stream.byte_offset();
                        return Ok(value);
                    }
                    Some(Err(e)) if !e.is_eof() => {
                        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                    }
                    _ => {}
                }
            }
            if self.fill_more().await? == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
            }
        }
    }
}

/// Writes a full HTTP request line-by-line, matching the plain-text style
/// both the metadata probe and the upgrade handshake use to build requests.
pub async fn write_request_lines<T: AsyncWrite + Unpin>(
    transport: &mut T,
    lines: &[String],
) -> std::io::Result<()> {
    let mut out = Vec::new();
    for line in lines {
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    transport.write_all(&out).await?;
    transport.flush().await
}
