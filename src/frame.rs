//! The WebSocket frame codec: header parsing, mask XOR, fragmentation
//! across continuation frames, and interleaved control frames. This is the
//! hand-rolled heart of the duplex pipeline — no WebSocket library is used
//! anywhere in this crate.

use std::sync::Arc;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::FrameError;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub mask: [u8; 4],
    pub len: u64,
}

fn unmask(buf: &mut [u8], mask: [u8; 4], start_offset: usize) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= mask[(start_offset + i) % 4];
    }
}

pub async fn read_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<FrameHeader, FrameError> {
    let mut first_two = [0u8; 2];
    r.read_exact(&mut first_two)
        .await
        .map_err(|_| FrameError::TransportClosed)?;
    let fin = first_two[0] & 0x80 != 0;
    let rsv1 = first_two[0] & 0x40 != 0;
    let opcode = OpCode::from_byte(first_two[0] & 0x0F)?;
    let masked = first_two[1] & 0x80 != 0;
    let len7 = first_two[1] & 0x7F;

    let len = match len7 {
        126 => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b).await.map_err(|_| FrameError::TransportClosed)?;
            u16::from_be_bytes(b) as u64
        }
        127 => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b).await.map_err(|_| FrameError::TransportClosed)?;
            u64::from_be_bytes(b)
        }
        n => n as u64,
    };

    let mask = if masked {
        let mut m = [0u8; 4];
        r.read_exact(&mut m).await.map_err(|_| FrameError::TransportClosed)?;
        m
    } else {
        [0u8; 4]
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::ReservedBitOnControl);
        }
        if rsv1 {
            return Err(FrameError::ReservedBitOnControl);
        }
        if len > 125 {
            return Err(FrameError::ControlFrameTooLarge);
        }
    }

    Ok(FrameHeader {
        fin,
        rsv1,
        opcode,
        masked,
        mask,
        len,
    })
}

/// Reads exactly `header.len` payload bytes, unmasking in place, and
/// appends them to `out`. The unconditional unmask path matches the
/// wire codec even though server-to-client frames are never masked in
/// practice.
pub async fn read_payload<R: AsyncRead + Unpin>(
    r: &mut R,
    header: &FrameHeader,
    out: &mut Vec<u8>,
) -> Result<(), FrameError> {
    let mut remaining = header.len;
    let mut offset: usize = 0;
    let mut chunk = [0u8; READ_CHUNK];
    while remaining > 0 {
        let want = remaining.min(READ_CHUNK as u64) as usize;
        r.read_exact(&mut chunk[..want])
            .await
            .map_err(|_| FrameError::TransportClosed)?;
        if header.masked {
            unmask(&mut chunk[..want], header.mask, offset);
        }
        out.extend_from_slice(&chunk[..want]);
        offset += want;
        remaining -= want as u64;
    }
    Ok(())
}

fn encode_header(opcode: OpCode, rsv1: bool, payload_len: usize, mask: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(14);
    let byte0 = 0x80 | (if rsv1 { 0x40 } else { 0 }) | opcode.to_byte();
    out.push(byte0);
    if payload_len < 126 {
        out.push(0x80 | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        out.push(0x80 | 126);
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        out.push(0x80 | 127);
        out.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }
    out.extend_from_slice(&mask);
    out
}

/// Masks `payload` with a freshly chosen 32-bit key and writes one
/// complete frame. Used for application messages, pings, pongs, and the
/// close frame — every client-to-server frame is masked.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    opcode: OpCode,
    rsv1: bool,
    payload: &[u8],
) -> Result<(), FrameError> {
    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);
    let mut masked_payload = payload.to_vec();
    unmask(&mut masked_payload, mask, 0);
    let header = encode_header(opcode, rsv1, payload.len(), mask);
    w.write_all(&header).await?;
    w.write_all(&masked_payload).await?;
    w.flush().await?;
    Ok(())
}

/// Writes a frame through a write half shared with the keepalive task;
/// the lock is held only across this one frame write, per the resource
/// policy — frames are never interleaved on the wire.
pub async fn write_frame_locked<W: AsyncWrite + Unpin>(
    w: &Arc<Mutex<W>>,
    opcode: OpCode,
    rsv1: bool,
    payload: &[u8],
) -> Result<(), FrameError> {
    let mut guard = w.lock().await;
    write_frame(&mut *guard, opcode, rsv1, payload).await
}

/// One fully reassembled application message, or a signal that the
/// connection ended.
#[derive(Debug)]
pub enum InboundEvent {
    Message { compressed: bool, payload: Vec<u8> },
    Closed { code: u16 },
}

/// Reads and reassembles frames into whole application messages,
/// transparently handling interleaved control frames (replying to pings,
/// logging pongs, surfacing close). Owned by exactly one task.
pub struct FrameReceiver<R> {
    reader: R,
    message_buf: Vec<u8>,
    control_buf: Vec<u8>,
    compressed_latch: bool,
    in_progress: bool,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            message_buf: Vec::new(),
            control_buf: Vec::new(),
            compressed_latch: false,
            in_progress: false,
        }
    }

    /// Reads frames until one full application message is reassembled, a
    /// close frame arrives, or the transport ends. `writer` is used only to
    /// reply to pings.
    pub async fn next_event<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &Arc<Mutex<W>>,
    ) -> Result<Option<InboundEvent>, FrameError> {
        loop {
            let header = match read_header(&mut self.reader).await {
                Ok(h) => h,
                Err(FrameError::TransportClosed) => return Ok(None),
                Err(e) => return Err(e),
            };

            if header.opcode.is_control() {
                self.control_buf.clear();
                read_payload(&mut self.reader, &header, &mut self.control_buf).await?;
                match header.opcode {
                    OpCode::Close => {
                        let code = if self.control_buf.len() >= 2 {
                            u16::from_be_bytes([self.control_buf[0], self.control_buf[1]])
                        } else {
                            0
                        };
                        return Ok(Some(InboundEvent::Closed { code }));
                    }
                    OpCode::Ping => {
                        write_frame_locked(writer, OpCode::Pong, false, &self.control_buf).await?;
                    }
                    OpCode::Pong => {}
                    _ => unreachable!("is_control() only matches Close/Ping/Pong"),
                }
                continue;
            }

            if header.opcode != OpCode::Continuation {
                self.compressed_latch = header.rsv1;
            } else if !self.in_progress {
                return Err(FrameError::UnexpectedContinuation);
            }
            self.in_progress = true;

            read_payload(&mut self.reader, &header, &mut self.message_buf).await?;

            if header.fin {
                self.in_progress = false;
                let payload = std::mem::take(&mut self.message_buf);
                let compressed = self.compressed_latch;
                return Ok(Some(InboundEvent::Message { compressed, payload }));
            }
        }
    }
}
