//! Inbound decompression stage. Present only when compression is active;
//! wraps the reassembled application payload with a raw-DEFLATE decoder
//! whose reset policy depends on the server's context-takeover flag.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::FrameError;

/// The empty non-final stored block the permessage-deflate extension
/// trims from the wire; the decoder must add it back before decompressing.
const SYNC_FLUSH_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

pub struct InboundDecompressor {
    decompress: Decompress,
    server_no_context_takeover: bool,
}

impl InboundDecompressor {
    pub fn new(server_no_context_takeover: bool) -> Self {
        Self {
            decompress: Decompress::new(false),
            server_no_context_takeover,
        }
    }

    /// Decompresses one full compressed message. If the server negotiated
    /// no context takeover, the sliding window is cleared once this
    /// message's bytes are fully consumed.
    pub fn decode_message(&mut self, compressed: &[u8]) -> Result<Vec<u8>, FrameError> {
        let mut input = Vec::with_capacity(compressed.len() + 4);
        input.extend_from_slice(compressed);
        input.extend_from_slice(&SYNC_FLUSH_TRAILER);

        let mut output = Vec::new();
        let mut out_chunk = vec![0u8; 4096];
        let mut input_pos = 0usize;
        loop {
            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(&input[input_pos..], &mut out_chunk, FlushDecompress::Sync)
                .map_err(|e| FrameError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            let consumed = (self.decompress.total_in() - in_before) as usize;
            let produced = (self.decompress.total_out() - out_before) as usize;
            input_pos += consumed;
            output.extend_from_slice(&out_chunk[..produced]);

            if status == Status::StreamEnd || input_pos >= input.len() {
                break;
            }
        }

        if self.server_no_context_takeover {
            self.decompress.reset(false);
        }

        Ok(output)
    }
}
