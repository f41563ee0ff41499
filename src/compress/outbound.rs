//! Outbound compression stage. Present only when compression is active;
//! feeds application writes through a raw-DEFLATE encoder whose flush
//! policy depends on the client's context-takeover flag.

use flate2::{Compress, Compression, FlushCompress};

use crate::error::FrameError;

pub struct OutboundCompressor {
    compress: Compress,
    client_no_context_takeover: bool,
}

impl OutboundCompressor {
    pub fn new(client_no_context_takeover: bool) -> Self {
        Self {
            compress: Compress::new(Compression::best(), false),
            client_no_context_takeover,
        }
    }

    /// Compresses one complete JSON message. When the client negotiated no
    /// context takeover, the stream is finished and reset after this
    /// message (a full close/reopen); otherwise a sync flush is used and
    /// the sliding window carries over to the next message.
    pub fn encode_message(&mut self, json_bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
        let flush = if self.client_no_context_takeover {
            FlushCompress::Finish
        } else {
            FlushCompress::Sync
        };

        let mut output = Vec::new();
        let mut out_chunk = vec![0u8; 4096];
        let mut input_pos = 0usize;
        loop {
            let in_before = self.compress.total_in();
            let out_before = self.compress.total_out();
            let status = self
                .compress
                .compress(&json_bytes[input_pos..], &mut out_chunk, flush)
                .map_err(|e| FrameError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            let consumed = (self.compress.total_in() - in_before) as usize;
            let produced = (self.compress.total_out() - out_before) as usize;
            input_pos += consumed;
            output.extend_from_slice(&out_chunk[..produced]);

            match status {
                flate2::Status::StreamEnd => break,
                _ if input_pos >= json_bytes.len() && produced == 0 => break,
                _ => {}
            }
        }

        if self.client_no_context_takeover {
            self.compress.reset();
        }

        Ok(output)
    }
}
