//! The two independent DEFLATE streams the duplex pipeline drives: one
//! inbound decompressor, one outbound compressor, each gated by its own
//! context-takeover flag from the negotiated [`crate::handshake::ExtensionState`].

pub mod inbound;
pub mod outbound;

pub use inbound::InboundDecompressor;
pub use outbound::OutboundCompressor;
