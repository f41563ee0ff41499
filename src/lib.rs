//! A nostr relay client that speaks permessage-deflate WebSocket directly,
//! with no WebSocket or nostr library dependency for the wire protocol
//! itself: hand-rolled frame codec, hand-rolled compression bookkeeping,
//! hand-rolled HTTP/1.1 metadata probe.

pub mod auth;
pub mod compress;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod io_util;
pub mod keepalive;
pub mod prefixed;
pub mod probe;
pub mod sink;
pub mod transport;
