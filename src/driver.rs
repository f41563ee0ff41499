//! Subscription Driver: owns the top-level task graph described in the
//! concurrency model — an outbound compressor/framer task, an inbound
//! receiver task, this dispatcher itself (the task `run` is called from),
//! and, optionally, a keepalive task.
//!
//! The source's internal application pipe used a sentinel byte sequence to
//! mark message boundaries between the driver and the compressor; here
//! that boundary is simply "one item on an `mpsc` channel", which is the
//! explicit signal the redesign calls for. The `00 00 FF FF` trailer is
//! still what appears on the wire, produced by [`crate::compress`].
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{build_auth_reply, AuthOnceGuard};
use crate::compress::{InboundDecompressor, OutboundCompressor};
use crate::config::ConnectionConfig;
use crate::dispatch::{classify, DispatchAction, MessagePool};
use crate::error::{ClientError, FrameError};
use crate::frame::{write_frame_locked, FrameReceiver, InboundEvent, OpCode};
use crate::handshake::ExtensionState;
use crate::keepalive;
use crate::sink::EventSink;

const INBOUND_CHANNEL_CAPACITY: usize = 5;
const CLOSE_GRACE: Duration = Duration::from_secs(10);

/// Generates the 14-hex-character subscription id from 7 random bytes.
pub fn generate_subscription_id() -> String {
    let mut bytes = [0u8; 7];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    eose_count: AtomicU64,
    compressed_bytes: AtomicU64,
    decompressed_bytes: AtomicU64,
}

/// Drives one subscription end to end: sends the initial `REQ` (if any
/// filters were supplied), then loops dispatching inbound messages until
/// the connection ends, writing accepted events to `sink`.
pub async fn run<R, W>(
    config: &ConnectionConfig,
    extensions: ExtensionState,
    read_half: R,
    write_half: W,
    mut sink: EventSink,
) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let transport = Arc::new(Mutex::new(write_half));
    let cancel = CancellationToken::new();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(INBOUND_CHANNEL_CAPACITY);
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Vec<serde_json::Value>>(INBOUND_CHANNEL_CAPACITY);
    let (close_tx, mut close_rx) = mpsc::channel::<()>(1);
    let pool = MessagePool::new();
    let counters = Arc::new(Counters::default());
    let auth_guard = AuthOnceGuard::new();

    let outbound_task = tokio::spawn(run_outbound(
        outbound_rx,
        transport.clone(),
        extensions,
    ));

    let inbound_task = tokio::spawn(run_inbound(
        read_half,
        transport.clone(),
        extensions,
        inbound_tx,
        cancel.clone(),
        counters.clone(),
    ));

    let keepalive_task = if config.keepalive_secs > 0 {
        Some(tokio::spawn(keepalive::run(
            transport.clone(),
            Duration::from_secs(config.keepalive_secs),
            cancel.clone(),
            close_tx.clone(),
        )))
    } else {
        None
    };

    if !config.filters.is_empty() {
        let sub_id = generate_subscription_id();
        let mut req = vec![serde_json::json!("REQ"), serde_json::json!(sub_id)];
        req.extend(config.filters.iter().cloned());
        send_message(&outbound_tx, &serde_json::Value::Array(req)).await?;
    }

    let origin = config.origin();
    let result = loop {
        tokio::select! {
            maybe_msg = inbound_rx.recv() => {
                let Some(message) = maybe_msg else { break Ok(()); };
                let action = pool_classify(&pool, message).await?;
                match action {
                    DispatchAction::Event { event, .. } => {
                        counters.events.fetch_add(1, Ordering::Relaxed);
                        sink.write_event(&event).await?;
                    }
                    DispatchAction::Eose { subscription_id } => {
                        let count = counters.eose_count.fetch_add(1, Ordering::Relaxed) + 1;
                        info!(subscription_id, count, "end of stored events");
                        if config.keepalive_secs == 0 {
                            break Ok(());
                        }
                    }
                    DispatchAction::Notice { text } => {
                        info!(notice = %text, "relay notice");
                    }
                    DispatchAction::Ok { event_id, accepted, reason } => {
                        info!(event_id, accepted, reason, "relay acknowledgement");
                    }
                    DispatchAction::Auth { challenge } => {
                        if auth_guard.should_respond() {
                            match build_auth_reply(&challenge, &origin) {
                                Ok(reply) => {
                                    if let Err(e) = send_message(&outbound_tx, &reply).await {
                                        warn!(error = %e, "failed to send auth reply");
                                    }
                                }
                                Err(e) => warn!(error = %e, "failed to build auth reply"),
                            }
                        }
                    }
                    DispatchAction::Unknown => {}
                }
            }
            _ = close_rx.recv() => {
                break Ok(());
            }
        }
    };

    drop(outbound_tx);
    // `cancel` is fired either by `run_inbound` once it observes the
    // server's close (or gives up), or by the keepalive task on ctrl-c;
    // don't fire it ourselves yet, or the grace wait below becomes a
    // no-op and we never actually wait for the receive path.
    keepalive::close_with_grace(&transport, CLOSE_GRACE, cancel.clone())
        .await
        .ok();
    cancel.cancel();
    if let Some(h) = keepalive_task {
        h.abort();
    }
    outbound_task.abort();
    let inbound_outcome = inbound_task.await;
    sink.flush().await?;

    info!(
        events = counters.events.load(Ordering::Relaxed),
        eose = counters.eose_count.load(Ordering::Relaxed),
        "subscription driver finished"
    );

    if extensions.compression_active {
        let compressed = counters.compressed_bytes.load(Ordering::Relaxed);
        let decompressed = counters.decompressed_bytes.load(Ordering::Relaxed);
        if compressed > 0 {
            let ratio = decompressed as f64 / compressed as f64;
            info!(
                compressed_bytes = compressed,
                decompressed_bytes = decompressed,
                ratio,
                "compression ratio"
            );
        }
    }

    match inbound_outcome {
        Ok(Ok(())) => result,
        Ok(Err(ClientError::UngracefulClose)) => Err(ClientError::UngracefulClose),
        Ok(Err(e)) => Err(e),
        Err(_join_err) => result,
    }
}

async fn pool_classify(
    pool: &MessagePool,
    mut message: Vec<serde_json::Value>,
) -> Result<DispatchAction, ClientError> {
    let action = classify(&mut message)?;
    pool.release(message).await;
    Ok(action)
}

async fn send_message(
    tx: &mpsc::Sender<Vec<u8>>,
    value: &serde_json::Value,
) -> Result<(), ClientError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ClientError::Dispatch(crate::error::DispatchError::Json(e)))?;
    tx.send(bytes)
        .await
        .map_err(|_| ClientError::Frame(FrameError::TransportClosed))?;
    Ok(())
}

async fn run_outbound<W: AsyncWrite + Unpin>(
    mut rx: mpsc::Receiver<Vec<u8>>,
    transport: Arc<Mutex<W>>,
    extensions: ExtensionState,
) -> Result<(), FrameError> {
    let mut compressor = extensions
        .compression_active
        .then(|| OutboundCompressor::new(extensions.client_no_context_takeover));

    while let Some(json_bytes) = rx.recv().await {
        let body = match compressor.as_mut() {
            Some(c) => c.encode_message(&json_bytes)?,
            None => json_bytes,
        };
        write_frame_locked(&transport, OpCode::Text, extensions.compression_active, &body).await?;
    }
    Ok(())
}

async fn run_inbound<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: R,
    transport: Arc<Mutex<W>>,
    extensions: ExtensionState,
    tx: mpsc::Sender<Vec<serde_json::Value>>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) -> Result<(), ClientError> {
    let mut receiver = FrameReceiver::new(reader);
    let mut decompressor = extensions
        .compression_active
        .then(|| InboundDecompressor::new(extensions.server_no_context_takeover));

    let result = loop {
        match receiver.next_event(&transport).await {
            Ok(Some(InboundEvent::Message { compressed, payload })) => {
                let json_bytes = if compressed {
                    match decompressor.as_mut() {
                        Some(d) => {
                            let decoded = d.decode_message(&payload).map_err(ClientError::Frame)?;
                            counters
                                .compressed_bytes
                                .fetch_add(payload.len() as u64, Ordering::Relaxed);
                            counters
                                .decompressed_bytes
                                .fetch_add(decoded.len() as u64, Ordering::Relaxed);
                            decoded
                        }
                        None => payload,
                    }
                } else {
                    payload
                };
                let value: serde_json::Value =
                    serde_json::from_slice(&json_bytes).map_err(crate::error::DispatchError::from)?;
                let array = match value {
                    serde_json::Value::Array(items) => items,
                    other => vec![other],
                };
                if tx.send(array).await.is_err() {
                    break Ok(());
                }
            }
            Ok(Some(InboundEvent::Closed { code })) => {
                info!(code, "relay sent close frame");
                break Ok(());
            }
            Ok(None) => {
                warn!("relay closed the connection without a close frame");
                break Err(ClientError::UngracefulClose);
            }
            Err(e) => break Err(ClientError::Frame(e)),
        }
    };
    cancel.cancel();
    result
}
