//! Keepalive ping timer and interrupt/termination signal handling. Runs as
//! its own task when keepalive is enabled; otherwise the driver closes the
//! outbound pipe directly on `EOSE`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::FrameError;
use crate::frame::{write_frame_locked, OpCode};

/// Fires a masked empty ping directly at the transport (bypassing the
/// compression path) every `interval`, until either `cancel` fires or a
/// Ctrl-C/SIGTERM is observed — at which point it signals shutdown by
/// closing `close_tx`.
pub async fn run<W: AsyncWrite + Unpin>(
    transport: Arc<Mutex<W>>,
    interval: Duration,
    cancel: CancellationToken,
    close_tx: mpsc::Sender<()>,
) -> Result<(), FrameError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if write_frame_locked(&transport, OpCode::Ping, false, &[]).await.is_err() {
                    let _ = close_tx.send(()).await;
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = close_tx.send(()).await;
                return Ok(());
            }
            _ = cancel.cancelled() => {
                return Ok(());
            }
        }
    }
}

/// Sends the close frame, then waits up to `grace` for the receive path to
/// observe the server's own close frame (signaled via `cancel`), before
/// giving up and letting the caller tear down the transport regardless.
pub async fn close_with_grace<W: AsyncWrite + Unpin>(
    transport: &Arc<Mutex<W>>,
    grace: Duration,
    cancel: CancellationToken,
) -> Result<(), FrameError> {
    // Status code 1000: normal closure.
    write_frame_locked(transport, OpCode::Close, false, &1000u16.to_be_bytes()).await?;
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(grace) => {}
    }
    Ok(())
}
