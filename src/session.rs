//! Per-connection I/O: one read task and one send task per socket,
//! generalized from the teacher's `Session<L: GameLogic>` and the
//! `run_game` split-stream pattern in `src/bin/server.rs` from a
//! line-delimited text protocol to sentinel-delimited binary frames.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::codec::{Frame, SENTINEL};
use crate::dispatcher::DispatchMessage;
use crate::logger::Logger;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dispatcher channel closed")]
    DispatcherGone,
}

/// Reads a connection to completion, registering it with the room on
/// entry and tearing it down on exit. Runs until the socket closes or a
/// protocol error ends the connection.
pub async fn run(stream: TcpStream, dispatch: mpsc::UnboundedSender<DispatchMessage>, logger: &Logger) {
    let peer = stream.peer_addr().ok();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();

    if dispatch.send(DispatchMessage::Connect { outbound: outbound_tx, reply: reply_tx }).is_err() {
        logger.warn("session: dispatcher unavailable, dropping connection");
        return;
    }

    let Ok(Some((slot, sync_frames))) = reply_rx.await else {
        logger.info(format!("session: room full, rejecting {peer:?}"));
        return;
    };

    logger.info(format!("session: {peer:?} admitted as slot {slot}"));

    let (read_half, write_half) = stream.into_split();
    let send_task = tokio::spawn(send_loop(write_half, outbound_rx, sync_frames));
    let read_result = read_loop(read_half, slot, dispatch.clone(), logger).await;

    if let Err(err) = read_result {
        logger.verbose(format!("session: slot {slot} read ended: {err}"));
    }
    let _ = dispatch.send(DispatchMessage::Disconnect(slot));
    send_task.abort();
}

async fn read_loop(
    mut stream: tokio::net::tcp::OwnedReadHalf,
    slot: u8,
    dispatch: mpsc::UnboundedSender<DispatchMessage>,
    logger: &Logger,
) -> Result<(), SessionError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 512];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);

        while let Some(pos) = buffer.iter().position(|&b| b == SENTINEL) {
            let mut body: Vec<u8> = buffer.drain(..=pos).collect();
            body.pop(); // drop the sentinel itself
            if body.is_empty() {
                continue;
            }
            match Frame::decode(&body) {
                Ok(mut frame) => {
                    frame.slot = slot; // the server is the source of truth for slot identity
                    if dispatch.send(DispatchMessage::Incoming(frame)).is_err() {
                        return Err(SessionError::DispatcherGone);
                    }
                }
                Err(err) => logger.verbose(format!("session: slot {slot} sent a malformed frame: {err}")),
            }
        }
    }
}

async fn send_loop(
    mut stream: tokio::net::tcp::OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    initial: Vec<Vec<u8>>,
) {
    for bytes in initial {
        if stream.write_all(&bytes).await.is_err() {
            return;
        }
    }
    while let Some(bytes) = outbound.recv().await {
        if stream.write_all(&bytes).await.is_err() {
            return;
        }
    }
}
