//! Single-consumer dispatch loop: owns exclusive mutation rights over the
//! shared `Room` and routes each inbound frame or connection event to it,
//! performing `ScoreStore` I/O on its behalf. Generalized from
//! `original_source/BTServer.h::BTSMessageReader`'s busy-polled queue to
//! an `mpsc::UnboundedReceiver`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::codec::{opcode, Frame, Scope, GLOBAL_SLOT};
use crate::logger::Logger;
use crate::room::{Room, ScoreWork};
use crate::score::ScoreStore;

pub enum DispatchMessage {
    Connect {
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        reply: oneshot::Sender<Option<(u8, Vec<Vec<u8>>)>>,
    },
    Incoming(Frame),
    Disconnect(u8),
}

/// Drains the dispatch queue until the sender side is dropped (i.e. the
/// listener has shut down and every session has exited).
pub async fn run(
    mut queue: mpsc::UnboundedReceiver<DispatchMessage>,
    room: Arc<Mutex<Room>>,
    scores: Arc<ScoreStore>,
    logger: Arc<Logger>,
) {
    while let Some(message) = queue.recv().await {
        match message {
            DispatchMessage::Connect { outbound, reply } => {
                let result = room.lock().await.admit(outbound);
                let _ = reply.send(result);
            }
            DispatchMessage::Disconnect(slot) => {
                room.lock().await.disconnect(slot);
            }
            DispatchMessage::Incoming(frame) => {
                handle_incoming(&room, &scores, &logger, frame).await;
            }
        }
    }
}

async fn handle_incoming(room: &Arc<Mutex<Room>>, scores: &Arc<ScoreStore>, logger: &Logger, frame: Frame) {
    let current_scope = room.lock().await.state().scope();
    if frame.scope != current_scope && frame.scope != Scope::Global {
        logger.verbose(format!(
            "dispatcher: dropping frame from slot {} (scope {:?} invalid in {:?})",
            frame.slot, frame.scope, current_scope
        ));
        return;
    }

    let work = room.lock().await.handle_frame(frame, logger);
    match work {
        Some(ScoreWork::Retrieve { reply_to }) => {
            match scores.retrieve_top10().await {
                Ok(table) => {
                    let mut payload = vec![crate::codec::SCORE_LIST_SUCCESS];
                    for entry in table {
                        payload.extend_from_slice(&crate::codec::encode_name(&entry.name));
                        payload.extend_from_slice(&crate::codec::encode_score(entry.score));
                    }
                    let bytes = Frame::new(Scope::Global, GLOBAL_SLOT, opcode::global::SCORE_LIST, payload).encode();
                    room.lock().await.send_reply(reply_to, bytes);
                }
                Err(err) => {
                    logger.warn(format!("dispatcher: score retrieval failed: {err}"));
                    let bytes = Frame::new(
                        Scope::Global,
                        GLOBAL_SLOT,
                        opcode::global::SCORE_LIST,
                        vec![crate::codec::SCORE_LIST_FAILURE],
                    )
                    .encode();
                    room.lock().await.send_reply(reply_to, bytes);
                }
            }
        }
        Some(ScoreWork::RetrieveForGameEnd) => match scores.retrieve_top10().await {
            Ok(table) => {
                let mut payload = vec![crate::codec::SCORE_LIST_SUCCESS];
                for entry in table {
                    payload.extend_from_slice(&crate::codec::encode_name(&entry.name));
                    payload.extend_from_slice(&crate::codec::encode_score(entry.score));
                }
                let bytes = Frame::new(Scope::Global, GLOBAL_SLOT, opcode::global::SCORE_LIST, payload).encode();
                room.lock().await.broadcast_reply(bytes);
            }
            Err(err) => logger.warn(format!("dispatcher: post-game score retrieval failed: {err}")),
        },
        Some(ScoreWork::Submit { name, score }) => {
            if let Err(err) = scores.submit(name, score).await {
                logger.warn(format!("dispatcher: score submission failed: {err}"));
            }
        }
        None => {}
    }
}
