//! End-to-end scenarios over real sockets bound to an ephemeral port,
//! placed at the crate root the way
//! `other_examples/6bf7a2fb_wallstop-fortress-rollback` tests its network
//! peer: spin up the real server, connect real `TcpStream`s, and drive
//! the protocol from the outside.

use std::sync::Arc;

use bluetetris::codec::{self, opcode, Frame, Scope, SENTINEL};
use bluetetris::logger::Logger;
use bluetetris::score::{LocalFileStore, ScoreStore};
use bluetetris::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>, tokio::sync::oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let logger = Arc::new(Logger::new(0));
    let score_path = std::env::temp_dir().join(format!("bluetetris-it-{}-{}.dat", std::process::id(), addr.port()));
    let scores = Arc::new(ScoreStore::new(Arc::new(LocalFileStore::new(score_path))));
    let server = Server::new(listener, logger, scores);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        server
            .run(async {
                let _ = stop_rx.await;
            })
            .await;
    });
    (addr, handle, stop_tx)
}

async fn read_frame(stream: &mut TcpStream) -> Frame {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        if let Some(pos) = buffer.iter().position(|&b| b == SENTINEL) {
            let mut body: Vec<u8> = buffer.drain(..=pos).collect();
            body.pop();
            return Frame::decode(&body).unwrap();
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before a full frame arrived");
        buffer.extend_from_slice(&chunk[..n]);
    }
}

async fn expect_opcode(stream: &mut TcpStream, want: u8) -> Frame {
    loop {
        let frame = read_frame(stream).await;
        if frame.opcode == want {
            return frame;
        }
    }
}

/// Reads the `AssignId` frame and returns the unbiased slot id, undoing
/// the wire's `NUMERAL_OFFSET` bias on the payload byte.
async fn assigned_slot(stream: &mut TcpStream) -> u8 {
    let frame = expect_opcode(stream, opcode::global::ASSIGN_ID).await;
    frame.payload[0].wrapping_sub(codec::NUMERAL_OFFSET)
}

#[tokio::test]
async fn new_connection_is_admitted_and_assigned_a_slot() {
    let (addr, _handle, _stop) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let assign = expect_opcode(&mut client, opcode::global::ASSIGN_ID).await;
    assert_eq!(assign.payload, vec![codec::NUMERAL_OFFSET]);
}

#[tokio::test]
async fn two_players_readying_up_starts_the_game() {
    let (addr, _handle, _stop) = start_server().await;
    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();

    let slot_a = assigned_slot(&mut a).await;
    let slot_b = assigned_slot(&mut b).await;
    assert_ne!(slot_a, slot_b);

    let ready_a = Frame::new(Scope::Room, slot_a, opcode::room::READY, vec![]).encode();
    let ready_b = Frame::new(Scope::Room, slot_b, opcode::room::READY, vec![]).encode();
    a.write_all(&ready_a).await.unwrap();
    b.write_all(&ready_b).await.unwrap();

    expect_opcode(&mut a, opcode::room::START_GAME).await;
    expect_opcode(&mut b, opcode::room::START_GAME).await;
}

#[tokio::test]
async fn fifth_connection_is_rejected_once_all_slots_are_full() {
    let (addr, _handle, _stop) = start_server().await;
    let mut keep_alive = Vec::new();
    for _ in 0..4 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        expect_opcode(&mut stream, opcode::global::ASSIGN_ID).await;
        keep_alive.push(stream);
    }

    let mut fifth = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = fifth.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "a fifth connection must be closed, not left hanging");
}

#[tokio::test]
async fn topping_out_ends_the_game_and_broadcasts_a_score_list() {
    let (addr, _handle, _stop) = start_server().await;
    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();

    let slot_a = assigned_slot(&mut a).await;
    let slot_b = assigned_slot(&mut b).await;

    a.write_all(&Frame::new(Scope::Room, slot_a, opcode::room::READY, vec![]).encode()).await.unwrap();
    b.write_all(&Frame::new(Scope::Room, slot_b, opcode::room::READY, vec![]).encode()).await.unwrap();
    expect_opcode(&mut a, opcode::room::START_GAME).await;
    expect_opcode(&mut b, opcode::room::START_GAME).await;

    // the default board is 10x22; locking into rows 20/21 trips the
    // overflow check on the very first placement.
    let payload = bluetetris::codec::PiecePayload { face: 0, cells: [(0, 21), (1, 21), (2, 21), (3, 21)] };
    let lock = Frame::new(Scope::Game, slot_a, opcode::game::LOCKDOWN, payload.encode_lockdown()).encode();
    a.write_all(&lock).await.unwrap();

    expect_opcode(&mut a, opcode::game::GAME_END).await;
    expect_opcode(&mut b, opcode::game::GAME_END).await;
    let scores = expect_opcode(&mut a, opcode::global::SCORE_LIST).await;
    assert_eq!(scores.payload[0], bluetetris::codec::SCORE_LIST_SUCCESS);
}

#[tokio::test]
async fn lockdown_with_consistent_placement_is_forwarded_to_the_opponent() {
    let (addr, _handle, _stop) = start_server().await;
    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();

    let slot_a = assigned_slot(&mut a).await;
    let slot_b = assigned_slot(&mut b).await;

    a.write_all(&Frame::new(Scope::Room, slot_a, opcode::room::READY, vec![]).encode()).await.unwrap();
    b.write_all(&Frame::new(Scope::Room, slot_b, opcode::room::READY, vec![]).encode()).await.unwrap();
    expect_opcode(&mut a, opcode::room::START_GAME).await;
    expect_opcode(&mut b, opcode::room::START_GAME).await;

    let payload = bluetetris::codec::PiecePayload { face: 0, cells: [(0, 0), (1, 0), (2, 0), (3, 0)] };
    let lock = Frame::new(Scope::Game, slot_a, opcode::game::LOCKDOWN, payload.encode_lockdown()).encode();
    a.write_all(&lock).await.unwrap();

    let forwarded = expect_opcode(&mut b, opcode::game::LOCKDOWN).await;
    assert_eq!(forwarded.slot, slot_a);
}
