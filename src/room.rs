//! The room state machine: four fixed player slots moving through
//! Waiting → Starting → Playing, dispatching each scope's opcodes.
//! Grounded in `original_source/BTServer.h::BTSHandleRoom/BTSHandleGame`
//! and `BTSOverflowCheck`/`BTSEndGame`.

use tokio::sync::mpsc::UnboundedSender;

use crate::board::{Board, Face};
use crate::codec::{self, opcode, Frame, PiecePayload, Scope, GLOBAL_SLOT};
use crate::logger::Logger;

pub const SLOT_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Waiting,
    Starting,
    Playing,
}

impl RoomState {
    pub fn scope(self) -> Scope {
        match self {
            RoomState::Waiting | RoomState::Starting => Scope::Room,
            RoomState::Playing => Scope::Game,
        }
    }
}

/// Work a frame handler couldn't finish itself because it needs an
/// `await`-able `ScoreStore` call; the dispatcher performs the I/O and
/// routes the result back through `Room::send_to`/`broadcast`.
pub enum ScoreWork {
    Retrieve { reply_to: u8 },
    RetrieveForGameEnd,
    Submit { name: String, score: u64 },
}

struct Slot {
    present: bool,
    ready: bool,
    playing: bool,
    board: Board,
    outbound: Option<UnboundedSender<Vec<u8>>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            present: false,
            ready: false,
            playing: false,
            board: Board::new(
                crate::board::DEFAULT_WIDTH,
                crate::board::DEFAULT_HEIGHT,
                true,
                0,
            ),
            outbound: None,
        }
    }
}

pub struct Room {
    slots: [Slot; SLOT_COUNT],
    state: RoomState,
    invalid_count: u64,
}

impl Room {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::empty()),
            state: RoomState::Waiting,
            invalid_count: 0,
        }
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid_count
    }

    /// Sends a pre-encoded frame directly to one slot. Used by the
    /// dispatcher to deliver replies it produced itself (score queries)
    /// outside of `handle_frame`.
    pub fn send_reply(&self, slot: u8, bytes: Vec<u8>) {
        self.send_to(slot, bytes);
    }

    /// Delivers a pre-encoded frame to every connected slot. Used for the
    /// score-list refresh the dispatcher performs after a game ends.
    pub fn broadcast_reply(&self, bytes: Vec<u8>) {
        self.broadcast(bytes);
    }

    fn send_to(&self, slot: u8, bytes: Vec<u8>) {
        if let Some(sender) = self.slots.get(slot as usize).and_then(|s| s.outbound.as_ref()) {
            let _ = sender.send(bytes);
        }
    }

    fn broadcast(&self, bytes: Vec<u8>) {
        for slot in &self.slots {
            if let Some(sender) = &slot.outbound {
                let _ = sender.send(bytes.clone());
            }
        }
    }

    fn broadcast_except(&self, origin: u8, bytes: Vec<u8>) {
        for (id, slot) in self.slots.iter().enumerate() {
            if id as u8 == origin {
                continue;
            }
            if let Some(sender) = &slot.outbound {
                let _ = sender.send(bytes.clone());
            }
        }
    }

    /// Finds the lowest free slot, marks it present, and returns the
    /// initial state-sync frames the new connection needs: its assigned
    /// id plus a snapshot of every other slot's connect/ready/playing
    /// state (`BTSReportClientStates`).
    pub fn admit(&mut self, outbound: UnboundedSender<Vec<u8>>) -> Option<(u8, Vec<Vec<u8>>)> {
        let slot_id = self.slots.iter().position(|s| !s.present)? as u8;
        self.slots[slot_id as usize].present = true;
        self.slots[slot_id as usize].outbound = Some(outbound);

        let mut sync = Vec::new();
        sync.push(global_frame(opcode::global::ASSIGN_ID, slot_id, vec![slot_id + codec::NUMERAL_OFFSET]));
        for (id, slot) in self.slots.iter().enumerate() {
            let id = id as u8;
            let connect_opcode = if slot.present { opcode::room::CONNECT } else { opcode::global::DISCONNECT };
            sync.push(global_frame(connect_opcode, id, vec![]));
            if slot.present {
                let ready_opcode = if slot.ready { opcode::room::READY } else { opcode::room::NOT_READY };
                sync.push(global_frame(ready_opcode, id, vec![]));
                let playing_opcode = if slot.playing { opcode::global::PLAYING } else { opcode::global::IDLE };
                sync.push(global_frame(playing_opcode, id, vec![]));
            }
        }

        self.broadcast_except(slot_id, global_frame(opcode::room::CONNECT, slot_id, vec![]));
        Some((slot_id, sync))
    }

    /// Clears a slot's state and, if the room was mid-game, forces a
    /// reset back to `Waiting` rather than leaving three players stuck
    /// in `Playing`.
    pub fn disconnect(&mut self, slot: u8) {
        if let Some(s) = self.slots.get_mut(slot as usize) {
            *s = Slot::empty();
        }
        self.broadcast_except(slot, global_frame(opcode::global::DISCONNECT, slot, vec![]));
        if self.state == RoomState::Playing {
            self.reset_to_waiting();
        }
    }

    fn present_count(&self) -> usize {
        self.slots.iter().filter(|s| s.present).count()
    }

    fn all_present_ready(&self) -> bool {
        self.present_count() > 0 && self.slots.iter().filter(|s| s.present).all(|s| s.ready)
    }

    fn reset_to_waiting(&mut self) {
        self.state = RoomState::Waiting;
        for slot in self.slots.iter_mut() {
            slot.ready = false;
            slot.playing = false;
        }
    }

    fn start_game(&mut self, logger: &Logger) {
        self.state = RoomState::Playing;
        for slot in self.slots.iter_mut() {
            if slot.present {
                slot.playing = true;
                slot.board.start();
            }
        }
        logger.info("room: game starting");
        for (id, slot) in self.slots.iter().enumerate() {
            if !slot.present {
                continue;
            }
            let payload: Vec<u8> = slot.board.next_queue().iter().map(|f| *f as u8 + 1).collect();
            self.send_to(id as u8, global_frame(opcode::global::NEXT, id as u8, payload));
        }
        self.broadcast(global_frame(opcode::room::START_GAME, GLOBAL_SLOT, vec![]));
    }

    /// Routes one inbound frame. Returns any follow-up work the
    /// dispatcher needs to perform against the score store.
    pub fn handle_frame(&mut self, frame: Frame, logger: &Logger) -> Option<ScoreWork> {
        match frame.scope {
            Scope::Global => self.handle_global(frame, logger),
            Scope::Room => {
                self.handle_room(frame, logger);
                None
            }
            Scope::Game => self.handle_game(frame, logger),
        }
    }

    fn reject(&mut self, slot: u8, logger: &Logger) {
        self.invalid_count += 1;
        logger.warn(format!("room: invalid action from slot {slot}"));
        self.send_to(slot, global_frame(opcode::game::INVALID_ACT, GLOBAL_SLOT, vec![slot]));
    }

    fn handle_global(&mut self, frame: Frame, logger: &Logger) -> Option<ScoreWork> {
        match frame.opcode {
            opcode::global::REQUEST_SCORE => return Some(ScoreWork::Retrieve { reply_to: frame.slot }),
            opcode::global::HIGH_SCORE_SUBMIT => {
                if frame.payload.len() < codec::NAME_LENGTH + codec::SCORE_LENGTH {
                    self.reject(frame.slot, logger);
                    return None;
                }
                let name = codec::decode_name(&frame.payload);
                let score = codec::decode_score(&frame.payload[codec::NAME_LENGTH..]);
                return Some(ScoreWork::Submit { name, score });
            }
            opcode::global::APPEARANCE | opcode::global::FRAME | opcode::global::GRID => {
                let bytes = global_frame(frame.opcode, frame.slot, frame.payload.clone());
                self.broadcast_except(frame.slot, bytes);
            }
            opcode::global::REPORT_SCORE => self.handle_report_score(&frame, logger),
            _ => self.reject(frame.slot, logger),
        }
        None
    }

    // The client reports its own running score for a consistency check,
    // not as a submission; the board's own lock/clear accounting is
    // already authoritative, so a mismatch is logged and nothing else.
    fn handle_report_score(&mut self, frame: &Frame, logger: &Logger) {
        if frame.payload.len() < codec::SCORE_LENGTH {
            self.reject(frame.slot, logger);
            return;
        }
        let reported = codec::decode_score(&frame.payload);
        if let Some(slot) = self.slots.get(frame.slot as usize) {
            let authoritative = slot.board.score();
            if reported != authoritative {
                logger.warn(format!(
                    "room: slot {} reported score {reported} but server tracks {authoritative}",
                    frame.slot
                ));
            }
        }
    }

    fn handle_room(&mut self, frame: Frame, logger: &Logger) {
        match frame.opcode {
            opcode::room::READY => {
                if let Some(slot) = self.slots.get_mut(frame.slot as usize) {
                    slot.ready = true;
                }
                self.broadcast(global_frame(opcode::room::READY, frame.slot, vec![]));
                if self.all_present_ready() {
                    self.state = RoomState::Starting;
                    let bitmask = self.slots.iter().enumerate().fold(0u8, |acc, (i, s)| {
                        if s.present { acc | (1 << i) } else { acc }
                    });
                    self.broadcast(global_frame(opcode::room::ENTER_GAME_STATE, GLOBAL_SLOT, vec![bitmask]));
                    self.start_game(logger);
                }
            }
            opcode::room::NOT_READY => {
                if let Some(slot) = self.slots.get_mut(frame.slot as usize) {
                    slot.ready = false;
                }
                self.broadcast(global_frame(opcode::room::NOT_READY, frame.slot, vec![]));
            }
            _ => self.reject(frame.slot, logger),
        }
    }

    fn handle_game(&mut self, frame: Frame, logger: &Logger) -> Option<ScoreWork> {
        match frame.opcode {
            opcode::game::LOCKDOWN => return self.handle_lockdown(frame, logger),
            opcode::game::REQUEST_FIX => self.handle_request_fix(frame, logger),
            opcode::game::TETRAD => self.handle_tetrad(frame),
            _ => self.reject(frame.slot, logger),
        }
        None
    }

    fn handle_lockdown(&mut self, frame: Frame, logger: &Logger) -> Option<ScoreWork> {
        let Ok(placement) = PiecePayload::decode_lockdown(&frame.payload) else {
            self.reject(frame.slot, logger);
            return None;
        };
        let Ok(face) = Face::try_from(placement.face) else {
            self.reject(frame.slot, logger);
            return None;
        };
        let Some(slot) = self.slots.get_mut(frame.slot as usize) else { return None };
        let inconsistent = slot.board.apply_lock(face, placement.cells);
        if inconsistent {
            self.send_request_fix_reply(frame.slot, frame.slot);
            return None;
        }
        let topped_out = self.slots[frame.slot as usize].board.top_out();
        self.broadcast_except(frame.slot, frame.encode());
        if topped_out {
            self.end_game(logger);
            return Some(ScoreWork::RetrieveForGameEnd);
        }
        None
    }

    // Distinct from `Tetrad`: the client is asking the server to replay
    // a board's authoritative state, not reporting a new piece. The
    // original's handler falls through into the `Tetrad` case; that is
    // a bug and is not reproduced here. The payload names which slot's
    // board to resend (offset by `NUMERAL_OFFSET`), defaulting to the
    // sender's own board when absent or malformed.
    fn handle_request_fix(&mut self, frame: Frame, logger: &Logger) {
        let target = frame
            .payload
            .first()
            .map(|&b| b.wrapping_sub(codec::NUMERAL_OFFSET))
            .unwrap_or(frame.slot);
        if self.slots.get(target as usize).is_none_or(|s| !s.present) {
            self.reject(frame.slot, logger);
            return;
        }
        self.send_request_fix_reply(frame.slot, target);
    }

    fn send_request_fix_reply(&self, requester: u8, target: u8) {
        let Some(owner) = self.slots.get(target as usize) else { return };
        let board = &owner.board;
        let payload = codec::encode_board_cells(board.width(), board.height(), |x, y| {
            board.cell(x, y).map(|f| f as u8)
        });
        self.send_to(requester, game_frame(opcode::game::BOARD, target, payload));
    }

    fn handle_tetrad(&mut self, frame: Frame) {
        self.broadcast_except(frame.slot, frame.encode());
    }

    fn end_game(&mut self, logger: &Logger) {
        logger.info("room: game over, resetting to waiting");
        self.broadcast(global_frame(opcode::game::GAME_END, GLOBAL_SLOT, vec![]));
        self.reset_to_waiting();
    }
}

fn global_frame(opcode: u8, slot: u8, payload: Vec<u8>) -> Vec<u8> {
    Frame::new(Scope::Global, slot, opcode, payload).encode()
}

fn game_frame(opcode: u8, slot: u8, payload: Vec<u8>) -> Vec<u8> {
    Frame::new(Scope::Game, slot, opcode, payload).encode()
}
