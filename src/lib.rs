//! Authoritative server and wire protocol for a four-slot falling-block
//! room: one shared board-game room, played over a small binary
//! protocol on TCP port [`codec::DEFAULT_PORT`].

pub mod board;
pub mod codec;
pub mod dispatcher;
pub mod logger;
pub mod room;
pub mod score;
pub mod server;
pub mod session;
