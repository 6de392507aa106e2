//! Minimal smoke-test client: connects, says Ready, and prints whatever
//! frames the server sends back. Not a game client — exercising the wire
//! protocol end to end is the entire point, per the crate's scope.

use bluetetris::codec::{self, opcode, Frame, Scope, SENTINEL};
use bluetetris::logger::Logger;
use clap::{ArgAction, Parser};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(
    name = "client",
    version,
    about = "Blue Tetris — protocol smoke-test client",
    long_about = "Connects to a running server, sends Ready, and logs every \
                  frame it receives until the connection closes."
)]
struct Args {
    /// Server address to connect to
    #[arg(default_value_t = format!("127.0.0.1:{}", codec::DEFAULT_PORT))]
    addr: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let logger = Logger::new(args.verbose);

    logger.info(format!("client: connecting to {}", args.addr));
    let mut stream = TcpStream::connect(&args.addr).await?;
    logger.info("client: connected");

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 512];
    let mut my_slot: Option<u8> = None;

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            logger.info("client: server closed the connection");
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);

        while let Some(pos) = buffer.iter().position(|&b| b == SENTINEL) {
            let mut body: Vec<u8> = buffer.drain(..=pos).collect();
            body.pop();
            let Ok(frame) = Frame::decode(&body) else { continue };
            logger.info(format!(
                "client: <- scope={:?} slot={} opcode={}",
                frame.scope, frame.slot, frame.opcode
            ));

            if my_slot.is_none() && frame.opcode == opcode::global::ASSIGN_ID {
                my_slot = frame.payload.first().map(|b| b.wrapping_sub(codec::NUMERAL_OFFSET));
                if let Some(slot) = my_slot {
                    logger.info(format!("client: assigned slot {slot}"));
                    let ready = Frame::new(Scope::Room, slot, opcode::room::READY, vec![]).encode();
                    stream.write_all(&ready).await?;
                }
            }
        }
    }

    Ok(())
}
