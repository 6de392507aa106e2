//! The listener: accepts connections and spawns a session per socket,
//! generalized from the teacher's `main()` accept loop in
//! `src/bin/server.rs` from a 2-player pairing loop into a continuously
//! running 4-slot admission loop.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use crate::dispatcher;
use crate::logger::Logger;
use crate::room::Room;
use crate::score::ScoreStore;
use crate::session;

pub struct Server {
    listener: TcpListener,
    logger: Arc<Logger>,
    scores: Arc<ScoreStore>,
}

impl Server {
    pub fn new(listener: TcpListener, logger: Arc<Logger>, scores: Arc<ScoreStore>) -> Self {
        Self { listener, logger, scores }
    }

    /// Runs the accept loop and the dispatcher side by side until
    /// `shutdown` resolves, then stops accepting and lets in-flight
    /// sessions drain on their own.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        let room = Arc::new(Mutex::new(Room::new()));
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let dispatcher_task =
            tokio::spawn(dispatcher::run(dispatch_rx, room.clone(), self.scores.clone(), self.logger.clone()));

        let accept_loop = async {
            loop {
                match self.listener.accept().await {
                    Ok((stream, addr)) => {
                        self.logger.verbose(format!("server: accepted connection from {addr}"));
                        let dispatch_tx = dispatch_tx.clone();
                        let logger = self.logger.clone();
                        tokio::spawn(async move {
                            session::run(stream, dispatch_tx, &logger).await;
                        });
                    }
                    Err(err) => {
                        self.logger.warn(format!("server: accept failed: {err}"));
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown => {
                self.logger.info("server: shutdown signal received, no longer accepting connections");
            }
        }

        drop(dispatch_tx);
        let _ = dispatcher_task.await;
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}
