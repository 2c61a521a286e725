//! Per-connection task
//!
//! Each accepted connection runs one session task plus one writer task. The
//! session reads frames and feeds positions into the shared context; the
//! writer drains the player's outbox onto the socket. If the writer fails
//! the session ends, so a dead socket is noticed at the next send instead of
//! silently swallowing messages.

use crate::context::ServerContext;
use crate::framing::{Frame, FrameReader};
use log::{debug, error, info, warn};
use shared::{ClientMessage, PlayerId, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    /// In the registry but not yet visible to other players.
    Registered,
    /// Has sent at least one valid position.
    Active,
    Disconnected,
}

/// Why the receive loop ended. Cleanup is the same for every reason.
#[derive(Debug)]
enum EndReason {
    PeerClosed,
    ReadError(std::io::Error),
    WriterFailed,
    Shutdown,
}

/// One connected client, from accept until cleanup
pub struct ClientSession {
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    id: Option<PlayerId>,
    phase: SessionPhase,
}

impl ClientSession {
    /// Creates a session for a freshly accepted connection. Registration
    /// happens when `run` starts.
    pub fn new(ctx: Arc<ServerContext>, addr: SocketAddr) -> Self {
        Self {
            ctx,
            addr,
            id: None,
            phase: SessionPhase::Connecting,
        }
    }

    #[cfg(test)]
    fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[cfg(test)]
    fn player_id(&self) -> Option<PlayerId> {
        self.id
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        debug!("Session {} {:?} -> {:?}", self.addr, self.phase, phase);
        self.phase = phase;
    }

    /// Drives the connection until the peer leaves, the socket fails or the
    /// server stops.
    pub async fn run(mut self, stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        let (reader, writer) = stream.into_split();
        let (outbox, rx) = mpsc::unbounded_channel();

        let id = self.ctx.join(self.addr, outbox).await;
        self.id = Some(id);
        self.set_phase(SessionPhase::Registered);
        info!("Client {} joined as player {}", self.addr, id);

        let mut writer_task = tokio::spawn(writer_loop(id, writer, rx));
        let mut writer_done = false;
        let mut frames = FrameReader::new(reader, self.ctx.config().max_frame_bytes);

        let reason = loop {
            tokio::select! {
                frame = frames.next_frame() => match frame {
                    Ok(Frame::Line(line)) => self.handle_line(id, &line).await,
                    Ok(Frame::Oversized(len)) => {
                        warn!("Discarded oversized frame ({} bytes) from player {}", len, id);
                    }
                    Ok(Frame::Closed) => break EndReason::PeerClosed,
                    Err(e) => break EndReason::ReadError(e),
                },
                _ = &mut writer_task => {
                    writer_done = true;
                    break EndReason::WriterFailed;
                }
                _ = shutdown.changed() => break EndReason::Shutdown,
            }
        };

        match &reason {
            EndReason::PeerClosed => info!("Player {} disconnected", id),
            EndReason::ReadError(e) => error!("Error receiving data from player {}: {}", id, e),
            EndReason::WriterFailed => warn!("Lost outbound stream to player {}", id),
            EndReason::Shutdown => debug!("Closing player {} for shutdown", id),
        }

        // Dropping the registry entry closes the outbox, letting the writer
        // flush what is queued and exit.
        self.ctx.leave(id).await;
        self.set_phase(SessionPhase::Disconnected);

        if !writer_done {
            if let Err(e) = writer_task.await {
                error!("Writer task for player {} panicked: {}", id, e);
            }
        }
    }

    async fn handle_line(&mut self, id: PlayerId, line: &[u8]) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        match ClientMessage::decode(line) {
            Ok(ClientMessage::Position(position)) => {
                let relayed = self.ctx.update_position(id, position).await;
                if self.phase == SessionPhase::Registered {
                    self.set_phase(SessionPhase::Active);
                }
                debug!("Player {} moved to {:?}, relayed to {}", id, position, relayed);

                self.ctx.check_tag_after_move(id).await;
            }
            Err(e) => {
                warn!(
                    "Ignoring frame from player {}: {} ({})",
                    id,
                    e,
                    String::from_utf8_lossy(line)
                );
            }
        }
    }
}

/// Writes queued messages until the outbox closes or the socket fails.
async fn writer_loop(
    id: PlayerId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {:?} for player {}: {}", message, id, e);
                continue;
            }
        };

        if let Err(e) = writer.write_all(&bytes).await {
            warn!("Failed to send to player {}: {}", id, e);
            return;
        }
    }

    let _ = writer.shutdown().await;
}
