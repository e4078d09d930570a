//! WebSocket collaboration server with room-based session routing.
//!
//! ```text
//! Client A ──┐
//!             ├── Room (doc_id) ──┬── ClientSession A ── SenderQueue ── WS A
//! Client B ──┘                    └── ClientSession B ── SenderQueue ── WS B
//! ```
//!
//! A client joins a document room with a `load: <doc-uuid>` frame; every
//! later frame it sends is fanned out to the other sessions in the room.
//! Fan-out goes through each receiver's [`SenderQueue`], so bursts of
//! `tile:` / `invalidatecursor:` / `progress:` traffic collapse per
//! receiver instead of piling up on slow sockets.
//!
//! [`SenderQueue`]: crate::queue::SenderQueue

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::session::ClientSession;
use crate::shutdown::{self, ShutdownFlag};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum sessions per document room
    pub max_sessions_per_room: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9980".to_string(),
            max_sessions_per_room: 100,
        }
    }
}

/// Server-wide statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// One document's connected sessions.
#[derive(Default)]
struct Room {
    sessions: HashMap<Uuid, Arc<ClientSession>>,
}

impl Room {
    /// Enqueue a frame on every session except the sender's.
    fn fan_out(&self, from: Uuid, frame: &Message) {
        for (id, session) in &self.sessions {
            if *id == from {
                continue;
            }
            match frame {
                Message::Text(text) => {
                    session.send_text(text.as_str());
                }
                Message::Binary(data) => {
                    session.send_binary(data.to_vec());
                }
                _ => {}
            }
        }
    }
}

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
    stats: Arc<RwLock<ServerStats>>,
    shutdown: ShutdownFlag,
}

impl CollabServer {
    /// Create a server observing the process-global shutdown flag.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_shutdown(config, shutdown::global().clone())
    }

    /// Create a server with a private shutdown flag (used by tests).
    pub fn with_shutdown(config: ServerConfig, shutdown: ShutdownFlag) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
            shutdown,
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Accept connections until shutdown is requested.
    ///
    /// Ctrl-C requests shutdown; queued frames are discarded, not drained.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Collab server listening on {}", self.config.bind_addr);

        loop {
            if self.shutdown.is_set() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    log::debug!("New TCP connection from {addr}");

                    let rooms = self.rooms.clone();
                    let stats = self.stats.clone();
                    let config = self.config.clone();
                    let shutdown = self.shutdown.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, addr, rooms, stats, config, shutdown)
                                .await
                        {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown.request();
                }
                // Re-check the flag even when nothing connects
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }

        self.wake_all_senders().await;
        log::info!("Collab server stopped");
        Ok(())
    }

    /// Nudge every parked sender worker so it can observe the flag.
    async fn wake_all_senders(&self) {
        let rooms = self.rooms.read().await;
        for room in rooms.values() {
            for session in room.sessions.values() {
                session.wake();
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
        shutdown: ShutdownFlag,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // The first frame must join a document room: `load: <doc-uuid>`
        let doc_id = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => match parse_load(text.as_str()) {
                    Some(doc_id) => break doc_id,
                    None => {
                        log::warn!("Rejecting {addr}: first frame was not a valid load");
                        let mut s = stats.write().await;
                        s.active_connections -= 1;
                        return Ok(());
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                _ => {
                    let mut s = stats.write().await;
                    s.active_connections -= 1;
                    return Ok(());
                }
            }
        };

        let session = ClientSession::new(shutdown.clone());
        let session_id = session.id();

        {
            let mut rooms_w = rooms.write().await;
            let room = rooms_w.entry(doc_id).or_default();
            if room.sessions.len() >= config.max_sessions_per_room {
                log::warn!("Room {doc_id} is full, rejecting {addr}");
                let mut s = stats.write().await;
                s.active_connections -= 1;
                return Ok(());
            }
            room.sessions.insert(session_id, session.clone());
            let mut s = stats.write().await;
            s.active_rooms = rooms_w.len();
        }
        log::info!("Session {session_id} joined doc {doc_id} from {addr}");

        // Single consumer for this session's queue
        let sender_task = {
            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.run_sender(&mut ws_sender).await {
                    log::debug!("Session {} sender stopped: {e}", session.id());
                }
            })
        };

        session.send_text(format!("loaded: {doc_id}"));

        // Producer side: every inbound frame goes to the room's peers
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(frame @ (Message::Text(_) | Message::Binary(_))) => {
                    {
                        let mut s = stats.write().await;
                        s.total_messages += 1;
                        s.total_bytes += frame.len() as u64;
                    }
                    let rooms_r = rooms.read().await;
                    if let Some(room) = rooms_r.get(&doc_id) {
                        room.fan_out(session_id, &frame);
                    }
                }
                Ok(Message::Close(_)) => {
                    log::info!("Connection closed from {addr}");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("WebSocket error from {addr}: {e}");
                    break;
                }
            }
        }

        sender_task.abort();

        // Cleanup: drop the session, remove the room when it empties
        {
            let mut rooms_w = rooms.write().await;
            if let Some(room) = rooms_w.get_mut(&doc_id) {
                room.sessions.remove(&session_id);
                if room.sessions.is_empty() {
                    rooms_w.remove(&doc_id);
                    log::info!("Room {doc_id} removed (empty)");
                }
            }
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = rooms_w.len();
        }

        Ok(())
    }

    /// Diagnostic dump of every room, session and queue.
    pub async fn dump_state(&self, out: &mut impl io::Write) -> io::Result<()> {
        let rooms = self.rooms.read().await;
        writeln!(out, "rooms: {}", rooms.len())?;
        for (doc_id, room) in rooms.iter() {
            writeln!(out, "\troom {doc_id}: {} sessions", room.sessions.len())?;
            for session in room.sessions.values() {
                writeln!(out, "\tsession {}:", session.id())?;
                session.queue().dump_state(out)?;
            }
        }
        Ok(())
    }
}

/// Parse a `load: <doc-uuid>` frame.
fn parse_load(text: &str) -> Option<Uuid> {
    let rest = text.strip_prefix("load: ")?;
    Uuid::parse_str(rest.trim()).ok()
}
