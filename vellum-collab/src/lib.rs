//! # vellum-collab — realtime document-collaboration server core
//!
//! Session plumbing for a collaborative document server, built around a
//! per-session outbound queue that deduplicates semantically redundant
//! traffic before it reaches the socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   WebSocket    ┌──────────────┐
//! │ Client A │ ◄─────────────►│ CollabServer │
//! └──────────┘                └──────┬───────┘
//!                                    │ fan-out per room
//!                     ┌──────────────┴──────────────┐
//!                     ▼                             ▼
//!             ┌──────────────┐              ┌──────────────┐
//!             │ClientSession │              │ClientSession │
//!             │ SenderQueue  │              │ SenderQueue  │
//!             │  (dedup)     │              │  (dedup)     │
//!             └──────┬───────┘              └──────┬───────┘
//!                    ▼ sender worker               ▼
//!                 WS frames                     WS frames
//! ```
//!
//! ## Modules
//!
//! - [`queue`] — per-session sender queue with semantic deduplication
//! - [`message`] — queue item trait and the concrete outbound frame
//! - [`protocol`] — first-token / abbreviation helpers for the textual protocol
//! - [`tile`] — tile descriptor parsing and positional equality
//! - [`session`] — session state and the queue's sender worker
//! - [`server`] — WebSocket server with room-based fan-out
//! - [`shutdown`] — process-wide one-way termination flag

pub mod message;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod tile;

// Re-exports for convenience
pub use message::{OutboundMessage, QueueItem};
pub use queue::SenderQueue;
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use session::{ClientSession, SessionStats};
pub use shutdown::ShutdownFlag;
pub use tile::{TileDesc, TileParseError};
