//! Outbound message items and the capability set the sender queue needs.
//!
//! The queue never owns the wire format; it sees each message through the
//! narrow [`QueueItem`] surface, just enough to classify it for
//! deduplication and render it for diagnostics. [`OutboundMessage`] is the
//! concrete item the server's producers build; other producers can bring
//! their own implementation.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::protocol;

/// Capability set the sender queue requires of an outbound message.
///
/// Implementations must be pure with respect to the queue: none of these
/// methods may call back into the queue that holds the item.
pub trait QueueItem {
    /// Raw payload bytes. For binary frames the first line is still a
    /// textual header.
    fn data(&self) -> &[u8];

    /// Payload length in bytes.
    fn size(&self) -> usize {
        self.data().len()
    }

    /// Whether the frame is transmitted as binary.
    fn is_binary(&self) -> bool;

    /// Opaque identifier for diagnostics.
    fn id(&self) -> u64;

    /// First line of the payload, lossy-decoded.
    fn first_line(&self) -> Cow<'_, str> {
        protocol::first_line(self.data())
    }

    /// Command token of the first line.
    fn first_token(&self) -> Cow<'_, str> {
        protocol::first_token(self.data())
    }

    /// Whether the command token equals `token`.
    fn first_token_matches(&self, token: &str) -> bool {
        protocol::first_token_matches(self.data(), token)
    }

    /// The JSON document carried after the command token, for the
    /// JSON-bearing commands (`progress:`, `invalidateviewcursor:`).
    fn json_string(&self) -> String {
        let line = self.first_line();
        match line.split_once(char::is_whitespace) {
            Some((_token, rest)) => rest.trim().to_string(),
            None => String::new(),
        }
    }

    /// Substring probe over the payload bytes.
    fn contains(&self, needle: &str) -> bool {
        let needle = needle.as_bytes();
        if needle.is_empty() {
            return true;
        }
        self.data().windows(needle.len()).any(|w| w == needle)
    }

    /// Cache the tile position hash. Written once by the queue before the
    /// item becomes resident; later writes are ignored.
    fn set_hash(&self, hash: u32);

    /// The cached tile position hash, if one was set.
    fn hash(&self) -> Option<u32>;
}

fn next_message_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// An outbound frame destined for one client's WebSocket.
#[derive(Debug)]
pub struct OutboundMessage {
    id: u64,
    data: Vec<u8>,
    binary: bool,
    /// Write-once scratch slot owned by the queue (tile position hash).
    tile_hash: OnceLock<u32>,
}

impl OutboundMessage {
    /// A text frame.
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            id: next_message_id(),
            data: payload.into().into_bytes(),
            binary: false,
            tile_hash: OnceLock::new(),
        }
    }

    /// A binary frame (textual header line + raw bytes, typically a
    /// rendered tile).
    pub fn binary(payload: Vec<u8>) -> Self {
        Self {
            id: next_message_id(),
            data: payload,
            binary: true,
            tile_hash: OnceLock::new(),
        }
    }
}

impl QueueItem for OutboundMessage {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn is_binary(&self) -> bool {
        self.binary
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn set_hash(&self, hash: u32) {
        let _ = self.tile_hash.set(hash);
    }

    fn hash(&self) -> Option<u32> {
        self.tile_hash.get().copied()
    }
}
