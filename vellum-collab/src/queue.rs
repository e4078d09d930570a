//! Per-session outbound queue with semantic deduplication.
//!
//! Every connected client session owns one [`SenderQueue`]. Producers
//! (document kit, tile renderer, event broadcasters) enqueue frames bound
//! for that client; the session's sender worker dequeues them and writes
//! them to the socket. Under burst load the queue keeps latency down by
//! collapsing messages where only the latest copy matters — stale tile
//! renders, obsolete cursor positions, superseded progress updates —
//! while preserving FIFO order for everything that survives.
//!
//! ```text
//! producers ──┐
//! producers ──┼── enqueue ──► [ dedup filter │ VecDeque ] ── dequeue ──► sender worker ──► WS
//! producers ──┘                    (mutex)
//! ```
//!
//! ## Deduplication
//!
//! The newcomer's command token picks the rule; at most one older resident
//! is erased per enqueue, and the newcomer always lands at the tail
//! (newest copy wins, tail position):
//!
//! | Command | Collides with resident when… |
//! |---|---|
//! | `tile:` | same cached position hash, confirmed by `TileDesc` equality |
//! | `invalidatecursor:` | same command |
//! | `setpart:` | same command |
//! | `progress:` + `"id":"setvalue"` | same command, also tagged |
//! | `invalidateviewcursor:` | same command, same JSON `viewId` |
//!
//! The queue is polling-friendly, not blocking: `dequeue` on an empty
//! queue returns `None` and wakeup is layered outside (the session pairs
//! the queue with a `Notify`).

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

use crate::message::QueueItem;
use crate::protocol;
use crate::shutdown::ShutdownFlag;
use crate::tile::TileDesc;

const CMD_TILE: &str = "tile:";
const CMD_INVALIDATE_CURSOR: &str = "invalidatecursor:";
const CMD_SET_PART: &str = "setpart:";
const CMD_PROGRESS: &str = "progress:";
const CMD_INVALIDATE_VIEW_CURSOR: &str = "invalidateviewcursor:";

/// `progress:` messages carrying this tag are pure value updates; only
/// the latest one is worth sending.
const SETVALUE_TAG: &str = "\"id\":\"setvalue\"";

/// The slice of an `invalidateviewcursor:` payload the dedup rule reads.
#[derive(Debug, Deserialize)]
struct ViewCursorHeader {
    #[serde(rename = "viewId")]
    view_id: serde_json::Value,
}

/// The `viewId` of a view-cursor JSON payload, normalized to a string.
/// `None` on any parse failure — a malformed payload never matches.
fn view_id_of(json: &str) -> Option<String> {
    let header: ViewCursorHeader = serde_json::from_str(json).ok()?;
    Some(match header.view_id {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// A queue of frames to send to one session's WebSocket.
pub struct SenderQueue<T: QueueItem> {
    queue: Mutex<VecDeque<Arc<T>>>,
    shutdown: ShutdownFlag,
}

impl<T: QueueItem> SenderQueue<T> {
    /// Create an empty queue observing the given shutdown flag.
    pub fn new(shutdown: ShutdownFlag) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            shutdown,
        }
    }

    /// A panicked producer must not wedge the session sender; the deque is
    /// valid at every point the lock can be poisoned at.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<T>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer a frame. Returns the resident count after the operation.
    ///
    /// A no-op (returning the current count) once shutdown is requested.
    /// Never blocks beyond the lock, never fails; the dedup filter may
    /// erase one superseded resident before the append.
    pub fn enqueue(&self, item: Arc<T>) -> usize {
        let mut queue = self.lock();

        if !self.shutdown.is_set() && Self::deduplicate(&mut queue, &item) {
            queue.push_back(item);
        }

        queue.len()
    }

    /// Take the oldest surviving frame, or `None` if the queue is empty
    /// or shutdown has been requested.
    pub fn dequeue(&self) -> Option<Arc<T>> {
        // Read deliberately outside the lock: the flag only ever goes
        // clear → set, and a stale clear delays shutdown by one item.
        if self.shutdown.is_set() {
            log::debug!("SenderQueue: shutdown flag is set, will not dequeue");
            return None;
        }

        self.lock().pop_front()
    }

    /// Resident count.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Erase the resident superseded by `item`, if any.
    ///
    /// Scans head → tail and erases at most the oldest colliding resident.
    /// Always returns true: the newcomer itself is never suppressed, only
    /// older peers.
    fn deduplicate(queue: &mut VecDeque<Arc<T>>, item: &T) -> bool {
        let command = item.first_token().into_owned();

        match command.as_str() {
            CMD_TILE => {
                let new_tile = match TileDesc::parse(&item.first_line()) {
                    Ok(tile) => tile,
                    Err(e) => {
                        log::debug!("Not deduplicating malformed tile header: {e}");
                        return true;
                    }
                };
                let new_hash = new_tile.position_hash();
                // Cache the position hash so later scans compare one u32
                // per resident instead of re-parsing its header.
                item.set_hash(new_hash);

                let pos = queue.iter().position(|cur| {
                    if !cur.first_token_matches(CMD_TILE) {
                        return false;
                    }
                    if cur.hash() != Some(new_hash) {
                        return false;
                    }
                    match TileDesc::parse(&cur.first_line()) {
                        Ok(resident) if resident == new_tile => true,
                        Ok(resident) => {
                            log::trace!(
                                "Unusual - tile {} has position hash collision with {} of {new_hash}",
                                new_tile.serialize(),
                                resident.serialize()
                            );
                            false
                        }
                        Err(_) => false,
                    }
                });
                if let Some(pos) = pos {
                    queue.remove(pos);
                }
            }

            CMD_INVALIDATE_CURSOR | CMD_SET_PART => {
                // Only the most recent cursor position / part switch is
                // worth sending.
                let pos = queue
                    .iter()
                    .position(|cur| cur.first_token_matches(&command));
                if let Some(pos) = pos {
                    queue.remove(pos);
                }
            }

            CMD_PROGRESS => {
                if item.contains(SETVALUE_TAG) {
                    let pos = queue.iter().position(|cur| {
                        cur.first_token_matches(CMD_PROGRESS) && cur.contains(SETVALUE_TAG)
                    });
                    if let Some(pos) = pos {
                        queue.remove(pos);
                    }
                }
            }

            CMD_INVALIDATE_VIEW_CURSOR => {
                // Scoped per view: cursor invalidations for different
                // views never collide.
                let Some(view_id) = view_id_of(&item.json_string()) else {
                    return true;
                };
                let pos = queue.iter().position(|cur| {
                    cur.first_token_matches(CMD_INVALIDATE_VIEW_CURSOR)
                        && view_id_of(&cur.json_string()).is_some_and(|id| id == view_id)
                });
                if let Some(pos) = pos {
                    queue.remove(pos);
                }
            }

            _ => {}
        }

        true
    }

    /// Line-oriented diagnostic dump of the resident frames.
    ///
    /// Consecutive text frames with byte-equal abbreviated renderings are
    /// run-length compressed into a `<repeats K times>` line; binary
    /// frames are always printed individually. Every resident is
    /// accounted for either directly or through a repeat line, and the
    /// trailer totals their payload bytes.
    pub fn dump_state(&self, out: &mut impl io::Write) -> io::Result<()> {
        let queue = self.lock();
        let mut total_size = 0usize;

        writeln!(out, "\t\tqueue items: {}", queue.len())?;

        let mut repeats = 0usize;
        let mut last = String::new();
        for item in queue.iter() {
            let abbrev = protocol::abbreviated_message(item.data());
            if abbrev == last && !item.is_binary() {
                repeats += 1;
            } else {
                if repeats > 0 {
                    writeln!(out, "\t\t\t<repeats {repeats} times>")?;
                    repeats = 0;
                }
                writeln!(
                    out,
                    "\t\t\ttype: {}: {} - {}",
                    if item.is_binary() { "binary" } else { "text" },
                    item.id(),
                    abbrev
                )?;
            }
            last = abbrev;
            total_size += item.size();
        }
        if repeats > 0 {
            writeln!(out, "\t\t\t<repeats {repeats} times>")?;
        }
        writeln!(out, "\t\tqueue size: {total_size} bytes")
    }
}
