//! Process-wide shutdown flag.
//!
//! A single one-way boolean shared by every component that has to stop
//! accepting or dispensing work. The server's signal handler sets it;
//! sender queues and worker loops only read it. Transitions are one-way
//! (clear → set, never back), so an unsynchronized read that observes a
//! stale "clear" merely delays shutdown by one item.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Cheap clonable handle on a one-way shutdown boolean.
///
/// Every [`crate::queue::SenderQueue`] is constructed with one of these.
/// Production code hands out clones of [`global()`]; tests create private
/// flags so parallel tests cannot shut each other down.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a fresh, clear flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; there is no way to clear the flag.
    pub fn request(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            log::info!("Shutdown requested");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The process-global shutdown flag.
///
/// The server wires this to SIGINT via `tokio::signal::ctrl_c`.
pub fn global() -> &'static ShutdownFlag {
    static GLOBAL: OnceLock<ShutdownFlag> = OnceLock::new();
    GLOBAL.get_or_init(ShutdownFlag::new)
}
