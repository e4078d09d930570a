//! Per-client session state: the sender queue plus its single consumer.
//!
//! ```text
//! document kit ──┐
//! tile renderer ─┼─ send() ─► SenderQueue ─┐
//! broadcasters ──┘     │                   ├─ run_sender() ─► WebSocket sink
//!                      └─ notify_one ──► Notify
//! ```
//!
//! The queue itself is polling-friendly and never blocks on empty, so the
//! session layers a `Notify` next to it: producers signal after the
//! append commits, and the sender worker parks there when it drains the
//! queue dry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::message::{OutboundMessage, QueueItem};
use crate::queue::SenderQueue;
use crate::shutdown::ShutdownFlag;

/// Snapshot of one session's send-side counters.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub queued: usize,
}

/// One connected client's outbound half.
pub struct ClientSession {
    id: Uuid,
    queue: SenderQueue<OutboundMessage>,
    wakeup: Notify,
    shutdown: ShutdownFlag,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl ClientSession {
    pub fn new(shutdown: ShutdownFlag) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            queue: SenderQueue::new(shutdown.clone()),
            wakeup: Notify::new(),
            shutdown,
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue(&self) -> &SenderQueue<OutboundMessage> {
        &self.queue
    }

    /// Queue a frame for this client and wake the sender worker.
    /// Returns the resident count after the operation.
    pub fn send(&self, msg: OutboundMessage) -> usize {
        let queued = self.queue.enqueue(Arc::new(msg));
        self.wakeup.notify_one();
        queued
    }

    pub fn send_text(&self, payload: impl Into<String>) -> usize {
        self.send(OutboundMessage::text(payload))
    }

    pub fn send_binary(&self, payload: Vec<u8>) -> usize {
        self.send(OutboundMessage::binary(payload))
    }

    /// Wake the sender worker without queueing anything, so it can notice
    /// the shutdown flag while parked on an empty queue.
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            queued: self.queue.size(),
        }
    }

    /// The session's sender worker: drain the queue into the WebSocket
    /// sink, park on the wakeup when empty, exit once shutdown is
    /// requested. Residents left at shutdown are discarded untransmitted.
    pub async fn run_sender<S>(&self, sink: &mut S) -> Result<(), S::Error>
    where
        S: Sink<Message> + Unpin,
    {
        loop {
            while let Some(item) = self.queue.dequeue() {
                let frame = if item.is_binary() {
                    Message::Binary(item.data().to_vec().into())
                } else {
                    Message::Text(String::from_utf8_lossy(item.data()).into_owned().into())
                };
                sink.send(frame).await?;
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(item.size() as u64, Ordering::Relaxed);
            }

            if self.shutdown.is_set() {
                log::debug!("Session {} sender exiting on shutdown", self.id);
                return Ok(());
            }

            self.wakeup.notified().await;
        }
    }
}
