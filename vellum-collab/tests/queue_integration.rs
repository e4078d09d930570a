//! End-to-end exercises of the sender queue through its public API:
//! mixed-category traffic, producer/consumer threading, and dump
//! accounting under load.

use std::sync::Arc;
use std::thread;

use vellum_collab::{OutboundMessage, QueueItem, SenderQueue, ShutdownFlag};

fn text(payload: &str) -> Arc<OutboundMessage> {
    Arc::new(OutboundMessage::text(payload))
}

fn tile_at(x: i32, y: i32, ver: i32) -> Arc<OutboundMessage> {
    text(&format!(
        "tile: nviewid=0 part=0 width=256 height=256 tileposx={x} tileposy={y} tilewidth=3840 tileheight=3840 ver={ver}"
    ))
}

#[test]
fn mixed_burst_collapses_to_expected_survivors() {
    let q = SenderQueue::new(ShutdownFlag::new());

    // A burst the document kit might produce while a user scrolls:
    // repeated tile renders, cursor churn, progress ticks.
    q.enqueue(text("invalidatecursor: {\"rectangle\":\"0 0 1 1\"}"));
    q.enqueue(tile_at(0, 0, 1));
    q.enqueue(tile_at(3840, 0, 1));
    q.enqueue(text("progress: {\"id\":\"start\",\"text\":\"Saving...\"}"));
    q.enqueue(text("progress: {\"id\":\"setvalue\",\"value\":10}"));
    q.enqueue(text("invalidateviewcursor: {\"viewId\":\"1\",\"rectangle\":\"a\"}"));
    q.enqueue(tile_at(0, 0, 2)); // supersedes the first tile
    q.enqueue(text("progress: {\"id\":\"setvalue\",\"value\":80}")); // supersedes value=10
    q.enqueue(text("invalidateviewcursor: {\"viewId\":\"2\",\"rectangle\":\"b\"}"));
    q.enqueue(text("invalidatecursor: {\"rectangle\":\"2 2 1 1\"}")); // supersedes the first

    let mut lines = Vec::new();
    while let Some(item) = q.dequeue() {
        lines.push(item.first_line().into_owned());
    }

    assert_eq!(
        lines,
        vec![
            "tile: nviewid=0 part=0 width=256 height=256 tileposx=3840 tileposy=0 tilewidth=3840 tileheight=3840 ver=1",
            "progress: {\"id\":\"start\",\"text\":\"Saving...\"}",
            "invalidateviewcursor: {\"viewId\":\"1\",\"rectangle\":\"a\"}",
            "tile: nviewid=0 part=0 width=256 height=256 tileposx=0 tileposy=0 tilewidth=3840 tileheight=3840 ver=2",
            "progress: {\"id\":\"setvalue\",\"value\":80}",
            "invalidateviewcursor: {\"viewId\":\"2\",\"rectangle\":\"b\"}",
            "invalidatecursor: {\"rectangle\":\"2 2 1 1\"}",
        ]
    );
}

#[test]
fn producers_and_consumer_race_without_loss_or_duplication() {
    let q: Arc<SenderQueue<OutboundMessage>> = Arc::new(SenderQueue::new(ShutdownFlag::new()));
    let producer_count = 4;
    let per_producer = 250;

    let consumer = {
        let q = q.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            let expected = producer_count * per_producer;
            while seen.len() < expected {
                match q.dequeue() {
                    Some(item) => seen.push(item.first_line().into_owned()),
                    None => thread::yield_now(),
                }
            }
            seen
        })
    };

    let producers: Vec<_> = (0..producer_count)
        .map(|t| {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    // Distinct tokens per message: nothing collides, so
                    // exactly everything must come out the other side.
                    q.enqueue(Arc::new(OutboundMessage::text(format!("m{t}x{i}: payload"))));
                }
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let seen = consumer.join().unwrap();

    assert_eq!(seen.len(), producer_count * per_producer);

    // Each item observed exactly once, and per-producer FIFO order held
    for t in 0..producer_count {
        let mine: Vec<_> = seen
            .iter()
            .filter(|l| l.starts_with(&format!("m{t}x")))
            .collect();
        assert_eq!(mine.len(), per_producer);
        for (i, line) in mine.iter().enumerate() {
            assert_eq!(**line, format!("m{t}x{i}: payload"));
        }
    }
    assert_eq!(q.size(), 0);
}

#[test]
fn tile_storm_from_many_threads_leaves_one_resident_per_position() {
    let q = Arc::new(SenderQueue::new(ShutdownFlag::new()));

    let producers: Vec<_> = (0..8)
        .map(|t| {
            let q = q.clone();
            thread::spawn(move || {
                for ver in 0..50 {
                    // Two distinct tile positions, hammered from all threads
                    q.enqueue(tile_at(0, 0, t * 100 + ver));
                    q.enqueue(tile_at(0, 3840, t * 100 + ver));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    assert_eq!(q.size(), 2);
    let first = q.dequeue().unwrap();
    let second = q.dequeue().unwrap();
    assert!(first.first_token_matches("tile:"));
    assert!(second.first_token_matches("tile:"));
    assert_ne!(first.first_line(), second.first_line());
}

#[test]
fn dump_accounts_for_every_resident_under_mixed_load() {
    let q = SenderQueue::new(ShutdownFlag::new());

    q.enqueue(text("statechanged: modified=true"));
    for _ in 0..4 {
        q.enqueue(text("cursor: 10 10"));
    }
    q.enqueue(Arc::new(OutboundMessage::binary(b"tile: hdr\nBYTES".to_vec())));
    q.enqueue(Arc::new(OutboundMessage::binary(b"tile: hdr\nBYTES".to_vec())));
    q.enqueue(text("cursor: 10 10"));

    let mut out = Vec::new();
    q.dump_state(&mut out).unwrap();
    let dump = String::from_utf8(out).unwrap();

    let printed = dump.matches("type: ").count();
    let repeated: usize = dump
        .lines()
        .filter_map(|l| l.trim().strip_prefix("<repeats "))
        .filter_map(|l| l.strip_suffix(" times>"))
        .filter_map(|n| n.parse::<usize>().ok())
        .sum();
    assert_eq!(printed + repeated, q.size());

    let expected_bytes =
        "statechanged: modified=true".len() + 5 * "cursor: 10 10".len() + 2 * b"tile: hdr\nBYTES".len();
    assert!(dump.contains(&format!("queue size: {expected_bytes} bytes")));
}

#[test]
fn shutdown_mid_stream_stops_dispensing() {
    let shutdown = ShutdownFlag::new();
    let q = Arc::new(SenderQueue::new(shutdown.clone()));
    for i in 0..10 {
        q.enqueue(text(&format!("k{i}: v")));
    }

    assert!(q.dequeue().is_some());
    shutdown.request();
    assert!(q.dequeue().is_none());
    assert_eq!(q.size(), 9);
    assert_eq!(q.enqueue(text("late: frame")), 9);
}
