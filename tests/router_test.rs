//! Registry and mailbox semantics
//!
//! Run with: cargo test --test router_test

use rendev::frame::{Frames, build_frame};
use rendev::router::MailboxRegistry;
use rendev::types::{ADDRESS_BYTES, MAX_MESSAGES};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn addr(fill: u8) -> [u8; ADDRESS_BYTES] {
    [fill; ADDRESS_BYTES]
}

fn transport_frame(src: u8, dst: u8, payload: &[u8]) -> Vec<u8> {
    build_frame(0x10, &addr(src), &addr(dst), payload)
}

// =============================================================================
// DEPOSIT AND READ
// =============================================================================

#[test]
fn test_deposit_and_read_roundtrip() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);

    // Alice posts a 200-byte frame to Bob.
    let frame = transport_frame(0xA1, 0xB2, &[0x55; 72]);
    assert_eq!(frame.len(), 200);
    let id = registry.deposit(&frame).unwrap();

    // Bob polls his own mailbox from a zero cursor.
    let mut request = Vec::new();
    request.extend_from_slice(&0u64.to_le_bytes());
    request.extend_from_slice(&65536u64.to_le_bytes());
    request.extend_from_slice(&addr(0xB2));
    let response = registry.read_request(&request).unwrap();

    assert_eq!(&response[0..8], &id.to_le_bytes());
    assert_eq!(&response[8..], &frame[..]);
}

#[test]
fn test_first_deposit_gets_id_one() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    let id = registry.deposit(&transport_frame(1, 2, b"x")).unwrap();
    assert_eq!(id, 1);
}

#[test]
fn test_read_is_idempotent() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    registry.deposit(&transport_frame(1, 2, b"one")).unwrap();
    registry.deposit(&transport_frame(1, 2, b"two")).unwrap();

    let a = registry.read(0, u64::MAX, &addr(2));
    let b = registry.read(0, u64::MAX, &addr(2));
    assert_eq!(a, b);
}

#[test]
fn test_cursor_advance_returns_nothing_new() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    registry.deposit(&transport_frame(1, 2, b"one")).unwrap();

    let first = registry.read(0, u64::MAX, &addr(2));
    let last_id = u64::from_le_bytes(first[0..8].try_into().unwrap());
    assert!(first.len() > 8);

    let second = registry.read(last_id, u64::MAX, &addr(2));
    assert_eq!(second.len(), 8);
    assert_eq!(u64::from_le_bytes(second[0..8].try_into().unwrap()), last_id);
}

#[test]
fn test_wrap_recovery_returns_everything() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    registry.deposit(&transport_frame(1, 2, b"one")).unwrap();
    registry.deposit(&transport_frame(1, 2, b"two")).unwrap();

    // A reader that survived a mailbox eviction holds a cursor far past
    // the recreated mailbox's IDs.
    let response = registry.read(1_000_000, u64::MAX, &addr(2));
    let delivered = Frames::new(&response[8..]).count();
    assert_eq!(delivered, 2);
    assert_eq!(u64::from_le_bytes(response[0..8].try_into().unwrap()), 2);
}

// =============================================================================
// RING BOUNDS
// =============================================================================

#[test]
fn test_ring_drop_at_capacity() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    let mut last_allocated = 0;
    for i in 0..(MAX_MESSAGES as u32 + 1) {
        let frame = transport_frame(1, 2, &i.to_le_bytes().repeat(18));
        last_allocated = registry.deposit(&frame).unwrap();
    }

    let response = registry.read(0, u64::MAX, &addr(2));
    let last_id = u64::from_le_bytes(response[0..8].try_into().unwrap());
    assert_eq!(last_id, last_allocated);

    let frames: Vec<&[u8]> = Frames::new(&response[8..]).collect();
    assert_eq!(frames.len(), MAX_MESSAGES);
    // The very first deposit (payload counter 0) was dropped.
    let first_counter = u32::from_le_bytes(frames[0][128..132].try_into().unwrap());
    assert_eq!(first_counter, 1);
}

#[test]
fn test_max_bytes_cuts_contiguously() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    for _ in 0..3 {
        registry.deposit(&transport_frame(1, 2, &[0u8; 72])).unwrap(); // 200 bytes each
    }
    let response = registry.read(0, 450, &addr(2));
    let delivered = Frames::new(&response[8..]).count();
    assert_eq!(delivered, 2);
    assert_eq!(u64::from_le_bytes(response[0..8].try_into().unwrap()), 2);
}

// =============================================================================
// EVICTION
// =============================================================================

#[test]
fn test_idle_mailbox_is_evicted() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    registry.deposit(&transport_frame(1, 2, b"x")).unwrap();
    assert_eq!(registry.address_count(), 1);

    thread::sleep(Duration::from_millis(120));
    registry.evict(Duration::from_millis(50), Duration::from_secs(60));
    assert_eq!(registry.address_count(), 0);

    // A read against the evicted address is not an error.
    let response = registry.read(0, u64::MAX, &addr(2));
    assert_eq!(response, vec![0u8; 8]);
}

#[test]
fn test_fresh_write_protects_from_eviction() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    registry.deposit(&transport_frame(1, 2, b"x")).unwrap();
    thread::sleep(Duration::from_millis(80));
    registry.deposit(&transport_frame(1, 2, b"y")).unwrap();
    registry.evict(Duration::from_millis(60), Duration::from_secs(60));
    assert_eq!(registry.address_count(), 1);
}

#[test]
fn test_stale_messages_are_trimmed() {
    let registry = MailboxRegistry::new(MAX_MESSAGES);
    registry.deposit(&transport_frame(1, 2, b"old")).unwrap();
    thread::sleep(Duration::from_millis(100));
    // Mailbox stays (recent enough for the idle horizon) but the entry is
    // past the stale horizon.
    registry.evict(Duration::from_secs(60), Duration::from_millis(50));
    assert_eq!(registry.address_count(), 1);
    let response = registry.read(0, u64::MAX, &addr(2));
    assert_eq!(response.len(), 8);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn test_concurrent_deposits_keep_per_mailbox_order() {
    let registry = Arc::new(MailboxRegistry::new(MAX_MESSAGES));
    let ids: Arc<Mutex<Vec<(u8, u64)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for worker in 0..8u8 {
        let registry = registry.clone();
        let ids = ids.clone();
        handles.push(thread::spawn(move || {
            for i in 0..100u32 {
                let dst = worker % 4;
                let frame = transport_frame(worker, dst, &i.to_le_bytes());
                let id = registry.deposit(&frame).unwrap();
                ids.lock().unwrap().push((dst, id));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Every ID is unique and each mailbox holds exactly its deposits.
    let ids = ids.lock().unwrap();
    let mut all: Vec<u64> = ids.iter().map(|(_, id)| *id).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 800);

    for dst in 0..4u8 {
        let expected = ids.iter().filter(|(d, _)| *d == dst).count();
        let max_id = ids.iter().filter(|(d, _)| *d == dst).map(|(_, id)| *id).max().unwrap();
        let response = registry.read(0, u64::MAX, &addr(dst));
        let delivered = Frames::new(&response[8..]).count();
        assert_eq!(delivered, expected);
        assert_eq!(u64::from_le_bytes(response[0..8].try_into().unwrap()), max_id);
    }
}
