//! Per-address bounded frame ring with monotonic IDs and cursor reads.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct StoredFrame {
    id: u64,
    data: Vec<u8>,
    stored_at: Instant,
}

struct MailboxState {
    entries: VecDeque<StoredFrame>,
    /// Stored-frame cap. The billing collaborator may raise it for premium
    /// addresses; it never shrinks below the live entry count mid-flight.
    limit: usize,
    /// Last write wall time, drives idle eviction.
    touched_at: Instant,
    /// Writes accepted over the mailbox lifetime.
    writes: u64,
    /// Smallest and largest IDs ever stored. Survive trims so a stale
    /// reader can be re-synchronised even against an emptied mailbox.
    min_seen: u64,
    max_seen: u64,
    has_ids: bool,
}

/// Result of a cursor read.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadResult {
    /// Concatenated frames, each still carrying its own length prefix.
    pub payload: Vec<u8>,
    /// Highest delivered ID, or the re-synchronised cursor when nothing
    /// was delivered.
    pub last_id: u64,
    /// Delivered entry count.
    pub count: usize,
}

/// Bounded FIFO of deposited frames for one address.
///
/// All operations serialise on the mailbox mutex: a read sees a consistent
/// snapshot and never interleaves with a write or trim.
pub struct Mailbox {
    state: Mutex<MailboxState>,
}

impl Mailbox {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                entries: VecDeque::with_capacity(64),
                limit: limit.max(1),
                touched_at: Instant::now(),
                writes: 0,
                min_seen: 0,
                max_seen: 0,
                has_ids: false,
            }),
        }
    }

    /// Append `(id, frame)`. Drops the oldest entry once the cap is
    /// exceeded; the surviving minimum ID rises, nothing is renumbered.
    pub fn put(&self, id: u64, frame: Vec<u8>) {
        let mut state = self.state.lock().expect("mailbox poisoned");
        let entry = StoredFrame { id, data: frame, stored_at: Instant::now() };
        // IDs are allocated under the registry lock but deposited after its
        // release, so a slower depositor can arrive out of order. Insert at
        // the sorted position; the common case is a plain append.
        let pos = state
            .entries
            .iter()
            .rposition(|e| e.id <= id)
            .map(|p| p + 1)
            .unwrap_or(0);
        if pos == state.entries.len() {
            state.entries.push_back(entry);
        } else {
            state.entries.insert(pos, entry);
        }
        while state.entries.len() > state.limit {
            state.entries.pop_front();
        }
        if !state.has_ids {
            state.min_seen = id;
            state.has_ids = true;
        }
        state.max_seen = state.max_seen.max(id);
        if let Some(front) = state.entries.front() {
            state.min_seen = front.id;
        }
        state.touched_at = Instant::now();
        state.writes += 1;
    }

    /// Concatenate every entry with `id > after_id`, stopping at the first
    /// entry that would push the payload to `max_bytes` or beyond.
    ///
    /// A cursor beyond the current maximum ID means the mailbox was
    /// recreated under a long-lived reader; the scan then resets and
    /// delivers everything currently stored.
    pub fn read_since(&self, after_id: u64, max_bytes: u64) -> ReadResult {
        let state = self.state.lock().expect("mailbox poisoned");
        let mut result = ReadResult { payload: Vec::new(), last_id: after_id, count: 0 };

        match state.entries.back() {
            Some(back) => {
                let reset = after_id > back.id;
                for entry in &state.entries {
                    if !reset && entry.id <= after_id {
                        continue;
                    }
                    if result.payload.len() as u64 + entry.data.len() as u64 >= max_bytes {
                        break;
                    }
                    result.payload.extend_from_slice(&entry.data);
                    result.last_id = entry.id;
                    result.count += 1;
                }
                if result.count == 0 && reset {
                    // Nothing fit; still hand the reader a usable cursor.
                    result.last_id = state.entries.front().map(|e| e.id).unwrap_or(after_id);
                }
            }
            None => {
                if state.has_ids && after_id > state.max_seen {
                    result.last_id = state.min_seen;
                }
            }
        }

        result
    }

    /// Drop entries older than `max_age`. Entries sit in deposit order, so
    /// the stale prefix is contiguous.
    pub fn trim(&self, max_age: Duration) {
        let mut state = self.state.lock().expect("mailbox poisoned");
        while state
            .entries
            .front()
            .map(|e| e.stored_at.elapsed() > max_age)
            .unwrap_or(false)
        {
            state.entries.pop_front();
        }
        if let Some(front) = state.entries.front() {
            state.min_seen = front.id;
        }
    }

    /// True when no write has landed within `horizon`.
    pub fn is_idle(&self, horizon: Duration) -> bool {
        self.state.lock().expect("mailbox poisoned").touched_at.elapsed() > horizon
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("mailbox poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn writes(&self) -> u64 {
        self.state.lock().expect("mailbox poisoned").writes
    }

    pub fn limit(&self) -> usize {
        self.state.lock().expect("mailbox poisoned").limit
    }

    pub fn set_limit(&self, limit: usize) {
        self.state.lock().expect("mailbox poisoned").limit = limit.max(1);
    }
}
