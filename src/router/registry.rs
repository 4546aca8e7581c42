//! Address-indexed mailbox store with a global monotonic frame-ID counter.

use crate::frame;
use crate::types::{ADDRESS_BYTES, FRAME_HEADER_SIZE, encode_address};
use crate::router::mailbox::Mailbox;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Raw traffic counters. Byte counts cover the routed frame bodies, not the
/// HTTP envelope.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Traffic {
    pub in_bytes: u64,
    pub in_frames: u64,
    pub out_bytes: u64,
    pub out_frames: u64,
}

/// Per-second rates derived from counter deltas by the reaper.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TrafficRates {
    pub in_bytes_per_sec: u64,
    pub in_frames_per_sec: u64,
    pub in_kb_per_sec: u64,
    pub in_mb_per_sec: u64,
    pub out_bytes_per_sec: u64,
    pub out_frames_per_sec: u64,
    pub out_kb_per_sec: u64,
    pub out_mb_per_sec: u64,
}

/// One row of the per-mailbox listing inside the debug snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MailboxCount {
    pub address: String,
    pub messages: usize,
}

/// The JSON document served at `/api/debug`.
#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub timestamp: String,
    pub address_count: usize,
    pub next_frame_id: u64,
    pub totals: Traffic,
    pub rates: TrafficRates,
    pub mailboxes: Vec<MailboxCount>,
}

struct RegistryState {
    addresses: HashMap<String, Arc<Mailbox>>,
    next_id: u64,
    stat: Traffic,
    rates: TrafficRates,
    snapshot: Arc<Vec<u8>>,
}

/// Mapping `address → Mailbox` plus everything that must share its lock:
/// the frame-ID allocator and the global traffic counters.
///
/// Lock order is registry → mailbox, never the reverse. Deposits release
/// the registry lock before touching the mailbox so depositors to distinct
/// mailboxes never convoy.
pub struct MailboxRegistry {
    state: Mutex<RegistryState>,
    default_limit: usize,
}

impl MailboxRegistry {
    pub fn new(default_limit: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                addresses: HashMap::new(),
                // IDs start at 1 so an `afterId = 0` cursor covers the very
                // first deposit.
                next_id: 1,
                stat: Traffic::default(),
                rates: TrafficRates::default(),
                snapshot: Arc::new(b"{}".to_vec()),
            }),
            default_limit,
        }
    }

    /// Deposit a transport frame into the mailbox addressed by its
    /// destination field, creating the mailbox on first write. Returns the
    /// allocated frame ID, or `None` for a frame too short to carry one.
    pub fn deposit(&self, frame: &[u8]) -> Option<u64> {
        if frame.len() < FRAME_HEADER_SIZE {
            debug!("deposit dropped: {} byte frame", frame.len());
            return None;
        }
        let key = encode_address(frame::dst_address(frame));

        let (mailbox, id) = {
            let mut state = self.state.lock().expect("registry poisoned");
            let mailbox = state
                .addresses
                .entry(key)
                .or_insert_with(|| Arc::new(Mailbox::new(self.default_limit)))
                .clone();
            let id = state.next_id;
            state.next_id += 1;
            state.stat.in_frames += 1;
            state.stat.in_bytes += frame.len() as u64;
            (mailbox, id)
        };

        // Outside the registry lock: per-mailbox I/O must not serialise
        // depositors that target different addresses.
        mailbox.put(id, frame.to_vec());
        Some(id)
    }

    /// Cursor read against the mailbox owned by `src` (a reader always
    /// reads its own mailbox). An unknown address is not an error: the
    /// response is eight zero bytes.
    pub fn read(&self, after_id: u64, max_bytes: u64, src: &[u8]) -> Vec<u8> {
        let key = encode_address(src);
        let mailbox = {
            let state = self.state.lock().expect("registry poisoned");
            state.addresses.get(&key).cloned()
        };

        let Some(mailbox) = mailbox else {
            return vec![0u8; 8];
        };

        let result = mailbox.read_since(after_id, max_bytes);

        {
            let mut state = self.state.lock().expect("registry poisoned");
            state.stat.out_frames += result.count as u64;
            state.stat.out_bytes += result.payload.len() as u64;
        }

        let mut response = Vec::with_capacity(8 + result.payload.len());
        response.extend_from_slice(&result.last_id.to_le_bytes());
        response.extend_from_slice(&result.payload);
        response
    }

    /// Handle the 46-byte read-request payload:
    /// `u64_le(afterId) ‖ u64_le(maxBytes) ‖ srcAddr(30)`.
    pub fn read_request(&self, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.len() < 16 + ADDRESS_BYTES {
            return None;
        }
        let after_id = u64::from_le_bytes(payload[0..8].try_into().ok()?);
        let max_bytes = u64::from_le_bytes(payload[8..16].try_into().ok()?);
        Some(self.read(after_id, max_bytes, &payload[16..16 + ADDRESS_BYTES]))
    }

    /// Remove mailboxes idle past `idle`, then trim stale entries from the
    /// survivors. Trims run after the registry lock is released.
    pub fn evict(&self, idle: Duration, stale: Duration) {
        let survivors: Vec<Arc<Mailbox>> = {
            let mut state = self.state.lock().expect("registry poisoned");
            let before = state.addresses.len();
            state.addresses.retain(|_, mailbox| !mailbox.is_idle(idle));
            let evicted = before - state.addresses.len();
            if evicted > 0 {
                debug!("evicted {} idle mailbox(es), {} remain", evicted, state.addresses.len());
            }
            state.addresses.values().cloned().collect()
        };

        for mailbox in survivors {
            mailbox.trim(stale);
        }
    }

    pub fn address_count(&self) -> usize {
        self.state.lock().expect("registry poisoned").addresses.len()
    }

    pub fn next_id(&self) -> u64 {
        self.state.lock().expect("registry poisoned").next_id
    }

    pub fn traffic(&self) -> Traffic {
        self.state.lock().expect("registry poisoned").stat
    }

    pub fn rates(&self) -> TrafficRates {
        self.state.lock().expect("registry poisoned").rates
    }

    pub fn set_rates(&self, rates: TrafficRates) {
        self.state.lock().expect("registry poisoned").rates = rates;
    }

    /// Per-mailbox message counts, largest first, ties by address.
    pub fn mailbox_counts(&self) -> Vec<MailboxCount> {
        let state = self.state.lock().expect("registry poisoned");
        let mut counts: Vec<MailboxCount> = state
            .addresses
            .iter()
            .map(|(address, mailbox)| MailboxCount {
                address: address.clone(),
                messages: mailbox.len(),
            })
            .collect();
        counts.sort_by(|a, b| b.messages.cmp(&a.messages).then_with(|| a.address.cmp(&b.address)));
        counts
    }

    /// Raise the stored-frame cap of one mailbox. Used by the billing
    /// collaborator off the hot path; a miss is not an error.
    pub fn set_mailbox_limit(&self, address: &str, limit: usize) -> bool {
        let state = self.state.lock().expect("registry poisoned");
        match state.addresses.get(address) {
            Some(mailbox) => {
                mailbox.set_limit(limit);
                true
            }
            None => false,
        }
    }

    /// Swap in a freshly built debug snapshot.
    pub fn publish_snapshot(&self, snapshot: Vec<u8>) {
        self.state.lock().expect("registry poisoned").snapshot = Arc::new(snapshot);
    }

    /// The latest published snapshot. Copied out under the registry lock.
    pub fn debug_snapshot(&self) -> Arc<Vec<u8>> {
        self.state.lock().expect("registry poisoned").snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_frame;
    use crate::types::ADDRESS_BYTES as AB;

    fn addr(fill: u8) -> [u8; AB] {
        [fill; AB]
    }

    #[test]
    fn test_deposit_allocates_increasing_ids() {
        let registry = MailboxRegistry::new(100);
        let f = build_frame(0x10, &addr(1), &addr(2), b"x");
        let a = registry.deposit(&f).unwrap();
        let b = registry.deposit(&f).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn test_ids_shared_across_mailboxes() {
        let registry = MailboxRegistry::new(100);
        let to_b = build_frame(0x10, &addr(1), &addr(2), b"x");
        let to_c = build_frame(0x10, &addr(1), &addr(3), b"y");
        assert_eq!(registry.deposit(&to_b), Some(1));
        assert_eq!(registry.deposit(&to_c), Some(2));
        assert_eq!(registry.deposit(&to_b), Some(3));
        assert_eq!(registry.address_count(), 2);
    }

    #[test]
    fn test_read_unknown_address_is_zeroes() {
        let registry = MailboxRegistry::new(100);
        let response = registry.read(0, u64::MAX, &addr(9));
        assert_eq!(response, vec![0u8; 8]);
    }

    #[test]
    fn test_deposit_then_read_roundtrip() {
        let registry = MailboxRegistry::new(100);
        let f = build_frame(0x10, &addr(1), &addr(2), b"payload");
        let id = registry.deposit(&f).unwrap();
        let response = registry.read(0, 65536, &addr(2));
        assert_eq!(&response[0..8], &id.to_le_bytes());
        assert_eq!(&response[8..], &f[..]);
    }

    #[test]
    fn test_short_frame_dropped() {
        let registry = MailboxRegistry::new(100);
        assert_eq!(registry.deposit(&[0u8; 64]), None);
        assert_eq!(registry.address_count(), 0);
    }

    #[test]
    fn test_traffic_counters() {
        let registry = MailboxRegistry::new(100);
        let f = build_frame(0x10, &addr(1), &addr(2), b"abc");
        registry.deposit(&f).unwrap();
        registry.read(0, u64::MAX, &addr(2));
        let t = registry.traffic();
        assert_eq!(t.in_frames, 1);
        assert_eq!(t.in_bytes, f.len() as u64);
        assert_eq!(t.out_frames, 1);
        assert_eq!(t.out_bytes, f.len() as u64);
    }

    #[test]
    fn test_evict_removes_only_idle() {
        let registry = MailboxRegistry::new(100);
        let f = build_frame(0x10, &addr(1), &addr(2), b"x");
        registry.deposit(&f).unwrap();
        registry.evict(Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(registry.address_count(), 1);
        registry.evict(Duration::from_secs(0), Duration::from_secs(60));
        assert_eq!(registry.address_count(), 0);
    }
}
