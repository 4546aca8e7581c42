//! Protocol constants and shared types for the rendezvous router.
//!
//! # Design Goals
//!
//! 1. **Bounded memory usage** — every mailbox is a fixed-capacity ring and
//!    every HTTP body is capped, so total state is bounded by
//!    `|addresses| × MAX_MESSAGES × frame size`.
//!
//! 2. **No persistent state** — mailbox contents are lost on restart. The
//!    router is a relay, not a store.
//!
//! 3. **Cheap spoofing resistance** — writes can be bound to a freshly
//!    issued proof-of-work nonce (see `router::pow`), off by default to
//!    match the plain HTTP deployment.

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// ADDRESSES
// =============================================================================

/// Raw size of a peer address. Peers derive it from their public key; the
/// router treats it as opaque bytes.
pub const ADDRESS_BYTES: usize = 30;

/// Textual address length: 30 bytes base32-encode to exactly 48 characters,
/// so no padding is ever emitted.
pub const ADDRESS_TEXT_LEN: usize = (ADDRESS_BYTES * 8) / 5;

// =============================================================================
// FRAME LAYOUT
// =============================================================================

/// Reserved header carried by every routed frame. A frame shorter than this
/// is never dispatched.
pub const FRAME_HEADER_SIZE: usize = 128;

/// Offset of the 1-byte frame type within the header.
pub const FRAME_TYPE_OFFSET: usize = 8;

/// Source address location within the header.
pub const FRAME_SRC_OFFSET: usize = 40;

/// Destination address location within the header.
pub const FRAME_DST_OFFSET: usize = 70;

/// First frame type that is routed into a mailbox instead of being handled
/// synchronously. Types below this are control frames.
pub const TRANSPORT_FRAME_TYPE: u8 = 0x10;

/// Upper bound on any single decoded request body (and therefore on any
/// single frame).
pub const INPUT_BUFFER_SIZE: usize = 1024 * 1024;

// =============================================================================
// MAILBOX LIMITS
// =============================================================================

/// Stored frames per mailbox before the oldest entry is dropped.
pub const MAX_MESSAGES: usize = 10_000;

/// A mailbox with no write for this long is removed by the reaper.
pub const IDLE_EVICT_SECS: u64 = 10;

/// Stored frames older than this are trimmed by the reaper.
pub const STALE_MESSAGE_AGE_SECS: u64 = 5;

// =============================================================================
// NONCES
// =============================================================================

/// Challenge token size. Layout: slot index (4, LE) ‖ complexity (1) ‖
/// random (11).
pub const NONCE_SIZE: usize = 16;

/// Offset of the PoW complexity byte inside a nonce.
pub const NONCE_COMPLEXITY_POS: usize = 4;

/// Default pool size. The cursor wraps, so a token also expires implicitly
/// once the pool has been cycled once.
pub const NONCE_COUNT: usize = 100_000;

// =============================================================================
// TRANSPORT
// =============================================================================

/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8084;

/// Default UDP peer-discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8585;

/// Reaper tick. Eviction and stats snapshots run on whole-second
/// boundaries; the short tick bounds stop latency.
pub const REAPER_TICK_MS: u64 = 50;

/// Grace period for in-flight HTTP handlers on shutdown.
pub const HTTP_SHUTDOWN_GRACE_SECS: u64 = 1;

// =============================================================================
// ADDRESS CODEC
// =============================================================================

/// Textual form of a raw address: `#` + lowercase base32. Both the deposit
/// destination and the read source go through this, so a mailbox key is
/// canonical no matter which path created it.
pub fn encode_address(raw: &[u8]) -> String {
    let mut text = String::with_capacity(1 + ADDRESS_TEXT_LEN);
    text.push('#');
    text.push_str(&BASE32_NOPAD.encode(raw).to_ascii_lowercase());
    text
}

/// Parse a textual address back to raw bytes. Case-folds; accepts the
/// leading `#` as optional.
pub fn decode_address(text: &str) -> Option<[u8; ADDRESS_BYTES]> {
    let body = text.strip_prefix('#').unwrap_or(text);
    if body.len() != ADDRESS_TEXT_LEN {
        return None;
    }
    let decoded = BASE32_NOPAD.decode(body.to_ascii_uppercase().as_bytes()).ok()?;
    let mut raw = [0u8; ADDRESS_BYTES];
    if decoded.len() != ADDRESS_BYTES {
        return None;
    }
    raw.copy_from_slice(&decoded);
    Some(raw)
}

// =============================================================================
// CONFIG
// =============================================================================

/// Router configuration. Timing fields are tunable so tests can shrink the
/// reaper horizons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// HTTP listen port.
    pub http_port: u16,
    /// UDP discovery listen port.
    pub discovery_port: u16,
    /// Nonce pool slots.
    pub nonce_count: usize,
    /// Per-mailbox stored-frame cap.
    pub max_messages: usize,
    /// Idle-mailbox eviction horizon, seconds.
    pub idle_evict_secs: u64,
    /// Stale-message trim horizon, seconds.
    pub stale_message_age_secs: u64,
    /// Require a PoW-signed envelope on every transport-frame deposit.
    /// Off by default: the plain HTTP deployment never charged for writes,
    /// which also means a sender address is not authenticated.
    pub require_pow_on_deposit: bool,
    /// Data directory for the billing collaborator.
    pub data_dir: PathBuf,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            nonce_count: NONCE_COUNT,
            max_messages: MAX_MESSAGES,
            idle_evict_secs: IDLE_EVICT_SECS,
            stale_message_age_secs: STALE_MESSAGE_AGE_SECS,
            require_pow_on_deposit: false,
            data_dir: PathBuf::from("./data"),
        }
    }
}
