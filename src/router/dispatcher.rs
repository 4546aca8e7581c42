//! Typed dispatch of length-prefixed frame batches.

use crate::frame::{self, Frames};
use crate::router::nonce::NoncePool;
use crate::router::pow;
use crate::router::registry::MailboxRegistry;
use crate::types::{FRAME_HEADER_SIZE, FRAME_TYPE_OFFSET, NONCE_SIZE, TRANSPORT_FRAME_TYPE};
use std::sync::Arc;
use tracing::debug;

/// Control frame types. Responses use the request value + 1.
pub const FRAME_PING: u8 = 0x00;
pub const FRAME_PING_RESPONSE: u8 = 0x01;
pub const FRAME_GET_NONCE: u8 = 0x02;
pub const FRAME_GET_NONCE_RESPONSE: u8 = 0x03;
pub const FRAME_HEADERS: u8 = 0x04;
pub const FRAME_HEADERS_RESPONSE: u8 = 0x05;
pub const FRAME_READ: u8 = 0x06;
pub const FRAME_READ_RESPONSE: u8 = 0x07;
pub const FRAME_RESOLVE: u8 = 0x08;
pub const FRAME_RESOLVE_RESPONSE: u8 = 0x09;

/// Routes each frame of a batch to its typed handler.
///
/// Control frames (< 0x10) are answered synchronously; transport frames are
/// deposited into the destination mailbox. A malformed frame is skipped,
/// never fatal: the rest of the batch still runs.
pub struct FrameDispatcher {
    registry: Arc<MailboxRegistry>,
    nonces: Arc<NoncePool>,
    require_pow: bool,
}

impl FrameDispatcher {
    pub fn new(registry: Arc<MailboxRegistry>, nonces: Arc<NoncePool>, require_pow: bool) -> Self {
        Self { registry, nonces, require_pow }
    }

    pub fn registry(&self) -> &Arc<MailboxRegistry> {
        &self.registry
    }

    pub fn nonces(&self) -> &Arc<NoncePool> {
        &self.nonces
    }

    /// Full dispatch of a batch. At most one response survives: the last
    /// handled request that produced one.
    pub fn process_batch(&self, batch: &[u8]) -> Option<Vec<u8>> {
        let mut response = None;
        for frame in Frames::new(batch) {
            if let Some(r) = self.process_frame(frame) {
                response = Some(r);
            }
        }
        response
    }

    /// Deposit-only pass used by the write endpoint: transport frames are
    /// routed, control frames are ignored, nothing is answered.
    pub fn process_write_batch(&self, batch: &[u8]) {
        for frame in Frames::new(batch) {
            if frame::frame_type(frame) >= TRANSPORT_FRAME_TYPE {
                let _ = self.deposit(frame);
            }
        }
    }

    pub fn process_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let ftype = frame::frame_type(frame);
        if ftype >= TRANSPORT_FRAME_TYPE {
            return self.deposit(frame);
        }
        match ftype {
            FRAME_PING => {
                let mut echo = frame.to_vec();
                echo[FRAME_TYPE_OFFSET] = FRAME_PING_RESPONSE;
                Some(echo)
            }
            FRAME_GET_NONCE => {
                let nonce = self.nonces.issue();
                debug!("issued nonce {}", hex::encode(nonce));
                let mut response = vec![0u8; FRAME_HEADER_SIZE + NONCE_SIZE];
                response[FRAME_HEADER_SIZE..].copy_from_slice(&nonce);
                Some(response)
            }
            FRAME_READ => self.read(frame),
            FRAME_PING_RESPONSE
            | FRAME_GET_NONCE_RESPONSE
            | FRAME_HEADERS
            | FRAME_HEADERS_RESPONSE
            | FRAME_READ_RESPONSE
            | FRAME_RESOLVE
            | FRAME_RESOLVE_RESPONSE => None,
            other => {
                debug!("unknown control frame 0x{:02x} dropped", other);
                None
            }
        }
    }

    /// Read request: `afterId` and `maxBytes` sit at the head of the body,
    /// the reader's identity is the header's source address.
    fn read(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < FRAME_HEADER_SIZE + 16 {
            debug!("read frame too short: {} bytes", frame.len());
            return None;
        }
        let after_id = u64::from_le_bytes(
            frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + 8].try_into().ok()?,
        );
        let max_bytes = u64::from_le_bytes(
            frame[FRAME_HEADER_SIZE + 8..FRAME_HEADER_SIZE + 16].try_into().ok()?,
        );
        Some(self.registry.read(after_id, max_bytes, frame::src_address(frame)))
    }

    fn deposit(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if self.require_pow {
            if let Err(e) = pow::verify_deposit(frame, &self.nonces) {
                debug!("deposit rejected: {} (code 0x{:02x})", e, e.code());
                return Some(status_envelope(frame, e.code()));
            }
            self.registry.deposit(frame);
            return Some(status_envelope(frame, 0x00));
        }
        self.registry.deposit(frame);
        None
    }
}

/// Eight-byte status reply: the original frame's first eight bytes with the
/// result code in byte 1.
fn status_envelope(frame: &[u8], code: u8) -> Vec<u8> {
    let mut envelope = vec![0u8; 8];
    let head = frame.len().min(8);
    envelope[..head].copy_from_slice(&frame[..head]);
    envelope[1] = code;
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_frame;
    use crate::types::{ADDRESS_BYTES, FRAME_TYPE_OFFSET, MAX_MESSAGES, NONCE_COUNT};

    fn dispatcher(require_pow: bool) -> FrameDispatcher {
        FrameDispatcher::new(
            Arc::new(MailboxRegistry::new(MAX_MESSAGES)),
            Arc::new(NoncePool::new(NONCE_COUNT.min(1024))),
            require_pow,
        )
    }

    fn addr(fill: u8) -> [u8; ADDRESS_BYTES] {
        [fill; ADDRESS_BYTES]
    }

    #[test]
    fn test_ping_echoes_with_response_type() {
        let d = dispatcher(false);
        let ping = build_frame(FRAME_PING, &addr(0), &addr(0), &[]);
        let response = d.process_batch(&ping).unwrap();
        assert_eq!(response.len(), ping.len());
        assert_eq!(response[FRAME_TYPE_OFFSET], FRAME_PING_RESPONSE);
    }

    #[test]
    fn test_get_nonce_is_144_bytes() {
        let d = dispatcher(false);
        let request = build_frame(FRAME_GET_NONCE, &addr(0), &addr(0), &[]);
        let response = d.process_batch(&request).unwrap();
        assert_eq!(response.len(), FRAME_HEADER_SIZE + NONCE_SIZE);
        assert!(response[..FRAME_HEADER_SIZE].iter().all(|&b| b == 0));
        assert!(d.nonces().verify(&response[FRAME_HEADER_SIZE..]));
    }

    #[test]
    fn test_transport_frame_deposits_silently() {
        let d = dispatcher(false);
        let f = build_frame(0x10, &addr(1), &addr(2), b"data");
        assert!(d.process_batch(&f).is_none());
        assert_eq!(d.registry().address_count(), 1);
    }

    #[test]
    fn test_reserved_control_frames_are_noops() {
        let d = dispatcher(false);
        for ftype in [0x01, 0x03, 0x04, 0x05, 0x07, 0x08, 0x09, 0x0F] {
            let f = build_frame(ftype, &addr(1), &addr(2), &[]);
            assert!(d.process_batch(&f).is_none());
        }
        assert_eq!(d.registry().address_count(), 0);
    }

    #[test]
    fn test_last_response_wins() {
        let d = dispatcher(false);
        let mut batch = build_frame(FRAME_GET_NONCE, &addr(0), &addr(0), &[]);
        batch.extend_from_slice(&build_frame(FRAME_PING, &addr(0), &addr(0), &[]));
        let response = d.process_batch(&batch).unwrap();
        assert_eq!(response[FRAME_TYPE_OFFSET], FRAME_PING_RESPONSE);
    }

    #[test]
    fn test_pow_required_rejects_bare_deposit() {
        let d = dispatcher(true);
        let f = build_frame(0x10, &addr(1), &addr(2), b"data");
        let response = d.process_batch(&f).unwrap();
        assert_eq!(response.len(), 8);
        assert_eq!(response[1], 0x01); // too short for the signed envelope
        assert_eq!(d.registry().address_count(), 0);
    }
}
