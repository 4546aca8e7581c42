//! Proof-of-work and signature checks binding a deposit to a freshly
//! issued nonce.
//!
//! Envelope layout, immediately after the 128-byte frame header:
//!
//! ```text
//! nonce(16) ‖ salt(8) ‖ signature(256) ‖ pk_len(4, LE) ‖ pubkey(pk_len) ‖ payload
//! ```
//!
//! The signature is RSA PKCS#1 v1.5 over SHA-256(nonce ‖ salt); the work
//! requirement is `leading_zero_bits(SHA-256(nonce ‖ salt)) ≥ complexity`,
//! with the complexity target read from byte 4 of the nonce itself.

use crate::router::nonce::NoncePool;
use crate::types::{FRAME_HEADER_SIZE, NONCE_COMPLEXITY_POS, NONCE_SIZE};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const POW_SALT_SIZE: usize = 8;
pub const POW_SIGNATURE_SIZE: usize = 256;
pub const POW_MAX_PAYLOAD: usize = 256;

const SALT_OFFSET: usize = FRAME_HEADER_SIZE + NONCE_SIZE;
const SIGNATURE_OFFSET: usize = SALT_OFFSET + POW_SALT_SIZE;
const PK_LEN_OFFSET: usize = SIGNATURE_OFFSET + POW_SIGNATURE_SIZE;
const PK_OFFSET: usize = PK_LEN_OFFSET + 4;

/// Verification failures, in wire order. `code()` is what goes into byte 1
/// of the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PowError {
    #[error("frame shorter than the signed envelope")]
    FrameTooShort,
    #[error("declared public key overruns the frame")]
    PublicKeyOverrun,
    #[error("unknown or already spent nonce")]
    BadNonce,
    #[error("insufficient proof of work")]
    InsufficientWork,
    #[error("payload exceeds 256 bytes")]
    PayloadTooLarge,
    #[error("public key is not PKCS#1 DER")]
    MalformedPublicKey,
    #[error("signature verification failed")]
    BadSignature,
}

impl PowError {
    pub fn code(&self) -> u8 {
        match self {
            PowError::FrameTooShort => 0x01,
            PowError::PublicKeyOverrun => 0x02,
            PowError::BadNonce => 0x03,
            PowError::InsufficientWork => 0x04,
            PowError::PayloadTooLarge => 0x05,
            PowError::MalformedPublicKey => 0x06,
            PowError::BadSignature => 0x07,
        }
    }
}

/// True iff the first `complexity` bits of `hash`, most-significant bit
/// first per byte, are all zero. Anything but a 32-byte digest fails.
pub fn check_hash(hash: &[u8], complexity: u8) -> bool {
    if hash.len() != 32 {
        return false;
    }
    let full_bytes = (complexity / 8) as usize;
    if hash[..full_bytes].iter().any(|&b| b != 0) {
        return false;
    }
    let rest = complexity % 8;
    if rest == 0 {
        return true;
    }
    hash[full_bytes] >> (8 - rest) == 0
}

/// Validate the signed envelope of one transport frame, consuming its nonce
/// on a successful pool lookup.
pub fn verify_deposit(frame: &[u8], nonces: &NoncePool) -> Result<(), PowError> {
    if frame.len() < PK_OFFSET {
        return Err(PowError::FrameTooShort);
    }

    let nonce = &frame[FRAME_HEADER_SIZE..SALT_OFFSET];
    let signature = &frame[SIGNATURE_OFFSET..PK_LEN_OFFSET];
    let pk_len = u32::from_le_bytes(
        frame[PK_LEN_OFFSET..PK_OFFSET].try_into().expect("fixed slice"),
    ) as usize;

    if PK_OFFSET.saturating_add(pk_len) > frame.len() {
        return Err(PowError::PublicKeyOverrun);
    }
    let pk_der = &frame[PK_OFFSET..PK_OFFSET + pk_len];
    let payload_len = frame.len() - PK_OFFSET - pk_len;

    if !nonces.verify(nonce) {
        return Err(PowError::BadNonce);
    }

    // Digest covers nonce ‖ salt, one contiguous run in the frame.
    let digest = Sha256::digest(&frame[FRAME_HEADER_SIZE..SIGNATURE_OFFSET]);
    if !check_hash(&digest, nonce[NONCE_COMPLEXITY_POS]) {
        return Err(PowError::InsufficientWork);
    }

    if payload_len > POW_MAX_PAYLOAD {
        return Err(PowError::PayloadTooLarge);
    }

    let public_key =
        RsaPublicKey::from_pkcs1_der(pk_der).map_err(|_| PowError::MalformedPublicKey)?;
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| PowError::BadSignature)?;

    Ok(())
}
