//! Salted PIN hashing
//!
//! PINs are never stored in clear. The stored form is
//! `hex(HMAC-SHA256(key = salt, message = pin))` plus the hex-encoded salt;
//! verification goes through `Mac::verify_slice`, which compares in constant time.

use crate::error::{CoreError, CoreResult};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Salt length in bytes
const SALT_LEN: usize = 16;

/// Stored PIN credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinHash {
    /// Hex-encoded HMAC-SHA256 digest
    pub hash: String,
    /// Hex-encoded random salt
    pub salt: String,
}

impl PinHash {
    /// Hash a new PIN with a fresh random salt
    pub fn new(pin: &str) -> CoreResult<Self> {
        validate_format(pin)?;

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill(&mut salt[..]);

        let mut mac = keyed(&salt)?;
        mac.update(pin.as_bytes());

        Ok(Self {
            hash: hex::encode(mac.finalize().into_bytes()),
            salt: hex::encode(salt),
        })
    }

    /// Check a candidate PIN against the stored digest
    ///
    /// Malformed stored values never match.
    pub fn verify(&self, candidate: &str) -> bool {
        let (Ok(salt), Ok(expected)) = (hex::decode(&self.salt), hex::decode(&self.hash)) else {
            return false;
        };
        let Ok(mut mac) = keyed(&salt) else {
            return false;
        };
        mac.update(candidate.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

fn keyed(salt: &[u8]) -> CoreResult<HmacSha256> {
    // HMAC accepts keys of any length
    HmacSha256::new_from_slice(salt).map_err(|_| CoreError::InvalidPinFormat)
}

/// PINs are 4 to 6 ASCII digits
pub fn validate_format(pin: &str) -> CoreResult<()> {
    if (4..=6).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CoreError::InvalidPinFormat)
    }
}
