//! Token generation
//!
//! Signatures are random bytes from the OS CSPRNG rendered as URL-safe base64
//! without padding, so they can be dropped into URLs and form fields as-is.

use crate::error::{Error, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

/// Default number of random bytes per signature
pub const DEFAULT_BYTE_LENGTH: usize = 24;

/// Smallest accepted byte length
pub const MIN_BYTE_LENGTH: usize = 16;

/// Largest accepted byte length
pub const MAX_BYTE_LENGTH: usize = 512;

/// Check that a byte length is within the accepted range
pub fn validate_byte_length(length: usize) -> Result<usize> {
    if !(MIN_BYTE_LENGTH..=MAX_BYTE_LENGTH).contains(&length) {
        return Err(Error::InvalidInput(format!(
            "signature length must be between {} and {} bytes, got {}",
            MIN_BYTE_LENGTH, MAX_BYTE_LENGTH, length
        )));
    }
    Ok(length)
}

/// Generate a signature from `length` random bytes
pub fn generate_key(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(&bytes)
}
