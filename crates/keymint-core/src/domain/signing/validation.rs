//! Input validation for key issuance
//!
//! Everything here runs before the registry touches the store.

use crate::error::{Error, Result};
use chrono::Duration;

/// Maximum scope length, matching the width of the original scope column
pub const MAX_SCOPE_LEN: usize = 100;

/// Maximum email length
pub const MAX_EMAIL_LEN: usize = 254;

/// Expiration offsets beyond this many hours are rejected
pub const MAX_EXPIRATION_HOURS: f64 = 24.0 * 365.0 * 1000.0;

/// Validate a scope string and return it unchanged
pub fn validate_scope(scope: &str) -> Result<&str> {
    if scope.trim().is_empty() {
        return Err(Error::InvalidInput("scope must not be empty".to_string()));
    }
    if scope.len() > MAX_SCOPE_LEN {
        return Err(Error::InvalidInput(format!(
            "scope must be at most {} characters, got {}",
            MAX_SCOPE_LEN,
            scope.len()
        )));
    }
    if scope.chars().any(char::is_control) {
        return Err(Error::InvalidInput(
            "scope must not contain control characters".to_string(),
        ));
    }
    Ok(scope)
}

/// Normalize an optional email: trimmed, lowercased, empty becomes `None`
pub fn normalize_email(email: Option<&str>) -> Result<Option<String>> {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };
    if email.len() > MAX_EMAIL_LEN {
        return Err(Error::InvalidInput(format!(
            "email must be at most {} characters",
            MAX_EMAIL_LEN
        )));
    }
    Ok(Some(email.to_lowercase()))
}

/// Convert an hour offset into a duration
pub fn expiration_offset(hours: f64) -> Result<Duration> {
    if !hours.is_finite() {
        return Err(Error::InvalidInput(format!(
            "expiration hours must be a finite number, got {}",
            hours
        )));
    }
    if hours.abs() > MAX_EXPIRATION_HOURS {
        return Err(Error::InvalidInput(format!(
            "expiration hours must be within ±{}",
            MAX_EXPIRATION_HOURS
        )));
    }
    Ok(Duration::milliseconds((hours * 3_600_000.0).round() as i64))
}
