//! Error types for Keymint

use thiserror::Error;

/// Result type alias using Keymint's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Keymint error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E001-E099)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Lookup errors (E100-E199)
    #[error("Signing key '{0}' not found. Run `keymint list` to see issued keys.")]
    KeyNotFound(String),

    // Generation errors (E200-E299)
    #[error("Signature '{0}' already exists.")]
    DuplicateSignature(String),

    #[error("Could not generate a unique signature after {0} attempts. Increase the key byte length.")]
    SignatureCollision(u32),

    // Verification errors (E300-E399)
    #[error("Rate limited: {attempts} verification attempts within {period_secs} seconds.")]
    RateLimited { attempts: usize, period_secs: u64 },

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "E001",
            Self::KeyNotFound(_) => "E100",
            Self::DuplicateSignature(_) => "E200",
            Self::SignatureCollision(_) => "E201",
            Self::RateLimited { .. } => "E300",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Other(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::KeyNotFound(_) => Some("keymint list".to_string()),
            Self::SignatureCollision(_) => {
                Some("keymint config set registry.byte_length 32".to_string())
            }
            Self::RateLimited { period_secs, .. } => {
                Some(format!("Wait {} seconds before verifying again", period_secs))
            }
            Self::DatabaseError(_) => Some("keymint doctor".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            Error::InvalidInput("x".into()),
            Error::KeyNotFound("x".into()),
            Error::DuplicateSignature("x".into()),
            Error::SignatureCollision(3),
            Error::RateLimited {
                attempts: 2,
                period_secs: 60,
            },
            Error::DatabaseError(sqlx::Error::RowNotFound),
            Error::ConfigError("x".into()),
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_key_not_found_message_and_suggestion() {
        let err = Error::KeyNotFound("abc".to_string());
        assert!(err.to_string().contains("'abc'"));
        assert_eq!(err.suggestion(), Some("keymint list".to_string()));
    }

    #[test]
    fn test_rate_limited_suggestion_mentions_period() {
        let err = Error::RateLimited {
            attempts: 5,
            period_secs: 30,
        };
        assert!(err.suggestion().unwrap().contains("30"));
    }

    #[test]
    fn test_database_error_converts_from_sqlx() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "E400");
        assert_eq!(err.suggestion(), Some("keymint doctor".to_string()));
    }

    #[test]
    fn test_other_has_generic_code() {
        let err = Error::Other("poisoned".to_string());
        assert_eq!(err.code(), "E9999");
        assert_eq!(err.suggestion(), None);
    }
}
