//! Error Module - FTI Error Types
//!
//! Defines the errors surfaced by tagging and heap-walk operations.
//!
//! # Error Categories
//!
//! ## Caller Errors
//! - `InvalidObject` - handle resolves to no live object
//! - `InvalidClass` - class filter handle is not a class
//! - `IllegalArgument` - malformed request (e.g. a zero tag in a query)
//!
//! ## Resource Errors
//! - `OutOfMemory` - bucket array allocation failed
//!
//! ## Internal Errors
//! - `InvalidState` - internal state machine violated
//! - `Config` - invalid configuration

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all FTI operations
///
/// # Examples
///
/// ```rust
/// use fti::error::TagError;
///
/// fn describe(err: &TagError) -> &'static str {
///     match err {
///         TagError::InvalidObject => "object was collected or handle deleted",
///         TagError::IllegalArgument(_) => "bad request",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum TagError {
    /// Object handle does not resolve to a live object
    ///
    /// **When returned:** `set_tag`/`get_tag` or a seeded walk is given a
    /// null, deleted or cleared handle
    ///
    /// **Recovery strategy:** Drop the handle; no state was changed
    #[error("Invalid object reference")]
    InvalidObject,

    /// Class filter does not name a class
    ///
    /// **When returned:** A klass filter handle resolves to something other
    /// than a non-primitive class mirror
    ///
    /// **Recovery strategy:** Pass a class mirror or no filter
    #[error("Invalid class reference")]
    InvalidClass,

    /// Malformed request
    ///
    /// **When returned:** A query contains a zero tag or another value the
    /// operation cannot accept
    ///
    /// **Recovery strategy:** Fix the request and retry
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Bucket array allocation failed
    ///
    /// **When returned:** Only internally, while growing the tag table. The
    /// table turns it into a warning and disables further resizing
    ///
    /// **Recovery strategy:** Keep running with longer chains
    #[error("Out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Invalid internal state
    ///
    /// **When returned:** An operation ran in a state it does not support,
    /// e.g. restoring headers from a marker that was never initialized
    ///
    /// **Recovery strategy:** Bug in the caller - report it
    #[error("Invalid state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TagError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TagError::InvalidObject
                | TagError::InvalidClass
                | TagError::IllegalArgument(_)
                | TagError::OutOfMemory { .. }
        )
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(self, TagError::InvalidState { .. })
    }
}

/// Result type alias for FTI operations
pub type Result<T> = std::result::Result<T, TagError>;

/// Ensure condition is true, otherwise return error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TagError::InvalidObject.is_recoverable());
        assert!(TagError::OutOfMemory { requested: 64 }.is_recoverable());
        assert!(!TagError::InvalidObject.is_bug());

        let state = TagError::InvalidState {
            expected: "marking",
            actual: "idle",
        };
        assert!(state.is_bug());
        assert!(!state.is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = TagError::IllegalArgument("tag 0".to_string());
        assert_eq!(err.to_string(), "Illegal argument: tag 0");
        assert_eq!(
            TagError::OutOfMemory { requested: 128 }.to_string(),
            "Out of memory: requested 128 bytes"
        );
    }

    #[test]
    fn test_from_config_error() {
        let err: TagError = ConfigError::InvalidLoadFactor("NaN".to_string()).into();
        assert!(matches!(err, TagError::Config(_)));
    }
}
