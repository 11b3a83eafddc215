//! # Error Types
//!
//! Domain-specific error types for presence-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  presence-core errors (this file)                                      │
//! │  └── CoreError        - Invalid tracker parameters                     │
//! │                                                                         │
//! │  presence-store errors (separate crate)                                │
//! │  └── StoreError       - State file load/save failures                  │
//! │                                                                         │
//! │  presence-scan errors (separate crate)                                 │
//! │  ├── SourceError      - Fatal / transient / degraded probe outcomes    │
//! │  └── ScanError        - Config, init and persistence failures          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The core is pure, so very little can go wrong here: the only failures are
//! parameters that cannot be represented as calendar durations.

use thiserror::Error;

/// Core tracking errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A threshold does not fit in a calendar duration.
    ///
    /// ## When This Occurs
    /// - `gone_after` configured as something absurd like `u64::MAX` seconds
    #[error("{field} is out of range: {reason}")]
    DurationOutOfRange { field: String, reason: String },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::DurationOutOfRange {
            field: "gone_after".to_string(),
            reason: "too large".to_string(),
        };
        assert_eq!(err.to_string(), "gone_after is out of range: too large");
    }
}
