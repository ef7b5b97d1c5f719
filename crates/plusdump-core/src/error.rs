//! Error types for the plusdump-core library.
//!
//! Every failure in the registry and the codec is returned synchronously
//! to the immediate caller as an [`Error`]. Nothing is retried or logged here.

use thiserror::Error;

/// Result type alias for plusdump operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all registry and codec operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Detection was requested before the registry was enabled
    #[error("heuristic layer detection is not enabled")]
    HeuristicsDisabled,

    /// A detector is already registered at this priority level
    #[error("a detector is already registered at priority level {level}")]
    DuplicateRegistration {
        /// The occupied level
        level: usize,
    },

    /// Priority level outside the registry table
    #[error("invalid priority level {level}: must be between 0 and {max}")]
    InvalidPriority {
        /// The rejected level
        level: usize,
        /// Highest valid level
        max: usize,
    },

    /// No registered detector recognised the payload
    #[error("no layer detected")]
    NoMatch,

    /// Input ended before a field could be read
    #[error("truncated input at offset {offset}: need {needed} bytes, have {available}")]
    TruncatedInput {
        /// Byte offset of the field being read
        offset: usize,
        /// Bytes required from `offset`
        needed: usize,
        /// Bytes actually left from `offset`
        available: usize,
    },

    /// Magic pattern mismatch (only raised when magic verification is on)
    #[error("invalid PLUS magic {found:#09x}")]
    InvalidMagic {
        /// The 28-bit value found in the header
        found: u32,
    },

    /// Header fields that cannot be expressed on the wire
    #[error("invalid packet connection field: {details}")]
    InvalidPcf {
        /// What is wrong with the field
        details: String,
    },

    /// The output sink could not hold the serialized bytes
    #[error("failed to encode header: {details}")]
    EncodingFailure {
        /// Why the sink refused the bytes
        details: String,
    },

    /// The framework refused to dispatch to the next layer
    #[error("next layer dispatch failed: {0}")]
    NextLayer(String),
}

impl Error {
    /// Creates a new truncated input error
    pub fn truncated(offset: usize, needed: usize, available: usize) -> Self {
        Self::TruncatedInput {
            offset,
            needed,
            available,
        }
    }

    /// Creates a new PCF error
    pub fn invalid_pcf(details: impl Into<String>) -> Self {
        Self::InvalidPcf {
            details: details.into(),
        }
    }

    /// Creates a new encoding error
    pub fn encoding(details: impl Into<String>) -> Self {
        Self::EncodingFailure {
            details: details.into(),
        }
    }

    /// Creates a new next layer dispatch error
    pub fn next_layer(msg: impl Into<String>) -> Self {
        Self::NextLayer(msg.into())
    }

    /// Returns true if the caller can reasonably carry on with other input
    ///
    /// Configuration mistakes (duplicate or out-of-range registrations) are
    /// not recoverable; everything tied to a single payload is.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::DuplicateRegistration { .. } | Self::InvalidPriority { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::truncated(20, 2, 1);
        assert!(err.to_string().contains("offset 20"));
        assert!(err.to_string().contains("need 2 bytes, have 1"));

        let err = Error::InvalidMagic { found: 0x1234567 };
        assert_eq!(err.to_string(), "invalid PLUS magic 0x1234567");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::NoMatch.is_recoverable());
        assert!(Error::HeuristicsDisabled.is_recoverable());
        assert!(Error::truncated(0, 4, 0).is_recoverable());
        assert!(!Error::DuplicateRegistration { level: 3 }.is_recoverable());
        assert!(!Error::InvalidPriority { level: 200, max: 127 }.is_recoverable());
    }
}
