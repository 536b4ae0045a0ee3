//! Error types for the package pipeline.

use thiserror::Error;

/// Package-level errors.
///
/// Size and format violations surface at configuration time, before any
/// I/O. Missing keys and stream bindings are collected across all items
/// and reported as one aggregate before a single byte is emitted.
/// Cryptographic verification failures abort the transfer; partial output
/// is invalid. Nothing retries.
#[derive(Debug, Error)]
pub enum PackageError {
    /// Unknown algorithm, missing required field, or disallowed value
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Items with neither raw keys nor a derivation descriptor
    #[error("key material missing for items: {}", items.join(", "))]
    KeyMaterialMissing {
        /// Paths of the offending items
        items: Vec<String>,
    },

    /// Items with no stream source or sink at transfer time
    #[error("stream binding absent for items: {}", items.join(", "))]
    StreamBindingAbsent {
        /// Paths of the offending items
        items: Vec<String>,
    },

    /// MAC or AEAD tag mismatch
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Confirmation MAC does not match the stored expected output
    #[error("key confirmation failed")]
    KeyConfirmationFailed,

    /// An item's declared length was not reached on read
    #[error("payload truncated: item {path} expected {expected} bytes, got {actual}")]
    PayloadTruncated {
        /// Item path
        path: String,
        /// Declared length
        expected: u64,
        /// Bytes actually recovered
        actual: u64,
    },

    /// Magic mismatch or a length field out of range
    #[error("malformed package: {0}")]
    FormatMalformed(String),

    /// Second call to the one-shot writer
    #[error("package already written")]
    AlreadyWritten,

    /// Operation not valid in the current state machine state
    #[error("invalid state for operation: {0}")]
    InvalidState(&'static str),

    /// Descriptor serialization failure
    #[error("descriptor serialization failed: {0}")]
    Serialization(String),

    /// Underlying cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(#[from] obscur_crypto::CryptoError),

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackageError {
    /// Collapse a crypto-layer authentication failure into the package
    /// taxonomy so callers match one variant.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Crypto(obscur_crypto::CryptoError::AuthenticationFailed) => {
                Self::AuthenticationFailed
            }
            other => other,
        }
    }
}
