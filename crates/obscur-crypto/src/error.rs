//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Algorithm name is not present in the capability registry
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Key size is not in the registry's allowable set
    #[error("invalid key size for {algorithm}: {bits} bits")]
    KeySizeInvalid {
        /// Algorithm the key was configured for
        algorithm: &'static str,
        /// Offending size in bits
        bits: u32,
    },

    /// Block size is not in the registry's allowable set
    #[error("invalid block size for {algorithm}: {bits} bits")]
    BlockSizeInvalid {
        /// Algorithm the block size was configured for
        algorithm: &'static str,
        /// Offending size in bits
        bits: u32,
    },

    /// MAC output size is not in the registry's allowable set
    #[error("invalid MAC size for {algorithm}: {bits} bits")]
    MacSizeInvalid {
        /// MAC function the size was configured for
        algorithm: &'static str,
        /// Offending size in bits
        bits: u32,
    },

    /// IV or nonce length does not match the registry requirement
    #[error("invalid IV length: expected {expected}, got {actual}")]
    IvSizeInvalid {
        /// Required length in bytes
        expected: usize,
        /// Supplied length in bytes
        actual: usize,
    },

    /// Cipher configuration violates a structural invariant
    #[error("invalid cipher configuration: {0}")]
    CipherConfigInvalid(&'static str),

    /// KDF parameters are out of range
    #[error("invalid KDF parameters: {0}")]
    KdfParameterInvalid(&'static str),

    /// KDF cannot produce the requested output length
    #[error("KDF output too long: {requested} bytes")]
    KdfOutputTooLong {
        /// Requested output length
        requested: usize,
    },

    /// Derived buffer is too short to carve the working keys from
    #[error("KDF output too short: expected {expected}, got {actual}")]
    KdfOutputTooShort {
        /// Required length
        expected: usize,
        /// Available length
        actual: usize,
    },

    /// MAC or AEAD tag verification failed
    #[error("authentication failed")]
    AuthenticationFailed,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Stream already finalized; reset before reuse
    #[error("stream already finalized")]
    AlreadyFinalized,

    /// UM1 called with keys from different curve domains
    #[error("curve mismatch: {ours} vs {theirs}")]
    CurveMismatch {
        /// Local key's curve domain
        ours: String,
        /// Peer key's curve domain
        theirs: String,
    },

    /// Peer public key is a low-order point
    #[error("peer public key is a low-order point")]
    LowOrderPoint,

    /// OS random number generation failed
    #[error("random number generation failed")]
    RandomFailed,
}
