//! Capability registry for the supported primitives.
//!
//! The registry is the single source of truth for allowable key sizes,
//! block sizes, nonce lengths, padding requirements and the
//! length-preserving property. Every cipher, MAC and KDF configuration is
//! validated against it before any key material is touched.

use serde::{Deserialize, Serialize};

/// Block cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockAlgorithm {
    /// AES (Rijndael-128)
    Aes,
}

/// Block cipher modes of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMode {
    /// Counter mode; turns the block cipher into a length-preserving stream
    Ctr,
    /// Cipher block chaining; requires padding
    Cbc,
}

/// Block cipher padding schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockPadding {
    /// No padding (stream-like modes only)
    None,
    /// PKCS#7 padding
    Pkcs7,
}

/// Stream cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamAlgorithm {
    /// ChaCha20 (IETF, 12-byte nonce)
    ChaCha20,
    /// XChaCha20 (24-byte nonce)
    XChaCha20,
    /// Salsa20 (8-byte nonce)
    Salsa20,
}

/// AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    /// AES-256 in Galois/Counter Mode
    Aes256Gcm,
    /// ChaCha20-Poly1305 (RFC 8439)
    ChaCha20Poly1305,
    /// XChaCha20-Poly1305 (extended nonce)
    XChaCha20Poly1305,
}

/// MAC functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacAlgorithm {
    /// HMAC-SHA-256
    HmacSha256,
    /// HMAC-SHA-512
    HmacSha512,
    /// Keyed BLAKE3
    Blake3,
    /// Poly1305 with an AES-encrypted one-time nonce
    Poly1305Aes,
}

/// Key derivation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    /// scrypt (memory-hard)
    Scrypt,
    /// PBKDF2 over an HMAC
    Pbkdf2,
}

/// Capability record for a block cipher.
#[derive(Debug, Clone, Copy)]
pub struct BlockSpec {
    /// Allowable key sizes in bits
    pub key_sizes_bits: &'static [u32],
    /// Block size in bytes
    pub block_len: usize,
}

/// Capability record for a stream cipher.
#[derive(Debug, Clone, Copy)]
pub struct StreamSpec {
    /// Allowable key sizes in bits
    pub key_sizes_bits: &'static [u32],
    /// Nonce length in bytes
    pub nonce_len: usize,
}

/// Capability record for an AEAD cipher.
#[derive(Debug, Clone, Copy)]
pub struct AeadSpec {
    /// Allowable key sizes in bits
    pub key_sizes_bits: &'static [u32],
    /// Nonce length in bytes
    pub nonce_len: usize,
    /// Allowable tag sizes in bits
    pub tag_sizes_bits: &'static [u32],
}

/// Capability record for a MAC function.
#[derive(Debug, Clone, Copy)]
pub struct MacSpec {
    /// Tag output length in bytes
    pub output_len: usize,
    /// Fixed key length in bytes, if the function demands one
    pub key_len: Option<usize>,
    /// Whether the function requires a one-time nonce
    pub needs_nonce: bool,
}

/// Look up the capability record for a block cipher.
#[must_use]
pub fn block_spec(algorithm: BlockAlgorithm) -> BlockSpec {
    match algorithm {
        BlockAlgorithm::Aes => BlockSpec {
            key_sizes_bits: &[128, 256],
            block_len: 16,
        },
    }
}

/// Look up the capability record for a stream cipher.
#[must_use]
pub fn stream_spec(algorithm: StreamAlgorithm) -> StreamSpec {
    match algorithm {
        StreamAlgorithm::ChaCha20 => StreamSpec {
            key_sizes_bits: &[256],
            nonce_len: 12,
        },
        StreamAlgorithm::XChaCha20 => StreamSpec {
            key_sizes_bits: &[256],
            nonce_len: 24,
        },
        StreamAlgorithm::Salsa20 => StreamSpec {
            key_sizes_bits: &[256],
            nonce_len: 8,
        },
    }
}

/// Look up the capability record for an AEAD cipher.
#[must_use]
pub fn aead_spec(algorithm: AeadAlgorithm) -> AeadSpec {
    match algorithm {
        AeadAlgorithm::Aes256Gcm => AeadSpec {
            key_sizes_bits: &[256],
            nonce_len: 12,
            tag_sizes_bits: &[128],
        },
        AeadAlgorithm::ChaCha20Poly1305 => AeadSpec {
            key_sizes_bits: &[256],
            nonce_len: 12,
            tag_sizes_bits: &[128],
        },
        AeadAlgorithm::XChaCha20Poly1305 => AeadSpec {
            key_sizes_bits: &[256],
            nonce_len: 24,
            tag_sizes_bits: &[128],
        },
    }
}

/// Look up the capability record for a MAC function.
#[must_use]
pub fn mac_spec(algorithm: MacAlgorithm) -> MacSpec {
    match algorithm {
        MacAlgorithm::HmacSha256 => MacSpec {
            output_len: 32,
            key_len: None,
            needs_nonce: false,
        },
        MacAlgorithm::HmacSha512 => MacSpec {
            output_len: 64,
            key_len: None,
            needs_nonce: false,
        },
        MacAlgorithm::Blake3 => MacSpec {
            output_len: 32,
            key_len: Some(32),
            needs_nonce: false,
        },
        MacAlgorithm::Poly1305Aes => MacSpec {
            output_len: 16,
            key_len: Some(32),
            needs_nonce: true,
        },
    }
}

impl BlockMode {
    /// Whether the mode demands a real padding scheme.
    #[must_use]
    pub fn requires_padding(self) -> bool {
        matches!(self, Self::Cbc)
    }

    /// Whether ciphertext length equals plaintext length.
    #[must_use]
    pub fn length_preserving(self) -> bool {
        matches!(self, Self::Ctr)
    }
}
