//! # obscur-crypto
//!
//! Cryptographic primitives for the obscur package format.
//!
//! This crate provides:
//! - A deterministic stream-cipher CSPRNG for reproducible layout decisions
//! - A capability registry describing every supported primitive
//! - scrypt / PBKDF2 key stretching with working-key carving
//! - Key confirmation (MAC over a canonical challenge)
//! - An encrypt-then-MAC authenticated cipher stream with AEAD folding
//! - UM1 one-pass key agreement over X25519
//! - Constant-time comparison helpers
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithms |
//! |----------|------------|
//! | Stream ciphers | ChaCha20, XChaCha20, Salsa20 |
//! | Block ciphers | AES-128/256 in CTR and CBC |
//! | AEAD | AES-256-GCM, ChaCha20-Poly1305, XChaCha20-Poly1305 |
//! | MAC | HMAC-SHA-256/512, keyed BLAKE3, Poly1305-AES |
//! | KDF | scrypt, PBKDF2-HMAC-SHA-256/512 |
//! | Key Agreement | UM1 over X25519 |
//! | Deterministic CSPRNG | ChaCha20 or Salsa20 keystream |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod agreement;
pub mod cipher;
pub mod confirm;
pub mod constant_time;
pub mod error;
pub mod kdf;
pub mod mac;
pub mod random;
pub mod registry;
pub mod stream;

pub use error::CryptoError;

use zeroize::{Zeroize, Zeroizing};

/// X25519 public key size in bytes.
pub const X25519_KEY_SIZE: usize = 32;

/// Shared-secret size produced by UM1 agreement.
pub const UM1_SECRET_SIZE: usize = 32;

/// Authentication tag size for the AEAD suite (128 bits).
pub const AEAD_TAG_SIZE: usize = 16;

/// Pre-key material fed into key derivation.
///
/// Either typed by a user (low entropy) or produced by UM1 agreement
/// (high entropy). The buffer is wiped on drop; callers should also wipe
/// it explicitly as soon as working keys have been carved.
#[derive(Clone)]
pub struct PreKey(Zeroizing<Vec<u8>>);

impl PreKey {
    /// Wrap raw pre-key bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Wrap a user-typed passphrase.
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(passphrase.as_bytes().to_vec())
    }

    /// Borrow the raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wipe the material in place.
    pub fn erase(&mut self) {
        self.0.zeroize();
    }
}

/// Cipher and MAC keys carved from one KDF output.
///
/// The carve takes the first `cipher_len` bytes as the cipher key and the
/// next `mac_len` bytes as the MAC key. Both halves wipe on drop.
pub struct WorkingKeys {
    /// Key driving the cipher stream.
    pub cipher_key: Zeroizing<Vec<u8>>,
    /// Key driving the MAC stream.
    pub mac_key: Zeroizing<Vec<u8>>,
}

impl WorkingKeys {
    /// Carve `(cipher_key, mac_key)` out of a single derived buffer.
    ///
    /// The source buffer is zeroed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KdfOutputTooShort`] if `derived` holds fewer
    /// than `cipher_len + mac_len` bytes.
    pub fn carve(
        mut derived: Zeroizing<Vec<u8>>,
        cipher_len: usize,
        mac_len: usize,
    ) -> Result<Self, CryptoError> {
        if derived.len() < cipher_len + mac_len {
            return Err(CryptoError::KdfOutputTooShort {
                expected: cipher_len + mac_len,
                actual: derived.len(),
            });
        }
        let cipher_key = Zeroizing::new(derived[..cipher_len].to_vec());
        let mac_key = Zeroizing::new(derived[cipher_len..cipher_len + mac_len].to_vec());
        derived.zeroize();
        Ok(Self {
            cipher_key,
            mac_key,
        })
    }
}
