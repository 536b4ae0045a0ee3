//! Secure and deterministic random number generation.
//!
//! Two sources live here:
//!
//! - [`fill_random`] draws from the operating system CSPRNG and is used for
//!   salts, IVs and freshly generated keys.
//! - [`StreamCsprng`] is a *deterministic* generator whose output is the
//!   keystream of a stream cipher keyed by `(key, nonce)`. Package writer
//!   and reader construct it from the same serialized configuration and
//!   must observe byte-identical output on every platform; the payload
//!   multiplexer's layout decisions depend on it.

use cipher::{KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::CryptoError;

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the OS entropy source fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

/// Generate a random byte vector of the given length.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the OS entropy source fails.
pub fn random_vec(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; len];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a random 32-byte array.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the OS entropy source fails.
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Stream ciphers usable as the deterministic CSPRNG core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsprngAlgorithm {
    /// ChaCha20 keystream (32-byte key, 12-byte nonce)
    ChaCha20,
    /// Salsa20 keystream (32-byte key, 8-byte nonce)
    Salsa20,
}

impl CsprngAlgorithm {
    /// Key length in bytes.
    #[must_use]
    pub fn key_len(self) -> usize {
        32
    }

    /// Nonce length in bytes.
    #[must_use]
    pub fn nonce_len(self) -> usize {
        match self {
            Self::ChaCha20 => 12,
            Self::Salsa20 => 8,
        }
    }

    /// Canonical algorithm name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ChaCha20 => "ChaCha20",
            Self::Salsa20 => "Salsa20",
        }
    }
}

/// Serialized CSPRNG configuration.
///
/// Travels inside the (encrypted) payload configuration so the reader can
/// reconstruct the writer's decision sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsprngConfig {
    /// Keystream cipher
    pub algorithm: CsprngAlgorithm,
    /// Cipher key
    pub key: Vec<u8>,
    /// Cipher nonce
    pub nonce: Vec<u8>,
}

impl CsprngConfig {
    /// Draw a fresh `(key, nonce)` pair from the OS entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS entropy source fails.
    pub fn generate(algorithm: CsprngAlgorithm) -> Result<Self, CryptoError> {
        Ok(Self {
            algorithm,
            key: random_vec(algorithm.key_len())?,
            nonce: random_vec(algorithm.nonce_len())?,
        })
    }

    fn validate(&self) -> Result<(), CryptoError> {
        if self.key.len() != self.algorithm.key_len() {
            return Err(CryptoError::KeySizeInvalid {
                algorithm: self.algorithm.name(),
                bits: (self.key.len() * 8) as u32,
            });
        }
        if self.nonce.len() != self.algorithm.nonce_len() {
            return Err(CryptoError::IvSizeInvalid {
                expected: self.algorithm.nonce_len(),
                actual: self.nonce.len(),
            });
        }
        Ok(())
    }
}

impl Drop for CsprngConfig {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

enum Keystream {
    ChaCha20(Box<chacha20::ChaCha20>),
    Salsa20(Box<salsa20::Salsa20>),
}

impl Keystream {
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::ChaCha20(c) => c.apply_keystream(buf),
            Self::Salsa20(c) => c.apply_keystream(buf),
        }
    }
}

/// Deterministic stream-cipher CSPRNG.
///
/// Output is the raw keystream of the configured cipher. `next_u32`
/// consumes four keystream bytes little-endian. Not thread safe; one
/// instance per package transfer.
pub struct StreamCsprng {
    keystream: Keystream,
}

impl StreamCsprng {
    /// Instantiate from a serialized configuration.
    ///
    /// # Errors
    ///
    /// Returns a size error if the key or nonce length does not match the
    /// configured algorithm.
    pub fn new(config: &CsprngConfig) -> Result<Self, CryptoError> {
        config.validate()?;
        let keystream = match config.algorithm {
            CsprngAlgorithm::ChaCha20 => Keystream::ChaCha20(Box::new(
                chacha20::ChaCha20::new_from_slices(&config.key, &config.nonce)
                    .map_err(|_| CryptoError::CipherConfigInvalid("ChaCha20 key/nonce"))?,
            )),
            CsprngAlgorithm::Salsa20 => Keystream::Salsa20(Box::new(
                salsa20::Salsa20::new_from_slices(&config.key, &config.nonce)
                    .map_err(|_| CryptoError::CipherConfigInvalid("Salsa20 key/nonce"))?,
            )),
        };
        Ok(Self { keystream })
    }

    /// Fill `buf` with keystream bytes.
    pub fn next_bytes(&mut self, buf: &mut [u8]) {
        buf.fill(0);
        self.keystream.apply(buf);
    }

    /// Next 32-bit value, little-endian keystream consumption.
    pub fn next_u32(&mut self) -> u32 {
        let mut word = [0u8; 4];
        self.next_bytes(&mut word);
        u32::from_le_bytes(word)
    }

    /// Uniform value in `[0, bound)` via rejection sampling.
    ///
    /// A single-candidate draw (`bound == 1`) consumes no keystream.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    pub fn next_u32_below(&mut self, bound: u32) -> u32 {
        assert!(bound > 0, "bound must be nonzero");
        if bound == 1 {
            return 0;
        }
        let zone = (u32::MAX / bound) * bound;
        loop {
            let v = self.next_u32();
            if v < zone {
                return v % bound;
            }
        }
    }

    /// Uniform value in `[lo, hi]` inclusive.
    ///
    /// A degenerate range (`lo == hi`) returns `lo` without consuming
    /// keystream, so fixed-width layouts draw nothing.
    ///
    /// # Panics
    ///
    /// Panics if `lo > hi`.
    pub fn range_inclusive(&mut self, lo: u32, hi: u32) -> u32 {
        assert!(lo <= hi, "empty range");
        if lo == hi {
            return lo;
        }
        lo + self.next_u32_below(hi - lo + 1)
    }
}
