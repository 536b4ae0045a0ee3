//! Key stretching via scrypt and PBKDF2.
//!
//! A pre-key (user passphrase or UM1 shared secret) is stretched into a
//! single output buffer from which the working cipher and MAC keys are
//! carved. Parameter presets differ by the entropy of the pre-key: a typed
//! passphrase gets the expensive profile, an agreement-derived secret the
//! cheap one.

use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::registry::KdfAlgorithm;
use crate::{CryptoError, PreKey, WorkingKeys};

/// Hard cap on a single KDF invocation's output.
pub const MAX_OUTPUT_LEN: usize = 1024;

/// Hashes accepted by the PBKDF2 profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbkdfHash {
    /// HMAC-SHA-256 PRF
    Sha256,
    /// HMAC-SHA-512 PRF
    Sha512,
}

/// Algorithm-specific KDF parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfParams {
    /// scrypt cost parameters; `n` must be a power of two and at least 1024
    Scrypt {
        /// CPU/memory cost
        n: u64,
        /// Block size
        r: u32,
        /// Parallelism
        p: u32,
    },
    /// PBKDF2 parameters
    Pbkdf2 {
        /// Iteration count
        iterations: u32,
        /// Underlying PRF hash
        hash: PbkdfHash,
    },
}

/// Entropy class of the pre-key, selecting a parameter preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrength {
    /// User-typed material; stretch hard
    LowEntropy,
    /// Agreement-derived material; stretch cheap
    HighEntropy,
}

/// A complete KDF configuration: algorithm, salt and parameters.
///
/// The salt length must equal the key length of the enclosing cipher in
/// bytes; the package layer enforces that when it builds configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfConfig {
    /// Which KDF to run
    pub algorithm: KdfAlgorithm,
    /// Per-derivation salt
    pub salt: Vec<u8>,
    /// Cost parameters
    pub params: KdfParams,
}

impl KdfConfig {
    /// Manifest-key scrypt preset for the given pre-key strength.
    #[must_use]
    pub fn manifest_scrypt(strength: KeyStrength, salt: Vec<u8>) -> Self {
        let params = match strength {
            KeyStrength::LowEntropy => KdfParams::Scrypt {
                n: 1 << 16,
                r: 16,
                p: 2,
            },
            KeyStrength::HighEntropy => KdfParams::Scrypt {
                n: 1 << 10,
                r: 8,
                p: 2,
            },
        };
        Self {
            algorithm: KdfAlgorithm::Scrypt,
            salt,
            params,
        }
    }

    /// Payload-item scrypt preset for the given pre-key strength.
    #[must_use]
    pub fn payload_scrypt(strength: KeyStrength, salt: Vec<u8>) -> Self {
        let params = match strength {
            KeyStrength::LowEntropy => KdfParams::Scrypt {
                n: 1 << 14,
                r: 8,
                p: 1,
            },
            KeyStrength::HighEntropy => KdfParams::Scrypt {
                n: 1 << 10,
                r: 8,
                p: 1,
            },
        };
        Self {
            algorithm: KdfAlgorithm::Scrypt,
            salt,
            params,
        }
    }

    fn validate(&self) -> Result<(), CryptoError> {
        match (self.algorithm, self.params) {
            (KdfAlgorithm::Scrypt, KdfParams::Scrypt { n, r, p }) => {
                if n < 1024 || !n.is_power_of_two() {
                    return Err(CryptoError::KdfParameterInvalid(
                        "scrypt n must be a power of two >= 1024",
                    ));
                }
                if r == 0 || p == 0 {
                    return Err(CryptoError::KdfParameterInvalid(
                        "scrypt r and p must be nonzero",
                    ));
                }
                Ok(())
            }
            (KdfAlgorithm::Pbkdf2, KdfParams::Pbkdf2 { iterations, .. }) => {
                if iterations == 0 {
                    return Err(CryptoError::KdfParameterInvalid(
                        "PBKDF2 iteration count must be nonzero",
                    ));
                }
                Ok(())
            }
            _ => Err(CryptoError::KdfParameterInvalid(
                "parameters do not match the configured algorithm",
            )),
        }
    }

    /// Stretch `pre_key` into `out_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KdfParameterInvalid`] for out-of-range
    /// parameters and [`CryptoError::KdfOutputTooLong`] when `out_len`
    /// exceeds [`MAX_OUTPUT_LEN`].
    pub fn derive(&self, pre_key: &PreKey, out_len: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.validate()?;
        if out_len == 0 || out_len > MAX_OUTPUT_LEN {
            return Err(CryptoError::KdfOutputTooLong {
                requested: out_len,
            });
        }

        let mut out = Zeroizing::new(vec![0u8; out_len]);
        match (self.algorithm, self.params) {
            (KdfAlgorithm::Scrypt, KdfParams::Scrypt { n, r, p }) => {
                let log_n = n.trailing_zeros() as u8;
                let params = scrypt::Params::new(log_n, r, p, out_len)
                    .map_err(|_| CryptoError::KdfParameterInvalid("scrypt parameter set"))?;
                scrypt::scrypt(pre_key.as_bytes(), &self.salt, &params, &mut out)
                    .map_err(|_| CryptoError::KdfOutputTooLong {
                        requested: out_len,
                    })?;
            }
            (KdfAlgorithm::Pbkdf2, KdfParams::Pbkdf2 { iterations, hash }) => match hash {
                PbkdfHash::Sha256 => {
                    pbkdf2::pbkdf2::<Hmac<Sha256>>(
                        pre_key.as_bytes(),
                        &self.salt,
                        iterations,
                        &mut out,
                    )
                    .map_err(|_| CryptoError::KdfParameterInvalid("PBKDF2 key length"))?;
                }
                PbkdfHash::Sha512 => {
                    pbkdf2::pbkdf2::<Hmac<Sha512>>(
                        pre_key.as_bytes(),
                        &self.salt,
                        iterations,
                        &mut out,
                    )
                    .map_err(|_| CryptoError::KdfParameterInvalid("PBKDF2 key length"))?;
                }
            },
            _ => unreachable!("validate() rejects mismatched parameters"),
        }
        Ok(out)
    }

    /// Stretch `pre_key` and carve `(cipher_key, mac_key)` in one step.
    ///
    /// The intermediate buffer is zeroed by the carve.
    ///
    /// # Errors
    ///
    /// Propagates derivation errors from [`Self::derive`].
    pub fn derive_working_keys(
        &self,
        pre_key: &PreKey,
        cipher_len: usize,
        mac_len: usize,
    ) -> Result<WorkingKeys, CryptoError> {
        let derived = self.derive(pre_key, cipher_len + mac_len)?;
        WorkingKeys::carve(derived, cipher_len, mac_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_scrypt(salt: Vec<u8>) -> KdfConfig {
        KdfConfig {
            algorithm: KdfAlgorithm::Scrypt,
            salt,
            params: KdfParams::Scrypt { n: 1024, r: 8, p: 1 },
        }
    }

    #[test]
    fn scrypt_deterministic() {
        let config = cheap_scrypt(vec![7u8; 32]);
        let key = PreKey::from_passphrase("correct horse battery staple");
        let a = config.derive(&key, 64).unwrap();
        let b = config.derive(&key, 64).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn different_salts_diverge() {
        let key = PreKey::from_passphrase("same passphrase");
        let a = cheap_scrypt(vec![1u8; 32]).derive(&key, 32).unwrap();
        let b = cheap_scrypt(vec![2u8; 32]).derive(&key, 32).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn pbkdf2_roundtrip() {
        let config = KdfConfig {
            algorithm: KdfAlgorithm::Pbkdf2,
            salt: vec![3u8; 32],
            params: KdfParams::Pbkdf2 {
                iterations: 1000,
                hash: PbkdfHash::Sha256,
            },
        };
        let key = PreKey::from_passphrase("pbkdf2 input");
        let a = config.derive(&key, 48).unwrap();
        let b = config.derive(&key, 48).unwrap();
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn non_power_of_two_n_rejected() {
        let config = KdfConfig {
            algorithm: KdfAlgorithm::Scrypt,
            salt: vec![0u8; 32],
            params: KdfParams::Scrypt { n: 1000, r: 8, p: 1 },
        };
        let key = PreKey::from_passphrase("x");
        assert!(matches!(
            config.derive(&key, 32),
            Err(CryptoError::KdfParameterInvalid(_))
        ));
    }

    #[test]
    fn small_n_rejected() {
        let config = KdfConfig {
            algorithm: KdfAlgorithm::Scrypt,
            salt: vec![0u8; 32],
            params: KdfParams::Scrypt { n: 512, r: 8, p: 1 },
        };
        let key = PreKey::from_passphrase("x");
        assert!(config.derive(&key, 32).is_err());
    }

    #[test]
    fn oversized_output_rejected() {
        let config = cheap_scrypt(vec![0u8; 32]);
        let key = PreKey::from_passphrase("x");
        assert!(matches!(
            config.derive(&key, MAX_OUTPUT_LEN + 1),
            Err(CryptoError::KdfOutputTooLong { .. })
        ));
    }

    #[test]
    fn mismatched_params_rejected() {
        let config = KdfConfig {
            algorithm: KdfAlgorithm::Scrypt,
            salt: vec![0u8; 32],
            params: KdfParams::Pbkdf2 {
                iterations: 1000,
                hash: PbkdfHash::Sha256,
            },
        };
        let key = PreKey::from_passphrase("x");
        assert!(config.derive(&key, 32).is_err());
    }

    #[test]
    fn working_key_carve_splits_halves() {
        let config = cheap_scrypt(vec![9u8; 32]);
        let key = PreKey::from_passphrase("carve me");
        let joined = config.derive(&key, 56).unwrap();
        let keys = config.derive_working_keys(&key, 32, 24).unwrap();
        assert_eq!(&*keys.cipher_key, &joined[..32]);
        assert_eq!(&*keys.mac_key, &joined[32..56]);
    }
}
