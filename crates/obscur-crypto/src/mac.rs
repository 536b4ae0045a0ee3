//! Message authentication functions.
//!
//! The MAC layer is a tagged sum over HMAC (SHA-256/512), keyed BLAKE3 and
//! Poly1305-AES, plus a KDF-as-MAC mode used by key confirmation. All
//! functions share `init / update / finalize` semantics; `finalize`
//! consumes the stream so a double finalization cannot compile.

use aes::cipher::{BlockEncrypt, KeyInit as AesKeyInit};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use crate::kdf::{KdfConfig, KdfParams};
use crate::registry::{mac_spec, KdfAlgorithm, MacAlgorithm};
use crate::{CryptoError, PreKey};

/// Functional role of an authentication configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthKind {
    /// Plain MAC
    Mac,
    /// KDF output used as a verification tag
    KdfAsMac,
    /// Poly1305 with a block-cipher-encrypted one-time nonce
    Poly1305,
}

/// The function an [`AuthConfig`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFunction {
    /// A MAC from the registry
    Mac(MacAlgorithm),
    /// A KDF from the registry, used as a MAC
    Kdf(KdfAlgorithm),
}

/// Serialized authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Named function
    pub function: AuthFunction,
    /// Tag size in bits, when narrower than the function's native output
    pub key_size_bits: Option<u32>,
    /// One-time nonce (Poly1305-AES only)
    pub nonce: Option<Vec<u8>>,
    /// Salt mixed into the computation (KDF-as-MAC only)
    pub salt: Option<Vec<u8>>,
    /// Static additional data prepended to the message
    pub additional_data: Option<Vec<u8>>,
}

impl AuthConfig {
    /// Plain-MAC configuration with no auxiliary fields.
    #[must_use]
    pub fn mac(algorithm: MacAlgorithm) -> Self {
        Self {
            function: AuthFunction::Mac(algorithm),
            key_size_bits: None,
            nonce: None,
            salt: None,
            additional_data: None,
        }
    }

    /// Poly1305-AES configuration around a fresh one-time nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if nonce generation fails.
    pub fn poly1305() -> Result<Self, CryptoError> {
        Ok(Self {
            function: AuthFunction::Mac(MacAlgorithm::Poly1305Aes),
            key_size_bits: None,
            nonce: Some(crate::random::random_vec(16)?),
            salt: None,
            additional_data: None,
        })
    }

    /// Functional kind implied by the named function.
    #[must_use]
    pub fn kind(&self) -> AuthKind {
        match self.function {
            AuthFunction::Mac(MacAlgorithm::Poly1305Aes) => AuthKind::Poly1305,
            AuthFunction::Mac(_) => AuthKind::Mac,
            AuthFunction::Kdf(_) => AuthKind::KdfAsMac,
        }
    }

    /// Tag length this configuration produces.
    #[must_use]
    pub fn output_len(&self) -> usize {
        match self.function {
            AuthFunction::Mac(algorithm) => mac_spec(algorithm).output_len,
            AuthFunction::Kdf(_) => 32,
        }
    }
}

enum MacState {
    HmacSha256(Box<Hmac<Sha256>>),
    HmacSha512(Box<Hmac<Sha512>>),
    Blake3(Box<blake3::Hasher>),
    /// Poly1305 is not chunk-invariant under incremental padding, and
    /// KDF-as-MAC needs the whole message; both buffer until finalize.
    Poly1305 {
        key: Zeroizing<Vec<u8>>,
        nonce: [u8; 16],
        buffer: Vec<u8>,
    },
    Kdf {
        key: Zeroizing<Vec<u8>>,
        algorithm: KdfAlgorithm,
        salt: Vec<u8>,
        buffer: Vec<u8>,
    },
}

/// Incremental MAC stream over one of the registry functions.
pub struct MacStream {
    state: MacState,
}

impl MacStream {
    /// Initialize a MAC stream for `config` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeySizeInvalid`] when the function demands a
    /// fixed key length the caller did not supply, and
    /// [`CryptoError::CipherConfigInvalid`] when Poly1305 is configured
    /// without its one-time nonce.
    pub fn new(config: &AuthConfig, key: &[u8]) -> Result<Self, CryptoError> {
        let state = match config.function {
            AuthFunction::Mac(MacAlgorithm::HmacSha256) => MacState::HmacSha256(Box::new(
                <Hmac<Sha256> as Mac>::new_from_slice(key)
                    .map_err(|_| CryptoError::CipherConfigInvalid("HMAC key"))?,
            )),
            AuthFunction::Mac(MacAlgorithm::HmacSha512) => MacState::HmacSha512(Box::new(
                <Hmac<Sha512> as Mac>::new_from_slice(key)
                    .map_err(|_| CryptoError::CipherConfigInvalid("HMAC key"))?,
            )),
            AuthFunction::Mac(MacAlgorithm::Blake3) => {
                let fixed: [u8; 32] = key.try_into().map_err(|_| CryptoError::KeySizeInvalid {
                    algorithm: "BLAKE3",
                    bits: (key.len() * 8) as u32,
                })?;
                MacState::Blake3(Box::new(blake3::Hasher::new_keyed(&fixed)))
            }
            AuthFunction::Mac(MacAlgorithm::Poly1305Aes) => {
                if key.len() != 32 {
                    return Err(CryptoError::KeySizeInvalid {
                        algorithm: "Poly1305-AES",
                        bits: (key.len() * 8) as u32,
                    });
                }
                let nonce_bytes = config
                    .nonce
                    .as_deref()
                    .ok_or(CryptoError::CipherConfigInvalid("Poly1305 nonce missing"))?;
                let nonce: [u8; 16] =
                    nonce_bytes
                        .try_into()
                        .map_err(|_| CryptoError::IvSizeInvalid {
                            expected: 16,
                            actual: nonce_bytes.len(),
                        })?;
                MacState::Poly1305 {
                    key: Zeroizing::new(key.to_vec()),
                    nonce,
                    buffer: Vec::new(),
                }
            }
            AuthFunction::Kdf(algorithm) => MacState::Kdf {
                key: Zeroizing::new(key.to_vec()),
                algorithm,
                salt: config.salt.clone().unwrap_or_default(),
                buffer: Vec::new(),
            },
        };

        let mut stream = Self { state };
        if let Some(ad) = &config.additional_data {
            stream.update(ad);
        }
        Ok(stream)
    }

    /// Feed message bytes.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            MacState::HmacSha256(mac) => mac.update(data),
            MacState::HmacSha512(mac) => mac.update(data),
            MacState::Blake3(hasher) => {
                hasher.update(data);
            }
            MacState::Poly1305 { buffer, .. } | MacState::Kdf { buffer, .. } => {
                buffer.extend_from_slice(data);
            }
        }
    }

    /// Produce the tag, consuming the stream.
    ///
    /// # Errors
    ///
    /// KDF-as-MAC propagates derivation failures.
    pub fn finalize(self) -> Result<Vec<u8>, CryptoError> {
        match self.state {
            MacState::HmacSha256(mac) => Ok(mac.finalize().into_bytes().to_vec()),
            MacState::HmacSha512(mac) => Ok(mac.finalize().into_bytes().to_vec()),
            MacState::Blake3(hasher) => Ok(hasher.finalize().as_bytes().to_vec()),
            MacState::Poly1305 { key, nonce, buffer } => {
                Ok(poly1305_aes(&key, &nonce, &buffer).to_vec())
            }
            MacState::Kdf {
                key,
                algorithm,
                salt,
                buffer,
            } => {
                // The message is bound through the salt; verification-grade
                // cost parameters keep keyring pre-checks cheap.
                let mut bound_salt = salt;
                bound_salt.extend_from_slice(&buffer);
                let config = KdfConfig {
                    algorithm,
                    salt: bound_salt,
                    params: match algorithm {
                        KdfAlgorithm::Scrypt => KdfParams::Scrypt { n: 1 << 10, r: 8, p: 1 },
                        KdfAlgorithm::Pbkdf2 => KdfParams::Pbkdf2 {
                            iterations: 4096,
                            hash: crate::kdf::PbkdfHash::Sha256,
                        },
                    },
                };
                let pre = PreKey::new(key.to_vec());
                let out = config.derive(&pre, 32)?;
                Ok(out.to_vec())
            }
        }
    }
}

/// Poly1305-AES: `tag = Poly1305_r(msg)` keyed with `r = key[0..16]` and
/// `s = AES-128_{key[16..32]}(nonce)`.
fn poly1305_aes(key: &[u8], nonce: &[u8; 16], message: &[u8]) -> [u8; 16] {
    debug_assert_eq!(key.len(), 32);

    let aes = aes::Aes128::new_from_slice(&key[16..32]).expect("16-byte AES key");
    let mut s = aes::Block::clone_from_slice(nonce);
    aes.encrypt_block(&mut s);

    let mut poly_key = Zeroizing::new([0u8; 32]);
    poly_key[..16].copy_from_slice(&key[..16]);
    poly_key[16..].copy_from_slice(&s);

    let tag = poly1305::Poly1305::new(poly1305::Key::from_slice(&*poly_key))
        .compute_unpadded(message);
    tag.into()
}
