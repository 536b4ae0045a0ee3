//! Symmetric cipher configuration and the tagged cipher engine.
//!
//! A [`CipherConfig`] fully describes one instantiation: the algorithm
//! variant (block / stream / AEAD), key size, mode and padding for block
//! ciphers, and the IV or nonce. Configurations are validated against the
//! capability registry before any key touches them.
//!
//! The engine side exposes three shapes:
//! - [`KeystreamCipher`] for length-preserving transforms (stream ciphers
//!   and CTR mode), applied incrementally;
//! - [`cbc_encrypt`] / [`cbc_decrypt`] for the padded CBC path, whole
//!   buffers only;
//! - [`aead_seal_detached`] / [`aead_open_detached`] for AEAD with the tag
//!   kept out of the ciphertext body.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::Aes256Gcm;
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher};
use serde::{Deserialize, Serialize};

use crate::registry::{
    aead_spec, block_spec, stream_spec, AeadAlgorithm, BlockAlgorithm, BlockMode, BlockPadding,
    StreamAlgorithm,
};
use crate::CryptoError;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Algorithm variant of a cipher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSpec {
    /// Block cipher with mode and padding
    Block {
        /// Algorithm name
        algorithm: BlockAlgorithm,
        /// Mode of operation
        mode: BlockMode,
        /// Padding scheme
        padding: BlockPadding,
    },
    /// Stream cipher
    Stream {
        /// Algorithm name
        algorithm: StreamAlgorithm,
    },
    /// AEAD cipher
    Aead {
        /// Algorithm name
        algorithm: AeadAlgorithm,
        /// MAC (tag) size in bits
        mac_size_bits: u32,
        /// Static associated data folded into the tag
        associated_data: Option<Vec<u8>>,
    },
}

/// A fully described symmetric cipher instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherConfig {
    /// Variant and algorithm
    pub spec: CipherSpec,
    /// Key size in bits
    pub key_size_bits: u32,
    /// IV (block/AEAD) or nonce (stream)
    pub iv: Vec<u8>,
}

impl CipherConfig {
    /// Stream cipher configuration with a freshly drawn nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if nonce generation fails.
    pub fn stream(algorithm: StreamAlgorithm) -> Result<Self, CryptoError> {
        let spec = stream_spec(algorithm);
        Ok(Self {
            spec: CipherSpec::Stream { algorithm },
            key_size_bits: spec.key_sizes_bits[spec.key_sizes_bits.len() - 1],
            iv: crate::random::random_vec(spec.nonce_len)?,
        })
    }

    /// Block cipher configuration with a freshly drawn IV.
    ///
    /// CTR mode pairs with [`BlockPadding::None`], CBC with
    /// [`BlockPadding::Pkcs7`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if IV generation fails.
    pub fn block(
        algorithm: BlockAlgorithm,
        mode: BlockMode,
        key_size_bits: u32,
    ) -> Result<Self, CryptoError> {
        let spec = block_spec(algorithm);
        let padding = if mode.requires_padding() {
            BlockPadding::Pkcs7
        } else {
            BlockPadding::None
        };
        Ok(Self {
            spec: CipherSpec::Block {
                algorithm,
                mode,
                padding,
            },
            key_size_bits,
            iv: crate::random::random_vec(spec.block_len)?,
        })
    }

    /// AEAD configuration with a freshly drawn nonce and 128-bit tag.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if nonce generation fails.
    pub fn aead(algorithm: AeadAlgorithm) -> Result<Self, CryptoError> {
        let spec = aead_spec(algorithm);
        Ok(Self {
            spec: CipherSpec::Aead {
                algorithm,
                mac_size_bits: 128,
                associated_data: None,
            },
            key_size_bits: spec.key_sizes_bits[spec.key_sizes_bits.len() - 1],
            iv: crate::random::random_vec(spec.nonce_len)?,
        })
    }

    /// Key length in bytes.
    #[must_use]
    pub fn key_len(&self) -> usize {
        (self.key_size_bits / 8) as usize
    }

    /// Whether ciphertext length equals plaintext length.
    ///
    /// Payload items require this; the multiplexer's decision sequence is
    /// replayed by the reader over ciphertext lengths.
    #[must_use]
    pub fn length_preserving(&self) -> bool {
        match &self.spec {
            CipherSpec::Stream { .. } | CipherSpec::Aead { .. } => true,
            CipherSpec::Block { mode, .. } => mode.length_preserving(),
        }
    }

    /// Whether this is an AEAD configuration.
    #[must_use]
    pub fn is_aead(&self) -> bool {
        matches!(self.spec, CipherSpec::Aead { .. })
    }

    /// Validate against the capability registry.
    ///
    /// # Errors
    ///
    /// Returns the appropriate size or configuration error for any
    /// violated invariant.
    pub fn validate(&self) -> Result<(), CryptoError> {
        match &self.spec {
            CipherSpec::Block {
                algorithm,
                mode,
                padding,
            } => {
                let spec = block_spec(*algorithm);
                if !spec.key_sizes_bits.contains(&self.key_size_bits) {
                    return Err(CryptoError::KeySizeInvalid {
                        algorithm: "AES",
                        bits: self.key_size_bits,
                    });
                }
                if mode.requires_padding() && *padding == BlockPadding::None {
                    return Err(CryptoError::CipherConfigInvalid(
                        "padded mode configured without padding",
                    ));
                }
                if !mode.requires_padding() && *padding != BlockPadding::None {
                    return Err(CryptoError::CipherConfigInvalid(
                        "stream-like mode configured with padding",
                    ));
                }
                if self.iv.len() != spec.block_len {
                    return Err(CryptoError::IvSizeInvalid {
                        expected: spec.block_len,
                        actual: self.iv.len(),
                    });
                }
            }
            CipherSpec::Stream { algorithm } => {
                let spec = stream_spec(*algorithm);
                if !spec.key_sizes_bits.contains(&self.key_size_bits) {
                    return Err(CryptoError::KeySizeInvalid {
                        algorithm: "stream cipher",
                        bits: self.key_size_bits,
                    });
                }
                if self.iv.len() != spec.nonce_len {
                    return Err(CryptoError::IvSizeInvalid {
                        expected: spec.nonce_len,
                        actual: self.iv.len(),
                    });
                }
            }
            CipherSpec::Aead {
                algorithm,
                mac_size_bits,
                ..
            } => {
                let spec = aead_spec(*algorithm);
                if !spec.key_sizes_bits.contains(&self.key_size_bits) {
                    return Err(CryptoError::KeySizeInvalid {
                        algorithm: "AEAD",
                        bits: self.key_size_bits,
                    });
                }
                if !spec.tag_sizes_bits.contains(mac_size_bits) {
                    return Err(CryptoError::MacSizeInvalid {
                        algorithm: "AEAD",
                        bits: *mac_size_bits,
                    });
                }
                if self.iv.len() != spec.nonce_len {
                    return Err(CryptoError::IvSizeInvalid {
                        expected: spec.nonce_len,
                        actual: self.iv.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Length-preserving keystream transform (stream ciphers and AES-CTR).
///
/// Encryption and decryption are the same XOR; callers apply it to
/// whichever direction they are running.
pub enum KeystreamCipher {
    /// ChaCha20 stream
    ChaCha20(Box<chacha20::ChaCha20>),
    /// XChaCha20 stream
    XChaCha20(Box<chacha20::XChaCha20>),
    /// Salsa20 stream
    Salsa20(Box<salsa20::Salsa20>),
    /// AES-128 in CTR mode
    Aes128Ctr(Box<Aes128Ctr>),
    /// AES-256 in CTR mode
    Aes256Ctr(Box<Aes256Ctr>),
}

impl KeystreamCipher {
    /// Instantiate from a validated configuration and raw key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the config is not a
    /// length-preserving non-AEAD transform, or a size error when the key
    /// does not match.
    pub fn new(config: &CipherConfig, key: &[u8]) -> Result<Self, CryptoError> {
        config.validate()?;
        if key.len() != config.key_len() {
            return Err(CryptoError::KeySizeInvalid {
                algorithm: "cipher",
                bits: (key.len() * 8) as u32,
            });
        }
        match &config.spec {
            CipherSpec::Stream { algorithm } => {
                let invalid = || CryptoError::CipherConfigInvalid("stream cipher key/nonce");
                Ok(match algorithm {
                    StreamAlgorithm::ChaCha20 => Self::ChaCha20(Box::new(
                        chacha20::ChaCha20::new_from_slices(key, &config.iv)
                            .map_err(|_| invalid())?,
                    )),
                    StreamAlgorithm::XChaCha20 => Self::XChaCha20(Box::new(
                        chacha20::XChaCha20::new_from_slices(key, &config.iv)
                            .map_err(|_| invalid())?,
                    )),
                    StreamAlgorithm::Salsa20 => Self::Salsa20(Box::new(
                        salsa20::Salsa20::new_from_slices(key, &config.iv)
                            .map_err(|_| invalid())?,
                    )),
                })
            }
            CipherSpec::Block {
                mode: BlockMode::Ctr,
                ..
            } => {
                let invalid = || CryptoError::CipherConfigInvalid("CTR key/IV");
                Ok(match config.key_size_bits {
                    128 => Self::Aes128Ctr(Box::new(
                        Aes128Ctr::new_from_slices(key, &config.iv).map_err(|_| invalid())?,
                    )),
                    _ => Self::Aes256Ctr(Box::new(
                        Aes256Ctr::new_from_slices(key, &config.iv).map_err(|_| invalid())?,
                    )),
                })
            }
            _ => Err(CryptoError::CipherConfigInvalid(
                "not a length-preserving keystream configuration",
            )),
        }
    }

    /// Apply the keystream to `buf` in place.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::ChaCha20(c) => c.apply_keystream(buf),
            Self::XChaCha20(c) => c.apply_keystream(buf),
            Self::Salsa20(c) => c.apply_keystream(buf),
            Self::Aes128Ctr(c) => c.apply_keystream(buf),
            Self::Aes256Ctr(c) => c.apply_keystream(buf),
        }
    }
}

/// One-shot CBC encryption with PKCS#7 padding.
///
/// # Errors
///
/// Returns configuration or size errors from validation.
pub fn cbc_encrypt(
    config: &CipherConfig,
    key: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    config.validate()?;
    require_cbc(config)?;
    let invalid = || CryptoError::CipherConfigInvalid("CBC key/IV");
    match config.key_size_bits {
        128 => Ok(cbc::Encryptor::<aes::Aes128>::new_from_slices(key, &config.iv)
            .map_err(|_| invalid())?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        _ => Ok(cbc::Encryptor::<aes::Aes256>::new_from_slices(key, &config.iv)
            .map_err(|_| invalid())?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
    }
}

/// One-shot CBC decryption with PKCS#7 unpadding.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] on a padding error; the
/// caller has already verified the MAC, so bad padding means corruption.
pub fn cbc_decrypt(
    config: &CipherConfig,
    key: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    config.validate()?;
    require_cbc(config)?;
    let invalid = || CryptoError::CipherConfigInvalid("CBC key/IV");
    match config.key_size_bits {
        128 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, &config.iv)
            .map_err(|_| invalid())?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed),
        _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, &config.iv)
            .map_err(|_| invalid())?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed),
    }
}

fn require_cbc(config: &CipherConfig) -> Result<(), CryptoError> {
    match config.spec {
        CipherSpec::Block {
            mode: BlockMode::Cbc,
            ..
        } => Ok(()),
        _ => Err(CryptoError::CipherConfigInvalid(
            "not a CBC configuration",
        )),
    }
}

/// AEAD seal with detached tag; `buf` is encrypted in place.
///
/// # Errors
///
/// Returns [`CryptoError::EncryptionFailed`] on AEAD failure.
pub fn aead_seal_detached(
    config: &CipherConfig,
    key: &[u8],
    buf: &mut [u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    config.validate()?;
    let algorithm = require_aead(config)?;
    let tag = match algorithm {
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::CipherConfigInvalid("AEAD key"))?
            .encrypt_in_place_detached(aes_gcm::Nonce::from_slice(&config.iv), aad, buf)
            .map_err(|_| CryptoError::EncryptionFailed)?,
        AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::CipherConfigInvalid("AEAD key"))?
            .encrypt_in_place_detached(chacha20poly1305::Nonce::from_slice(&config.iv), aad, buf)
            .map_err(|_| CryptoError::EncryptionFailed)?,
        AeadAlgorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::CipherConfigInvalid("AEAD key"))?
            .encrypt_in_place_detached(chacha20poly1305::XNonce::from_slice(&config.iv), aad, buf)
            .map_err(|_| CryptoError::EncryptionFailed)?,
    };
    Ok(tag.to_vec())
}

/// AEAD open with detached tag; `buf` is decrypted in place on success.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] on tag mismatch, leaving
/// `buf` in an unspecified state the caller must discard.
pub fn aead_open_detached(
    config: &CipherConfig,
    key: &[u8],
    buf: &mut [u8],
    aad: &[u8],
    tag: &[u8],
) -> Result<(), CryptoError> {
    config.validate()?;
    let algorithm = require_aead(config)?;
    if tag.len() != crate::AEAD_TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }
    match algorithm {
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::CipherConfigInvalid("AEAD key"))?
            .decrypt_in_place_detached(
                aes_gcm::Nonce::from_slice(&config.iv),
                aad,
                buf,
                aes_gcm::Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailed),
        AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::CipherConfigInvalid("AEAD key"))?
            .decrypt_in_place_detached(
                chacha20poly1305::Nonce::from_slice(&config.iv),
                aad,
                buf,
                chacha20poly1305::Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailed),
        AeadAlgorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::CipherConfigInvalid("AEAD key"))?
            .decrypt_in_place_detached(
                chacha20poly1305::XNonce::from_slice(&config.iv),
                aad,
                buf,
                chacha20poly1305::Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::AuthenticationFailed),
    }
}

fn require_aead(config: &CipherConfig) -> Result<AeadAlgorithm, CryptoError> {
    match &config.spec {
        CipherSpec::Aead { algorithm, .. } => Ok(*algorithm),
        _ => Err(CryptoError::CipherConfigInvalid("not an AEAD configuration")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystream_roundtrip_all_streams() {
        for algorithm in [
            StreamAlgorithm::ChaCha20,
            StreamAlgorithm::XChaCha20,
            StreamAlgorithm::Salsa20,
        ] {
            let config = CipherConfig::stream(algorithm).unwrap();
            let key = vec![0x42u8; config.key_len()];

            let mut buf = b"the quick brown fox".to_vec();
            KeystreamCipher::new(&config, &key).unwrap().apply(&mut buf);
            assert_ne!(&buf, b"the quick brown fox");

            KeystreamCipher::new(&config, &key).unwrap().apply(&mut buf);
            assert_eq!(&buf, b"the quick brown fox");
        }
    }

    #[test]
    fn ctr_roundtrip_both_key_sizes() {
        for bits in [128u32, 256] {
            let config = CipherConfig::block(BlockAlgorithm::Aes, BlockMode::Ctr, bits).unwrap();
            let key = vec![0x24u8; config.key_len()];

            let mut buf = vec![0xABu8; 100];
            KeystreamCipher::new(&config, &key).unwrap().apply(&mut buf);
            KeystreamCipher::new(&config, &key).unwrap().apply(&mut buf);
            assert_eq!(buf, vec![0xABu8; 100]);
        }
    }

    #[test]
    fn keystream_chunking_is_transparent() {
        let config = CipherConfig::stream(StreamAlgorithm::ChaCha20).unwrap();
        let key = vec![0x11u8; 32];
        let plaintext = vec![0x5Au8; 300];

        let mut whole = plaintext.clone();
        KeystreamCipher::new(&config, &key).unwrap().apply(&mut whole);

        let mut chunked = plaintext;
        let mut cipher = KeystreamCipher::new(&config, &key).unwrap();
        for chunk in chunked.chunks_mut(37) {
            cipher.apply(chunk);
        }
        assert_eq!(whole, chunked);
    }

    #[test]
    fn cbc_roundtrip_and_length_growth() {
        let config = CipherConfig::block(BlockAlgorithm::Aes, BlockMode::Cbc, 256).unwrap();
        let key = vec![0x77u8; 32];
        let plaintext = b"sixteen byte blk".to_vec();

        let ciphertext = cbc_encrypt(&config, &key, &plaintext).unwrap();
        // Full trailing pad block for an aligned input.
        assert_eq!(ciphertext.len(), plaintext.len() + 16);
        assert!(!config.length_preserving());

        let decrypted = cbc_decrypt(&config, &key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn aead_detached_roundtrip_and_tamper() {
        for algorithm in [
            AeadAlgorithm::Aes256Gcm,
            AeadAlgorithm::ChaCha20Poly1305,
            AeadAlgorithm::XChaCha20Poly1305,
        ] {
            let config = CipherConfig::aead(algorithm).unwrap();
            let key = vec![0x99u8; config.key_len()];

            let mut buf = b"detached tag payload".to_vec();
            let tag = aead_seal_detached(&config, &key, &mut buf, b"aad").unwrap();
            assert_eq!(tag.len(), 16);

            let mut ok = buf.clone();
            aead_open_detached(&config, &key, &mut ok, b"aad", &tag).unwrap();
            assert_eq!(&ok, b"detached tag payload");

            let mut tampered = buf.clone();
            tampered[0] ^= 0x01;
            assert!(matches!(
                aead_open_detached(&config, &key, &mut tampered, b"aad", &tag),
                Err(CryptoError::AuthenticationFailed)
            ));

            let mut wrong_aad = buf;
            assert!(aead_open_detached(&config, &key, &mut wrong_aad, b"other", &tag).is_err());
        }
    }

    #[test]
    fn cbc_without_padding_rejected() {
        let mut config = CipherConfig::block(BlockAlgorithm::Aes, BlockMode::Cbc, 256).unwrap();
        if let CipherSpec::Block { padding, .. } = &mut config.spec {
            *padding = BlockPadding::None;
        }
        assert!(matches!(
            config.validate(),
            Err(CryptoError::CipherConfigInvalid(_))
        ));
    }

    #[test]
    fn bad_key_size_rejected() {
        let mut config = CipherConfig::stream(StreamAlgorithm::ChaCha20).unwrap();
        config.key_size_bits = 192;
        assert!(matches!(
            config.validate(),
            Err(CryptoError::KeySizeInvalid { .. })
        ));
    }

    #[test]
    fn bad_iv_length_rejected() {
        let mut config = CipherConfig::stream(StreamAlgorithm::Salsa20).unwrap();
        config.iv = vec![0u8; 12];
        assert!(matches!(
            config.validate(),
            Err(CryptoError::IvSizeInvalid {
                expected: 8,
                actual: 12
            })
        ));
    }
}
