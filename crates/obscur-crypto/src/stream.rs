//! Authenticated cipher streams: encrypt-then-MAC with AEAD folding.
//!
//! The composition is strict encrypt-then-MAC. The MAC covers, in order:
//!
//! 1. every ciphertext byte produced;
//! 2. a little-endian 32-bit count of those bytes (length commitment);
//! 3. the caller's descriptor bytes (serialized with the tag field elided)
//!    as additional authenticated data.
//!
//! AEAD configurations fold all three into the native AAD with a detached
//! tag instead of running a separate MAC. Decryption always verifies the
//! tag before producing a single plaintext byte; for that reason the
//! decryptor buffers ciphertext until [`AuthenticatedDecryptor::finalize`].
//!
//! Both engines are consumed by `finalize`, so double finalization is
//! unrepresentable; reset is re-construction.

use zeroize::Zeroizing;

use crate::cipher::{
    aead_open_detached, aead_seal_detached, cbc_decrypt, cbc_encrypt, CipherConfig, CipherSpec,
    KeystreamCipher,
};
use crate::constant_time::verify_tag;
use crate::mac::{AuthConfig, MacStream};
use crate::registry::BlockMode;
use crate::CryptoError;

enum EncryptState {
    /// Length-preserving transform streaming through a MAC
    Keystream {
        cipher: KeystreamCipher,
        mac: MacStream,
        count: u32,
    },
    /// CBC buffers plaintext and encrypts at finalize
    Cbc {
        config: CipherConfig,
        key: Zeroizing<Vec<u8>>,
        mac_key: Zeroizing<Vec<u8>>,
        auth: AuthConfig,
        buffer: Zeroizing<Vec<u8>>,
    },
    /// AEAD buffers plaintext and seals detached at finalize
    Aead {
        config: CipherConfig,
        key: Zeroizing<Vec<u8>>,
        buffer: Zeroizing<Vec<u8>>,
    },
}

/// Push-style authenticated encryptor.
pub struct AuthenticatedEncryptor {
    state: EncryptState,
}

impl AuthenticatedEncryptor {
    /// Build an encryptor for the given cipher/auth configuration pair.
    ///
    /// Non-AEAD configurations require an [`AuthConfig`] and MAC key; AEAD
    /// configurations must not carry one.
    ///
    /// # Errors
    ///
    /// Returns configuration and size errors from validation.
    pub fn new(
        cipher_config: &CipherConfig,
        cipher_key: &[u8],
        auth: Option<(&AuthConfig, &[u8])>,
    ) -> Result<Self, CryptoError> {
        cipher_config.validate()?;
        let state = match (&cipher_config.spec, auth) {
            (CipherSpec::Aead { .. }, None) => EncryptState::Aead {
                config: cipher_config.clone(),
                key: Zeroizing::new(cipher_key.to_vec()),
                buffer: Zeroizing::new(Vec::new()),
            },
            (CipherSpec::Aead { .. }, Some(_)) => {
                return Err(CryptoError::CipherConfigInvalid(
                    "AEAD carries no separate MAC",
                ))
            }
            (
                CipherSpec::Block {
                    mode: BlockMode::Cbc,
                    ..
                },
                Some((auth_config, mac_key)),
            ) => EncryptState::Cbc {
                config: cipher_config.clone(),
                key: Zeroizing::new(cipher_key.to_vec()),
                mac_key: Zeroizing::new(mac_key.to_vec()),
                auth: auth_config.clone(),
                buffer: Zeroizing::new(Vec::new()),
            },
            (_, Some((auth_config, mac_key))) => EncryptState::Keystream {
                cipher: KeystreamCipher::new(cipher_config, cipher_key)?,
                mac: MacStream::new(auth_config, mac_key)?,
                count: 0,
            },
            (_, None) => {
                return Err(CryptoError::CipherConfigInvalid(
                    "non-AEAD cipher requires a MAC configuration",
                ))
            }
        };
        Ok(Self { state })
    }

    /// Encrypt `plaintext`, appending ciphertext to `out`.
    ///
    /// Buffering variants (CBC, AEAD) emit nothing until finalize.
    pub fn update(&mut self, plaintext: &[u8], out: &mut Vec<u8>) {
        match &mut self.state {
            EncryptState::Keystream { cipher, mac, count } => {
                let start = out.len();
                out.extend_from_slice(plaintext);
                cipher.apply(&mut out[start..]);
                mac.update(&out[start..]);
                *count = count.wrapping_add(plaintext.len() as u32);
            }
            EncryptState::Cbc { buffer, .. } | EncryptState::Aead { buffer, .. } => {
                buffer.extend_from_slice(plaintext);
            }
        }
    }

    /// Finish the stream: flush remaining ciphertext into `out` and return
    /// the authentication tag over `(ciphertext, length, descriptor_aad)`.
    ///
    /// # Errors
    ///
    /// Propagates cipher and MAC failures.
    pub fn finalize(self, descriptor_aad: &[u8], out: &mut Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        match self.state {
            EncryptState::Keystream {
                mut mac, count, ..
            } => {
                mac.update(&count.to_le_bytes());
                mac.update(descriptor_aad);
                mac.finalize()
            }
            EncryptState::Cbc {
                config,
                key,
                mac_key,
                auth,
                buffer,
            } => {
                let ciphertext = cbc_encrypt(&config, &key, &buffer)?;
                let mut mac = MacStream::new(&auth, &mac_key)?;
                mac.update(&ciphertext);
                mac.update(&(ciphertext.len() as u32).to_le_bytes());
                mac.update(descriptor_aad);
                out.extend_from_slice(&ciphertext);
                mac.finalize()
            }
            EncryptState::Aead {
                config,
                key,
                mut buffer,
            } => {
                let mut aad = (buffer.len() as u32).to_le_bytes().to_vec();
                aad.extend_from_slice(descriptor_aad);
                let tag = aead_seal_detached(&config, &key, &mut buffer, &aad)?;
                out.extend_from_slice(&buffer);
                Ok(tag)
            }
        }
    }
}

enum DecryptState {
    Keystream {
        cipher: KeystreamCipher,
        mac: MacStream,
        count: u32,
    },
    Cbc {
        config: CipherConfig,
        key: Zeroizing<Vec<u8>>,
        mac_key: Zeroizing<Vec<u8>>,
        auth: AuthConfig,
    },
    Aead {
        config: CipherConfig,
        key: Zeroizing<Vec<u8>>,
    },
}

/// Push-style verifying decryptor.
///
/// Ciphertext accumulates through [`Self::update`]; [`Self::finalize`]
/// verifies the tag and only then decrypts, so no plaintext ever escapes
/// an unauthenticated stream.
pub struct AuthenticatedDecryptor {
    state: DecryptState,
    ciphertext: Vec<u8>,
}

impl AuthenticatedDecryptor {
    /// Build a decryptor mirroring [`AuthenticatedEncryptor::new`].
    ///
    /// # Errors
    ///
    /// Returns configuration and size errors from validation.
    pub fn new(
        cipher_config: &CipherConfig,
        cipher_key: &[u8],
        auth: Option<(&AuthConfig, &[u8])>,
    ) -> Result<Self, CryptoError> {
        cipher_config.validate()?;
        let state = match (&cipher_config.spec, auth) {
            (CipherSpec::Aead { .. }, None) => DecryptState::Aead {
                config: cipher_config.clone(),
                key: Zeroizing::new(cipher_key.to_vec()),
            },
            (CipherSpec::Aead { .. }, Some(_)) => {
                return Err(CryptoError::CipherConfigInvalid(
                    "AEAD carries no separate MAC",
                ))
            }
            (
                CipherSpec::Block {
                    mode: BlockMode::Cbc,
                    ..
                },
                Some((auth_config, mac_key)),
            ) => DecryptState::Cbc {
                config: cipher_config.clone(),
                key: Zeroizing::new(cipher_key.to_vec()),
                mac_key: Zeroizing::new(mac_key.to_vec()),
                auth: auth_config.clone(),
            },
            (_, Some((auth_config, mac_key))) => DecryptState::Keystream {
                cipher: KeystreamCipher::new(cipher_config, cipher_key)?,
                mac: MacStream::new(auth_config, mac_key)?,
                count: 0,
            },
            (_, None) => {
                return Err(CryptoError::CipherConfigInvalid(
                    "non-AEAD cipher requires a MAC configuration",
                ))
            }
        };
        Ok(Self {
            state,
            ciphertext: Vec::new(),
        })
    }

    /// Feed ciphertext bytes.
    pub fn update(&mut self, ciphertext: &[u8]) {
        if let DecryptState::Keystream { mac, count, .. } = &mut self.state {
            mac.update(ciphertext);
            *count = count.wrapping_add(ciphertext.len() as u32);
        }
        self.ciphertext.extend_from_slice(ciphertext);
    }

    /// Verify `expected_tag` and decrypt.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::AuthenticationFailed`] on any tag mismatch;
    /// nothing is decrypted in that case.
    pub fn finalize(
        self,
        descriptor_aad: &[u8],
        expected_tag: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut ciphertext = self.ciphertext;
        match self.state {
            DecryptState::Keystream {
                mut cipher,
                mut mac,
                count,
            } => {
                mac.update(&count.to_le_bytes());
                mac.update(descriptor_aad);
                let tag = mac.finalize()?;
                if !verify_tag(&tag, expected_tag) {
                    return Err(CryptoError::AuthenticationFailed);
                }
                cipher.apply(&mut ciphertext);
                Ok(ciphertext)
            }
            DecryptState::Cbc {
                config,
                key,
                mac_key,
                auth,
            } => {
                let mut mac = MacStream::new(&auth, &mac_key)?;
                mac.update(&ciphertext);
                mac.update(&(ciphertext.len() as u32).to_le_bytes());
                mac.update(descriptor_aad);
                let tag = mac.finalize()?;
                if !verify_tag(&tag, expected_tag) {
                    return Err(CryptoError::AuthenticationFailed);
                }
                cbc_decrypt(&config, &key, &ciphertext)
            }
            DecryptState::Aead { config, key } => {
                let mut aad = (ciphertext.len() as u32).to_le_bytes().to_vec();
                aad.extend_from_slice(descriptor_aad);
                aead_open_detached(&config, &key, &mut ciphertext, &aad, expected_tag)?;
                Ok(ciphertext)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherConfig;
    use crate::registry::{
        AeadAlgorithm, BlockAlgorithm, MacAlgorithm, StreamAlgorithm,
    };

    fn roundtrip(cipher_config: &CipherConfig, plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
        let cipher_key = vec![0x42u8; cipher_config.key_len()];
        let auth_config = AuthConfig::mac(MacAlgorithm::HmacSha256);
        let mac_key = [0x24u8; 32];
        let auth = if cipher_config.is_aead() {
            None
        } else {
            Some((&auth_config, mac_key.as_slice()))
        };

        let mut encryptor =
            AuthenticatedEncryptor::new(cipher_config, &cipher_key, auth).unwrap();
        let mut ciphertext = Vec::new();
        for chunk in plaintext.chunks(13) {
            encryptor.update(chunk, &mut ciphertext);
        }
        let tag = encryptor.finalize(aad, &mut ciphertext).unwrap();

        let mut decryptor =
            AuthenticatedDecryptor::new(cipher_config, &cipher_key, auth).unwrap();
        for chunk in ciphertext.chunks(7) {
            decryptor.update(chunk);
        }
        let recovered = decryptor.finalize(aad, &tag).unwrap();
        assert_eq!(recovered, plaintext);
        ciphertext
    }

    #[test]
    fn etm_stream_roundtrip() {
        let config = CipherConfig::stream(StreamAlgorithm::XChaCha20).unwrap();
        let ct = roundtrip(&config, b"encrypt-then-mac over a stream cipher", b"descriptor");
        assert_eq!(ct.len(), b"encrypt-then-mac over a stream cipher".len());
    }

    #[test]
    fn etm_ctr_roundtrip() {
        let config =
            CipherConfig::block(BlockAlgorithm::Aes, crate::registry::BlockMode::Ctr, 256)
                .unwrap();
        roundtrip(&config, &[0xEEu8; 517], b"");
    }

    #[test]
    fn etm_cbc_roundtrip() {
        let config =
            CipherConfig::block(BlockAlgorithm::Aes, crate::registry::BlockMode::Cbc, 256)
                .unwrap();
        let ct = roundtrip(&config, b"cbc grows by its padding", b"hdr");
        assert!(ct.len() > b"cbc grows by its padding".len());
    }

    #[test]
    fn aead_roundtrip() {
        let config = CipherConfig::aead(AeadAlgorithm::XChaCha20Poly1305).unwrap();
        roundtrip(&config, b"native aad folding", b"descriptor bytes");
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let config = CipherConfig::stream(StreamAlgorithm::ChaCha20).unwrap();
        let cipher_key = vec![0x42u8; 32];
        let auth_config = AuthConfig::mac(MacAlgorithm::HmacSha256);
        let mac_key = [0x24u8; 32];
        let auth = Some((&auth_config, mac_key.as_slice()));

        let mut encryptor = AuthenticatedEncryptor::new(&config, &cipher_key, auth).unwrap();
        let mut ciphertext = Vec::new();
        encryptor.update(b"sensitive payload", &mut ciphertext);
        let tag = encryptor.finalize(b"aad", &mut ciphertext).unwrap();

        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x80;
            let mut decryptor =
                AuthenticatedDecryptor::new(&config, &cipher_key, auth).unwrap();
            decryptor.update(&tampered);
            assert!(matches!(
                decryptor.finalize(b"aad", &tag),
                Err(CryptoError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn wrong_descriptor_aad_fails() {
        let config = CipherConfig::stream(StreamAlgorithm::Salsa20).unwrap();
        let cipher_key = vec![0x01u8; 32];
        let auth_config = AuthConfig::mac(MacAlgorithm::Blake3);
        let mac_key = [0x02u8; 32];
        let auth = Some((&auth_config, mac_key.as_slice()));

        let mut encryptor = AuthenticatedEncryptor::new(&config, &cipher_key, auth).unwrap();
        let mut ciphertext = Vec::new();
        encryptor.update(b"bound to its descriptor", &mut ciphertext);
        let tag = encryptor.finalize(b"descriptor-v1", &mut ciphertext).unwrap();

        let mut decryptor = AuthenticatedDecryptor::new(&config, &cipher_key, auth).unwrap();
        decryptor.update(&ciphertext);
        assert!(decryptor.finalize(b"descriptor-v2", &tag).is_err());
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let config = CipherConfig::stream(StreamAlgorithm::ChaCha20).unwrap();
        let cipher_key = vec![0x0Au8; 32];
        let auth_config = AuthConfig::mac(MacAlgorithm::HmacSha256);
        let mac_key = [0x0Bu8; 32];
        let auth = Some((&auth_config, mac_key.as_slice()));

        let mut encryptor = AuthenticatedEncryptor::new(&config, &cipher_key, auth).unwrap();
        let mut ciphertext = Vec::new();
        encryptor.update(&[0x33u8; 64], &mut ciphertext);
        let tag = encryptor.finalize(b"", &mut ciphertext).unwrap();

        // The length commitment catches truncation even though the
        // keystream positions would still line up.
        let mut decryptor = AuthenticatedDecryptor::new(&config, &cipher_key, auth).unwrap();
        decryptor.update(&ciphertext[..32]);
        assert!(decryptor.finalize(b"", &tag).is_err());
    }

    #[test]
    fn aead_with_separate_mac_rejected() {
        let config = CipherConfig::aead(AeadAlgorithm::Aes256Gcm).unwrap();
        let auth_config = AuthConfig::mac(MacAlgorithm::HmacSha256);
        let mac_key = [0u8; 32];
        assert!(AuthenticatedEncryptor::new(
            &config,
            &[0u8; 32],
            Some((&auth_config, mac_key.as_slice()))
        )
        .is_err());
    }

    #[test]
    fn missing_mac_rejected() {
        let config = CipherConfig::stream(StreamAlgorithm::ChaCha20).unwrap();
        assert!(AuthenticatedEncryptor::new(&config, &[0u8; 32], None).is_err());
    }
}
