//! The manifest envelope: key derivation, confirmation and the
//! authenticated cipher stream around the serialized manifest.
//!
//! Symmetric-only path: `pre_key → KDF → (cipher_key, mac_key) →
//! encrypt-then-MAC(serialize(manifest))`. The UM1 path derives the
//! pre-key through one-pass agreement first and additionally records the
//! ephemeral public key in the envelope descriptor; everything after the
//! pre-key is identical.
//!
//! The key-confirmation output is computed from the pre-key *before*
//! derivation and stored in the descriptor, so a reader can screen a
//! keyring with cheap MACs instead of running scrypt against wrong
//! guesses.

use obscur_crypto::agreement::Um1PublicKey;
use obscur_crypto::cipher::CipherConfig;
use obscur_crypto::confirm;
use obscur_crypto::kdf::{KdfConfig, KeyStrength};
use obscur_crypto::mac::AuthConfig;
use obscur_crypto::registry::{MacAlgorithm, StreamAlgorithm};
use obscur_crypto::stream::{AuthenticatedDecryptor, AuthenticatedEncryptor};
use obscur_crypto::{PreKey, WorkingKeys};

use crate::error::PackageError;
use crate::manifest::{ManifestCryptoConfig, SymmetricManifestCrypto};

/// Length of the MAC half carved for the envelope. Four of its bytes also
/// obfuscate the manifest length field, so it exists even for AEAD
/// envelopes.
const ENVELOPE_MAC_KEY_LEN: usize = 32;

/// Writer-side envelope choices, fixed before sealing.
pub struct EnvelopeConfig {
    /// Cipher protecting the manifest body
    pub cipher: CipherConfig,
    /// MAC configuration; `None` exactly when the cipher is an AEAD
    pub authentication: Option<AuthConfig>,
    /// Entropy class of the pre-key, selecting KDF cost
    pub strength: KeyStrength,
    /// Whether to store a key-confirmation record
    pub key_confirmation: bool,
}

impl EnvelopeConfig {
    /// Default envelope: XChaCha20 + HMAC-SHA-256 encrypt-then-MAC with
    /// key confirmation, costed for a user-typed pre-key.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if nonce generation fails.
    pub fn default_passphrase() -> Result<Self, PackageError> {
        Ok(Self {
            cipher: CipherConfig::stream(StreamAlgorithm::XChaCha20)?,
            authentication: Some(AuthConfig::mac(MacAlgorithm::HmacSha256)),
            strength: KeyStrength::LowEntropy,
            key_confirmation: true,
        })
    }

    /// Default envelope for an agreement-derived pre-key: same suite,
    /// cheap KDF profile, no confirmation record (the agreement itself
    /// identifies the key).
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if nonce generation fails.
    pub fn default_agreement() -> Result<Self, PackageError> {
        Ok(Self {
            cipher: CipherConfig::stream(StreamAlgorithm::XChaCha20)?,
            authentication: Some(AuthConfig::mac(MacAlgorithm::HmacSha256)),
            strength: KeyStrength::HighEntropy,
            key_confirmation: false,
        })
    }

    fn validate(&self) -> Result<(), PackageError> {
        self.cipher.validate()?;
        if self.cipher.is_aead() && self.authentication.is_some() {
            return Err(PackageError::ConfigurationInvalid(
                "AEAD envelope carries no separate MAC".into(),
            ));
        }
        if !self.cipher.is_aead() && self.authentication.is_none() {
            return Err(PackageError::ConfigurationInvalid(
                "non-AEAD envelope requires a MAC configuration".into(),
            ));
        }
        Ok(())
    }
}

/// Crypto scheme selector for sealing.
pub enum EnvelopeScheme {
    /// Shared-secret pre-key
    Symmetric,
    /// UM1-derived pre-key; the ephemeral public key is recorded
    Um1 {
        /// Initiator's ephemeral public key
        ephemeral_public_key: Um1PublicKey,
    },
}

/// A sealed manifest ready for emission.
pub struct SealedEnvelope {
    /// Completed crypto descriptor (tag filled in)
    pub crypto_config: ManifestCryptoConfig,
    /// Manifest body ciphertext
    pub ciphertext: Vec<u8>,
    /// First four bytes of the working MAC key, for length obfuscation
    pub mac_key_prefix: [u8; 4],
}

/// Seal `manifest_bytes` under `pre_key`.
///
/// # Errors
///
/// Returns configuration errors before any key material is touched, and
/// crypto errors from derivation or encryption.
pub fn seal(
    manifest_bytes: &[u8],
    pre_key: &PreKey,
    config: &EnvelopeConfig,
    scheme: EnvelopeScheme,
) -> Result<SealedEnvelope, PackageError> {
    config.validate()?;

    let (key_confirmation, key_confirmation_output) = if config.key_confirmation {
        let confirmation = confirm::fresh_config()?;
        let output = confirm::generate(&confirmation, pre_key)?;
        (Some(confirmation), Some(output))
    } else {
        (None, None)
    };

    // Salt length tracks the enclosing cipher's key length.
    let salt = obscur_crypto::random::random_vec(config.cipher.key_len())?;
    let key_derivation = KdfConfig::manifest_scrypt(config.strength, salt);
    let working =
        key_derivation.derive_working_keys(pre_key, config.cipher.key_len(), ENVELOPE_MAC_KEY_LEN)?;

    let symmetric = SymmetricManifestCrypto {
        cipher: config.cipher.clone(),
        authentication: config.authentication.clone(),
        key_confirmation,
        key_confirmation_output,
        key_derivation,
        authentication_tag: Vec::new(),
    };
    let mut crypto_config = match scheme {
        EnvelopeScheme::Symmetric => ManifestCryptoConfig::SymmetricOnly(symmetric),
        EnvelopeScheme::Um1 {
            ephemeral_public_key,
        } => ManifestCryptoConfig::Um1Hybrid {
            symmetric,
            ephemeral_public_key,
        },
    };
    let aad = crypto_config.authenticatable_bytes()?;

    let auth = crypto_config
        .symmetric()
        .authentication
        .as_ref()
        .map(|a| (a, &working.mac_key[..]));
    let mut encryptor = AuthenticatedEncryptor::new(&config.cipher, &working.cipher_key, auth)?;
    let mut ciphertext = Vec::with_capacity(manifest_bytes.len());
    encryptor.update(manifest_bytes, &mut ciphertext);
    let tag = encryptor.finalize(&aad, &mut ciphertext)?;
    crypto_config.symmetric_mut().authentication_tag = tag;

    let mut mac_key_prefix = [0u8; 4];
    mac_key_prefix.copy_from_slice(&working.mac_key[..4]);

    Ok(SealedEnvelope {
        crypto_config,
        ciphertext,
        mac_key_prefix,
    })
}

/// Working keys re-derived by the reader.
pub struct EnvelopeKeys {
    working: WorkingKeys,
    /// First four bytes of the MAC key, for length de-obfuscation
    pub mac_key_prefix: [u8; 4],
}

/// Re-derive the envelope working keys from a candidate pre-key.
///
/// When a confirmation record is present the candidate is screened first;
/// a mismatch fails with [`PackageError::KeyConfirmationFailed`] before
/// any expensive derivation runs.
///
/// # Errors
///
/// Returns [`PackageError::KeyConfirmationFailed`] or derivation errors.
pub fn derive_keys(
    crypto_config: &ManifestCryptoConfig,
    pre_key: &PreKey,
) -> Result<EnvelopeKeys, PackageError> {
    let symmetric = crypto_config.symmetric();
    if let (Some(confirmation), Some(expected)) = (
        &symmetric.key_confirmation,
        &symmetric.key_confirmation_output,
    ) {
        if !confirm::verify(confirmation, pre_key, expected)? {
            return Err(PackageError::KeyConfirmationFailed);
        }
    }

    let working = symmetric.key_derivation.derive_working_keys(
        pre_key,
        symmetric.cipher.key_len(),
        ENVELOPE_MAC_KEY_LEN,
    )?;
    let mut mac_key_prefix = [0u8; 4];
    mac_key_prefix.copy_from_slice(&working.mac_key[..4]);
    Ok(EnvelopeKeys {
        working,
        mac_key_prefix,
    })
}

/// Verify and decrypt the manifest body.
///
/// # Errors
///
/// Returns [`PackageError::AuthenticationFailed`] on tag mismatch; no
/// plaintext is produced in that case.
pub fn open(
    crypto_config: &ManifestCryptoConfig,
    keys: &EnvelopeKeys,
    ciphertext: &[u8],
) -> Result<Vec<u8>, PackageError> {
    let symmetric = crypto_config.symmetric();
    let aad = crypto_config.authenticatable_bytes()?;

    let auth = symmetric
        .authentication
        .as_ref()
        .map(|a| (a, &keys.working.mac_key[..]));
    let mut decryptor =
        AuthenticatedDecryptor::new(&symmetric.cipher, &keys.working.cipher_key, auth)?;
    decryptor.update(ciphertext);
    decryptor
        .finalize(&aad, &symmetric.authentication_tag)
        .map_err(|e| PackageError::from(e).normalized())
}
