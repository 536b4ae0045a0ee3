//! Manifest descriptors and their serialized forms.
//!
//! Every record here serializes through bincode with fixed field order, so
//! the byte form is stable across implementations. That stability matters:
//! the manifest envelope and each payload item MAC their own descriptor
//! (with the tag field elided) as additional authenticated data, and both
//! sides must produce identical bytes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use obscur_crypto::agreement::Um1PublicKey;
use obscur_crypto::cipher::CipherConfig;
use obscur_crypto::kdf::KdfConfig;
use obscur_crypto::mac::AuthConfig;
use obscur_crypto::random::CsprngConfig;

use crate::error::PackageError;

/// Frameshift padding upper bound (inclusive).
pub const FRAMESHIFT_PAD_MAX: u32 = u16::MAX as u32;

/// Fabric stripe lower bound (inclusive).
pub const FABRIC_STRIPE_MIN: u32 = 64;

/// Fabric stripe upper bound (inclusive).
pub const FABRIC_STRIPE_MAX: u32 = 1 << 16;

/// Payload layout scheme and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadLayout {
    /// Items in manifest order, each drained to completion, no padding
    Simple,
    /// Manifest order with CSPRNG-sized padding after each item
    Frameshift {
        /// Minimum pad length
        pad_min: u32,
        /// Maximum pad length (inclusive)
        pad_max: u32,
    },
    /// Items interleaved in CSPRNG-selected stripes
    Fabric {
        /// Minimum stripe length
        stripe_min: u32,
        /// Maximum stripe length (inclusive)
        stripe_max: u32,
    },
}

impl PayloadLayout {
    /// Fixed-pad Frameshift (`pad_min == pad_max`).
    #[must_use]
    pub fn frameshift_fixed(pad: u32) -> Self {
        Self::Frameshift {
            pad_min: pad,
            pad_max: pad,
        }
    }

    /// Scheme name as it appears in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple => "Simple",
            Self::Frameshift { .. } => "Frameshift",
            Self::Fabric { .. } => "Fabric",
        }
    }

    /// Check the scheme parameters against their documented bounds.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::ConfigurationInvalid`] for out-of-range or
    /// inverted bounds.
    pub fn validate(&self) -> Result<(), PackageError> {
        match *self {
            Self::Simple => Ok(()),
            Self::Frameshift { pad_min, pad_max } => {
                if pad_min > pad_max {
                    return Err(PackageError::ConfigurationInvalid(
                        "Frameshift pad_min exceeds pad_max".into(),
                    ));
                }
                if pad_max > FRAMESHIFT_PAD_MAX {
                    return Err(PackageError::ConfigurationInvalid(format!(
                        "Frameshift pad_max {pad_max} exceeds {FRAMESHIFT_PAD_MAX}"
                    )));
                }
                Ok(())
            }
            Self::Fabric {
                stripe_min,
                stripe_max,
            } => {
                if stripe_min > stripe_max {
                    return Err(PackageError::ConfigurationInvalid(
                        "Fabric stripe_min exceeds stripe_max".into(),
                    ));
                }
                if stripe_min < FABRIC_STRIPE_MIN {
                    return Err(PackageError::ConfigurationInvalid(format!(
                        "Fabric stripe_min {stripe_min} below {FABRIC_STRIPE_MIN}"
                    )));
                }
                if stripe_max > FABRIC_STRIPE_MAX {
                    return Err(PackageError::ConfigurationInvalid(format!(
                        "Fabric stripe_max {stripe_max} exceeds {FABRIC_STRIPE_MAX}"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Layout scheme plus the CSPRNG seed driving its decisions.
///
/// Lives inside the encrypted manifest; the reader reconstructs the
/// writer's decision sequence from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadConfiguration {
    /// Layout scheme and parameters
    pub layout: PayloadLayout,
    /// Deterministic CSPRNG configuration
    pub csprng: CsprngConfig,
}

/// Content type of a payload item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadItemKind {
    /// Opaque bytes
    Binary,
    /// UTF-8 text; validated on unpack
    Utf8,
    /// Key material update for the recipient's keyring
    KeyAction,
}

/// Serialized descriptor of one payload item.
///
/// The writer fills `internal_length` and `authentication_tag` after the
/// item has streamed through its cipher; the reader consumes exactly
/// `internal_length` payload bytes and verifies the tag at item close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadItemDescriptor {
    /// Unique item identifier
    pub id: Uuid,
    /// Content type
    pub kind: PayloadItemKind,
    /// Relative path or logical name
    pub path: String,
    /// Plaintext length in bytes
    pub external_length: u64,
    /// Ciphertext length inside the payload
    pub internal_length: u64,
    /// Optional content format name
    pub format_name: Option<String>,
    /// Optional opaque format parameters
    pub format_data: Option<Vec<u8>>,
    /// Cipher instantiation for this item
    pub cipher: CipherConfig,
    /// Raw cipher key, when not derived
    pub cipher_key: Option<Vec<u8>>,
    /// MAC configuration (absent for AEAD ciphers)
    pub authentication: Option<AuthConfig>,
    /// Raw MAC key, when not derived
    pub authentication_key: Option<Vec<u8>>,
    /// Tag over this item's ciphertext, length and descriptor
    pub authentication_tag: Vec<u8>,
    /// Confirmation configuration for the derivation pre-key
    pub key_confirmation: Option<AuthConfig>,
    /// Stored confirmation output
    pub key_confirmation_output: Option<Vec<u8>>,
    /// Derivation recipe reconstructing the item keys from a pre-key
    pub key_derivation: Option<KdfConfig>,
}

impl PayloadItemDescriptor {
    /// Whether this descriptor carries usable key material: raw keys or a
    /// derivation recipe, never both, never neither.
    #[must_use]
    pub fn has_key_material(&self) -> bool {
        self.cipher_key.is_some() || self.key_derivation.is_some()
    }

    /// Serialized form with the authentication tag elided, used as the
    /// additional authenticated data for this item's cipher stream.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on encoder failure.
    pub fn authenticatable_bytes(&self) -> Result<Vec<u8>, PackageError> {
        let mut clone = self.clone();
        clone.authentication_tag = Vec::new();
        bincode::serialize(&clone).map_err(|e| PackageError::Serialization(e.to_string()))
    }
}

/// The ordered item list plus layout configuration.
///
/// Item order is semantically significant: the multiplexer's selection
/// sequence is defined over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Payload items, in multiplexing order
    pub items: Vec<PayloadItemDescriptor>,
    /// Layout scheme and CSPRNG seed
    pub payload: PayloadConfiguration,
}

impl Manifest {
    /// Serialize to the stable wire form.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on encoder failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        bincode::serialize(self).map_err(|e| PackageError::Serialization(e.to_string()))
    }

    /// Deserialize from the stable wire form.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on decoder failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PackageError> {
        bincode::deserialize(bytes).map_err(|e| PackageError::Serialization(e.to_string()))
    }
}

/// Symmetric envelope parameters shared by both crypto schemes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymmetricManifestCrypto {
    /// Cipher protecting the manifest body
    pub cipher: CipherConfig,
    /// MAC configuration (absent for AEAD ciphers)
    pub authentication: Option<AuthConfig>,
    /// Pre-key confirmation configuration
    pub key_confirmation: Option<AuthConfig>,
    /// Stored confirmation output for keyring screening
    pub key_confirmation_output: Option<Vec<u8>>,
    /// Working-key derivation recipe
    pub key_derivation: KdfConfig,
    /// Tag over the manifest ciphertext, length and this descriptor
    pub authentication_tag: Vec<u8>,
}

/// Manifest cryptography scheme, tagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManifestCryptoConfig {
    /// Shared-secret only
    SymmetricOnly(SymmetricManifestCrypto),
    /// UM1 agreement supplies the pre-key; the ephemeral public key rides
    /// in the envelope descriptor
    Um1Hybrid {
        /// Symmetric envelope parameters
        symmetric: SymmetricManifestCrypto,
        /// Initiator's ephemeral public key
        ephemeral_public_key: Um1PublicKey,
    },
}

impl ManifestCryptoConfig {
    /// Scheme name recorded in the package header.
    #[must_use]
    pub fn scheme_name(&self) -> &'static str {
        match self {
            Self::SymmetricOnly(_) => "SymmetricOnly",
            Self::Um1Hybrid { .. } => "Um1Hybrid",
        }
    }

    /// Shared symmetric parameters.
    #[must_use]
    pub fn symmetric(&self) -> &SymmetricManifestCrypto {
        match self {
            Self::SymmetricOnly(symmetric) => symmetric,
            Self::Um1Hybrid { symmetric, .. } => symmetric,
        }
    }

    /// Mutable shared symmetric parameters.
    pub fn symmetric_mut(&mut self) -> &mut SymmetricManifestCrypto {
        match self {
            Self::SymmetricOnly(symmetric) => symmetric,
            Self::Um1Hybrid { symmetric, .. } => symmetric,
        }
    }

    /// Serialized form with the authentication tag elided; the envelope's
    /// additional authenticated data. The ephemeral public key, when
    /// present, is deliberately inside the authenticated bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on encoder failure.
    pub fn authenticatable_bytes(&self) -> Result<Vec<u8>, PackageError> {
        let mut clone = self.clone();
        clone.symmetric_mut().authentication_tag = Vec::new();
        bincode::serialize(&clone).map_err(|e| PackageError::Serialization(e.to_string()))
    }

    /// Serialize to the stable wire form.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on encoder failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        bincode::serialize(self).map_err(|e| PackageError::Serialization(e.to_string()))
    }

    /// Deserialize from the stable wire form.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on decoder failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PackageError> {
        bincode::deserialize(bytes).map_err(|e| PackageError::Serialization(e.to_string()))
    }
}

/// The plaintext header preceding the manifest body on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestHeader {
    /// Wire format version
    pub format_version: u32,
    /// Crypto scheme name, cross-checked against the embedded config
    pub scheme_name: String,
    /// Serialized [`ManifestCryptoConfig`]
    pub crypto_config: Vec<u8>,
}

impl ManifestHeader {
    /// Serialize to the stable wire form.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on encoder failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        bincode::serialize(self).map_err(|e| PackageError::Serialization(e.to_string()))
    }

    /// Deserialize from the stable wire form.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Serialization`] on decoder failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PackageError> {
        bincode::deserialize(bytes).map_err(|e| PackageError::Serialization(e.to_string()))
    }
}
