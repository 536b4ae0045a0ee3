//! Payload items and their lazy stream bindings.
//!
//! An item holds a *supplier* rather than an open handle; the source is
//! opened once at transfer time and closed (dropped) on every exit path.
//! Key material is either explicit in the descriptor or reconstructed from
//! the package pre-key through the item's derivation recipe.

use std::io::Read;

use uuid::Uuid;

use obscur_crypto::cipher::CipherConfig;
use obscur_crypto::kdf::{KdfConfig, KeyStrength};
use obscur_crypto::mac::AuthConfig;
use obscur_crypto::registry::{MacAlgorithm, StreamAlgorithm};
use obscur_crypto::CryptoError;

use crate::error::PackageError;
use crate::manifest::{PayloadItemDescriptor, PayloadItemKind};

/// Lazy source binding: opened exactly once, at transfer time.
pub type StreamSource = Box<dyn FnOnce() -> std::io::Result<Box<dyn Read>>>;

/// A payload item staged for writing: descriptor plus stream binding.
pub struct PayloadItem {
    /// Wire descriptor; lengths and tag are filled during write
    pub descriptor: PayloadItemDescriptor,
    source: Option<StreamSource>,
}

impl PayloadItem {
    /// Item over a lazy reader with explicit, freshly drawn keys.
    ///
    /// Defaults to XChaCha20 + HMAC-SHA-256 encrypt-then-MAC.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if key generation fails.
    pub fn from_source(
        kind: PayloadItemKind,
        path: impl Into<String>,
        source: StreamSource,
    ) -> Result<Self, PackageError> {
        let cipher = CipherConfig::stream(StreamAlgorithm::XChaCha20)?;
        let cipher_key = obscur_crypto::random::random_vec(cipher.key_len())?;
        let authentication_key = obscur_crypto::random::random_vec(32)?;
        Ok(Self {
            descriptor: PayloadItemDescriptor {
                id: Uuid::new_v4(),
                kind,
                path: path.into(),
                external_length: 0,
                internal_length: 0,
                format_name: None,
                format_data: None,
                cipher,
                cipher_key: Some(cipher_key),
                authentication: Some(AuthConfig::mac(MacAlgorithm::HmacSha256)),
                authentication_key: Some(authentication_key),
                authentication_tag: Vec::new(),
                key_confirmation: None,
                key_confirmation_output: None,
                key_derivation: None,
            },
            source: Some(source),
        })
    }

    /// In-memory binary item.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if key generation fails.
    pub fn binary(path: impl Into<String>, data: Vec<u8>) -> Result<Self, PackageError> {
        Self::from_source(
            PayloadItemKind::Binary,
            path,
            Box::new(move || Ok(Box::new(std::io::Cursor::new(data)) as Box<dyn Read>)),
        )
    }

    /// In-memory UTF-8 text item.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if key generation fails.
    pub fn utf8(path: impl Into<String>, text: String) -> Result<Self, PackageError> {
        Self::from_source(
            PayloadItemKind::Utf8,
            path,
            Box::new(move || {
                Ok(Box::new(std::io::Cursor::new(text.into_bytes())) as Box<dyn Read>)
            }),
        )
    }

    /// Key-action item carrying opaque keyring material.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if key generation fails.
    pub fn key_action(path: impl Into<String>, data: Vec<u8>) -> Result<Self, PackageError> {
        Self::from_source(
            PayloadItemKind::KeyAction,
            path,
            Box::new(move || Ok(Box::new(std::io::Cursor::new(data)) as Box<dyn Read>)),
        )
    }

    /// Switch this item from explicit keys to pre-key derivation.
    ///
    /// The raw keys are removed; a derivation recipe and confirmation
    /// record take their place, to be resolved against the package pre-key
    /// at transfer time.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if salt generation fails.
    pub fn derive_keys_from_pre_key(
        &mut self,
        strength: KeyStrength,
    ) -> Result<&mut Self, PackageError> {
        let salt = obscur_crypto::random::random_vec(self.descriptor.cipher.key_len())?;
        self.descriptor.cipher_key = None;
        self.descriptor.authentication_key = None;
        self.descriptor.key_derivation = Some(KdfConfig::payload_scrypt(strength, salt));
        self.descriptor.key_confirmation = Some(obscur_crypto::confirm::fresh_config()?);
        self.descriptor.key_confirmation_output = None;
        Ok(self)
    }

    /// Whether a source binding is present.
    #[must_use]
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Take the source supplier; `None` if already taken or never bound.
    pub fn take_source(&mut self) -> Option<StreamSource> {
        self.source.take()
    }

    /// Construct an item without any stream binding. Write-time staging
    /// reports it through the aggregate [`PackageError::StreamBindingAbsent`].
    #[must_use]
    pub fn unbound(descriptor: PayloadItemDescriptor) -> Self {
        Self {
            descriptor,
            source: None,
        }
    }
}

/// Resolved key material for one item transfer.
pub struct ItemKeys {
    /// Cipher key bytes
    pub cipher_key: zeroize::Zeroizing<Vec<u8>>,
    /// MAC key bytes, when the cipher is not an AEAD
    pub mac_key: Option<zeroize::Zeroizing<Vec<u8>>>,
}

/// Resolve an item's working keys: explicit descriptor keys, or a carve of
/// the derivation recipe's output under `pre_key`.
///
/// # Errors
///
/// Returns [`CryptoError`] derivation failures; callers have already
/// checked `has_key_material`.
pub fn resolve_item_keys(
    descriptor: &PayloadItemDescriptor,
    pre_key: Option<&obscur_crypto::PreKey>,
) -> Result<ItemKeys, CryptoError> {
    let needs_mac = !descriptor.cipher.is_aead();
    if let Some(cipher_key) = &descriptor.cipher_key {
        return Ok(ItemKeys {
            cipher_key: zeroize::Zeroizing::new(cipher_key.clone()),
            mac_key: descriptor
                .authentication_key
                .as_ref()
                .filter(|_| needs_mac)
                .map(|k| zeroize::Zeroizing::new(k.clone())),
        });
    }

    let derivation = descriptor
        .key_derivation
        .as_ref()
        .expect("caller verified key material is present");
    let pre_key = pre_key.expect("derivation requires the package pre-key");
    let mac_len = if needs_mac { 32 } else { 0 };
    let keys = derivation.derive_working_keys(pre_key, descriptor.cipher.key_len(), mac_len)?;
    Ok(ItemKeys {
        cipher_key: keys.cipher_key,
        mac_key: needs_mac.then_some(keys.mac_key),
    })
}

/// A recovered item: descriptor plus verified plaintext.
#[derive(Debug)]
pub struct UnpackedItem {
    /// The item's descriptor as read from the manifest
    pub descriptor: PayloadItemDescriptor,
    /// Decrypted, authenticated content
    pub data: Vec<u8>,
}

impl UnpackedItem {
    /// Interpret the content as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::FormatMalformed`] when the item kind is
    /// [`PayloadItemKind::Utf8`] but the bytes are not valid UTF-8.
    pub fn as_text(&self) -> Result<&str, PackageError> {
        std::str::from_utf8(&self.data)
            .map_err(|_| PackageError::FormatMalformed("invalid UTF-8 in text item".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_item_binds_a_source() {
        let mut item = PayloadItem::binary("a/b.bin", vec![1, 2, 3]).unwrap();
        assert!(item.has_source());
        assert!(item.descriptor.has_key_material());

        let mut reader = item.take_source().unwrap()().unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert!(!item.has_source());
    }

    #[test]
    fn derived_item_drops_raw_keys() {
        let mut item = PayloadItem::binary("x", vec![0; 8]).unwrap();
        item.derive_keys_from_pre_key(KeyStrength::HighEntropy).unwrap();
        assert!(item.descriptor.cipher_key.is_none());
        assert!(item.descriptor.authentication_key.is_none());
        assert!(item.descriptor.key_derivation.is_some());
        assert!(item.descriptor.key_confirmation.is_some());
        assert!(item.descriptor.has_key_material());
    }

    #[test]
    fn explicit_keys_resolve_without_pre_key() {
        let item = PayloadItem::binary("x", vec![0; 8]).unwrap();
        let keys = resolve_item_keys(&item.descriptor, None).unwrap();
        assert_eq!(keys.cipher_key.len(), 32);
        assert!(keys.mac_key.is_some());
    }

    #[test]
    fn derived_keys_are_deterministic() {
        let mut item = PayloadItem::binary("x", vec![0; 8]).unwrap();
        item.derive_keys_from_pre_key(KeyStrength::HighEntropy).unwrap();
        let pre_key = obscur_crypto::PreKey::from_passphrase("package key");

        let a = resolve_item_keys(&item.descriptor, Some(&pre_key)).unwrap();
        let b = resolve_item_keys(&item.descriptor, Some(&pre_key)).unwrap();
        assert_eq!(*a.cipher_key, *b.cipher_key);
        assert_eq!(
            a.mac_key.as_deref().unwrap(),
            b.mac_key.as_deref().unwrap()
        );
        assert_ne!(&*a.cipher_key, a.mac_key.as_deref().unwrap());
    }
}
