//! One-shot package writer.
//!
//! The writer walks `Fresh → CryptoSet → ItemsStaged → PayloadBuffered →
//! ManifestEmitted → TrailerWritten → Closed` and permits exactly one
//! [`PackageWriter::write`] per instance. Because the manifest precedes
//! the payload on the wire but depends on every item's post-encryption
//! length, the payload is staged through a [`Scratch`] store and appended
//! after the manifest.

use std::io::{Read, Write};

use zeroize::Zeroizing;

use obscur_crypto::agreement::{self, Um1PrivateKey, Um1PublicKey};
use obscur_crypto::confirm;
use obscur_crypto::kdf::KeyStrength;
use obscur_crypto::random::{CsprngAlgorithm, CsprngConfig, StreamCsprng};
use obscur_crypto::stream::AuthenticatedEncryptor;
use obscur_crypto::PreKey;

use crate::envelope::{self, EnvelopeConfig, EnvelopeScheme};
use crate::error::PackageError;
use crate::item::{resolve_item_keys, PayloadItem};
use crate::manifest::{Manifest, ManifestHeader, PayloadConfiguration, PayloadLayout};
use crate::mux::{Multiplexer, MuxStep};
use crate::scratch::{MemoryScratch, Scratch};
use crate::wire;
use crate::{FORMAT_VERSION, MAX_MANIFEST_LEN};

/// Read granularity for item sources.
const TRANSFER_CHUNK: usize = 16 * 1024;

/// Writer state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Constructed, no crypto chosen
    Fresh,
    /// Pre-key and envelope parameters fixed
    CryptoSet,
    /// At least one item staged
    ItemsStaged,
    /// Payload multiplexed into scratch
    PayloadBuffered,
    /// Header and manifest body emitted
    ManifestEmitted,
    /// Trailer magic emitted
    TrailerWritten,
    /// Output flushed; the instance is spent
    Closed,
}

/// Package writer.
pub struct PackageWriter {
    state: WriterState,
    pre_key: PreKey,
    envelope: EnvelopeConfig,
    scheme: Option<EnvelopeScheme>,
    layout: PayloadLayout,
    csprng_algorithm: CsprngAlgorithm,
    items: Vec<PayloadItem>,
    written: bool,
}

impl PackageWriter {
    /// Writer keyed by a user passphrase (low-entropy KDF profile, key
    /// confirmation on).
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if envelope setup fails.
    pub fn with_passphrase(passphrase: &str) -> Result<Self, PackageError> {
        Self::with_pre_key(
            PreKey::from_passphrase(passphrase),
            EnvelopeConfig::default_passphrase()?,
        )
    }

    /// Writer keyed by an explicit pre-key and envelope configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] if envelope setup fails.
    pub fn with_pre_key(pre_key: PreKey, envelope: EnvelopeConfig) -> Result<Self, PackageError> {
        Ok(Self {
            state: WriterState::CryptoSet,
            pre_key,
            envelope,
            scheme: Some(EnvelopeScheme::Symmetric),
            layout: PayloadLayout::Simple,
            csprng_algorithm: CsprngAlgorithm::ChaCha20,
            items: Vec::new(),
            written: false,
        })
    }

    /// Writer keyed through UM1 agreement against `receiver_public`.
    ///
    /// The one-pass exchange runs immediately; the ephemeral public key is
    /// recorded in the envelope descriptor and the shared secret becomes
    /// the (high-entropy) pre-key.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Crypto`] for curve mismatches or degenerate
    /// peer keys.
    pub fn with_um1(
        receiver_public: &Um1PublicKey,
        sender_private: &Um1PrivateKey,
    ) -> Result<Self, PackageError> {
        let (ephemeral_public_key, shared) = agreement::initiate(receiver_public, sender_private)?;
        Ok(Self {
            state: WriterState::CryptoSet,
            pre_key: shared.into_pre_key(),
            envelope: EnvelopeConfig::default_agreement()?,
            scheme: Some(EnvelopeScheme::Um1 {
                ephemeral_public_key,
            }),
            layout: PayloadLayout::Simple,
            csprng_algorithm: CsprngAlgorithm::ChaCha20,
            items: Vec::new(),
            written: false,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Select the payload layout scheme.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::ConfigurationInvalid`] for out-of-bounds
    /// scheme parameters.
    pub fn set_layout(&mut self, layout: PayloadLayout) -> Result<&mut Self, PackageError> {
        layout.validate()?;
        self.layout = layout;
        Ok(self)
    }

    /// Select the deterministic CSPRNG cipher driving layout decisions.
    pub fn set_csprng_algorithm(&mut self, algorithm: CsprngAlgorithm) -> &mut Self {
        self.csprng_algorithm = algorithm;
        self
    }

    /// Stage a payload item. Order is preserved and semantically
    /// significant.
    pub fn add_item(&mut self, item: PayloadItem) -> &mut Self {
        self.items.push(item);
        self.state = WriterState::ItemsStaged;
        self
    }

    /// Write the package, staging the payload in memory.
    ///
    /// # Errors
    ///
    /// See [`Self::write_with_scratch`].
    pub fn write<W: Write>(&mut self, out: &mut W) -> Result<(), PackageError> {
        let mut scratch = MemoryScratch::new();
        self.write_with_scratch(out, &mut scratch)
    }

    /// Write the package, staging the payload in the caller's scratch
    /// store.
    ///
    /// Permitted exactly once per instance; a second call fails with
    /// [`PackageError::AlreadyWritten`] without touching `out`.
    ///
    /// # Errors
    ///
    /// Configuration errors surface before any byte is emitted; missing
    /// keys and stream bindings are aggregated across all items. I/O and
    /// cryptographic failures abort, leaving the partial output invalid.
    pub fn write_with_scratch<W: Write>(
        &mut self,
        out: &mut W,
        scratch: &mut dyn Scratch,
    ) -> Result<(), PackageError> {
        if self.written {
            return Err(PackageError::AlreadyWritten);
        }
        self.validate_staging()?;

        // The shot is consumed once staging passes; a failed transfer
        // leaves partial output, which the format treats as invalid.
        self.written = true;

        let ciphertexts = self.encrypt_items()?;
        tracing::debug!(items = self.items.len(), "payload items encrypted");

        let csprng_config = CsprngConfig::generate(self.csprng_algorithm)?;
        self.stage_payload(&ciphertexts, &csprng_config, scratch)?;
        self.state = WriterState::PayloadBuffered;
        tracing::debug!(bytes = scratch.len(), layout = self.layout.name(), "payload staged");

        let manifest = Manifest {
            items: self.items.iter().map(|i| i.descriptor.clone()).collect(),
            payload: PayloadConfiguration {
                layout: self.layout,
                csprng: csprng_config,
            },
        };
        let manifest_bytes = Zeroizing::new(manifest.to_bytes()?);

        let scheme = self
            .scheme
            .take()
            .expect("scheme present until the single write");
        let sealed = envelope::seal(&manifest_bytes, &self.pre_key, &self.envelope, scheme)?;
        if sealed.ciphertext.len() as u64 > u64::from(MAX_MANIFEST_LEN) {
            return Err(PackageError::FormatMalformed(
                "manifest body exceeds the format bound".into(),
            ));
        }

        let header = ManifestHeader {
            format_version: FORMAT_VERSION,
            scheme_name: sealed.crypto_config.scheme_name().into(),
            crypto_config: sealed.crypto_config.to_bytes()?,
        };
        let header_bytes = header.to_bytes()?;

        wire::write_magic(out)?;
        wire::write_varint(out, header_bytes.len() as u64)?;
        out.write_all(&header_bytes)?;

        let mut obf_length = (sealed.ciphertext.len() as u32).to_le_bytes();
        obscur_crypto::constant_time::xor_in_place(&mut obf_length, &sealed.mac_key_prefix);
        out.write_all(&obf_length)?;
        out.write_all(&sealed.ciphertext)?;
        self.state = WriterState::ManifestEmitted;

        scratch.drain_to(out)?;
        wire::write_magic(out)?;
        self.state = WriterState::TrailerWritten;

        out.flush()?;
        self.pre_key.erase();
        self.state = WriterState::Closed;
        tracing::debug!("package written");
        Ok(())
    }

    /// Pre-flight checks: item presence, layout bounds, cipher
    /// configurations, and the aggregate key/binding report.
    fn validate_staging(&self) -> Result<(), PackageError> {
        if self.items.is_empty() {
            return Err(PackageError::ConfigurationInvalid(
                "no payload items".into(),
            ));
        }
        self.layout.validate()?;

        let mut missing_keys = Vec::new();
        let mut missing_bindings = Vec::new();
        for item in &self.items {
            let explicit_without_mac_key = item.descriptor.cipher_key.is_some()
                && !item.descriptor.cipher.is_aead()
                && item.descriptor.authentication_key.is_none();
            if !item.descriptor.has_key_material() || explicit_without_mac_key {
                missing_keys.push(item.descriptor.path.clone());
            }
            if !item.has_source() {
                missing_bindings.push(item.descriptor.path.clone());
            }

            let descriptor = &item.descriptor;
            descriptor.cipher.validate()?;
            if !descriptor.cipher.length_preserving() {
                return Err(PackageError::ConfigurationInvalid(format!(
                    "item {} uses a length-changing cipher; payload items require \
                     a length-preserving transform",
                    descriptor.path
                )));
            }
            if descriptor.cipher.is_aead() && descriptor.authentication.is_some() {
                return Err(PackageError::ConfigurationInvalid(format!(
                    "item {} pairs an AEAD cipher with a separate MAC",
                    descriptor.path
                )));
            }
            if !descriptor.cipher.is_aead() && descriptor.authentication.is_none() {
                return Err(PackageError::ConfigurationInvalid(format!(
                    "item {} lacks a MAC configuration",
                    descriptor.path
                )));
            }
        }
        if !missing_keys.is_empty() {
            return Err(PackageError::KeyMaterialMissing {
                items: missing_keys,
            });
        }
        if !missing_bindings.is_empty() {
            return Err(PackageError::StreamBindingAbsent {
                items: missing_bindings,
            });
        }
        Ok(())
    }

    /// Stream every item through its authenticated cipher, recording the
    /// measured lengths and tags back into the descriptors.
    fn encrypt_items(&mut self) -> Result<Vec<Vec<u8>>, PackageError> {
        let mut ciphertexts = Vec::with_capacity(self.items.len());
        for item in &mut self.items {
            // Derived items get their confirmation output recorded before
            // any stretching happens, mirroring the envelope.
            if let (Some(confirmation), None) = (
                item.descriptor.key_confirmation.clone(),
                item.descriptor.key_confirmation_output.as_ref(),
            ) {
                item.descriptor.key_confirmation_output =
                    Some(confirm::generate(&confirmation, &self.pre_key)?);
            }

            let keys = resolve_item_keys(&item.descriptor, Some(&self.pre_key))?;
            let auth = item
                .descriptor
                .authentication
                .as_ref()
                .zip(keys.mac_key.as_ref())
                .map(|(a, k)| (a, k.as_slice()));
            let mut encryptor =
                AuthenticatedEncryptor::new(&item.descriptor.cipher, &keys.cipher_key, auth)?;

            let supplier = item
                .take_source()
                .expect("binding verified during staging");
            let mut source = supplier()?;
            let mut ciphertext = Vec::new();
            let mut chunk = [0u8; TRANSFER_CHUNK];
            let mut external_length: u64 = 0;
            loop {
                let got = source.read(&mut chunk)?;
                if got == 0 {
                    break;
                }
                external_length += got as u64;
                encryptor.update(&chunk[..got], &mut ciphertext);
            }
            drop(source);

            item.descriptor.external_length = external_length;
            item.descriptor.internal_length = external_length;
            let aad = item.descriptor.authenticatable_bytes()?;
            let tag = encryptor.finalize(&aad, &mut ciphertext)?;
            debug_assert_eq!(ciphertext.len() as u64, item.descriptor.internal_length);
            item.descriptor.authentication_tag = tag;

            tracing::debug!(
                path = %item.descriptor.path,
                bytes = external_length,
                "item transferred"
            );
            ciphertexts.push(ciphertext);
        }
        Ok(ciphertexts)
    }

    /// Run the multiplexer and interleave item ciphertext with padding
    /// into the scratch store.
    fn stage_payload(
        &self,
        ciphertexts: &[Vec<u8>],
        csprng_config: &CsprngConfig,
        scratch: &mut dyn Scratch,
    ) -> Result<(), PackageError> {
        let lengths: Vec<u64> = ciphertexts.iter().map(|c| c.len() as u64).collect();
        let csprng = StreamCsprng::new(csprng_config)?;
        let mut mux = Multiplexer::new(self.layout, &lengths, csprng);

        let mut offsets = vec![0usize; ciphertexts.len()];
        while let Some(step) = mux.next_step() {
            match step {
                MuxStep::Item { index, len } => {
                    let start = offsets[index];
                    scratch.write_all(&ciphertexts[index][start..start + len])?;
                    offsets[index] = start + len;
                }
                MuxStep::Padding(bytes) => scratch.write_all(&bytes)?,
            }
        }
        debug_assert!(offsets
            .iter()
            .zip(ciphertexts)
            .all(|(o, c)| *o == c.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_writer() -> PackageWriter {
        let mut envelope = EnvelopeConfig::default_passphrase().unwrap();
        envelope.strength = KeyStrength::HighEntropy;
        PackageWriter::with_pre_key(PreKey::from_passphrase("test key"), envelope).unwrap()
    }

    #[test]
    fn empty_manifest_rejected() {
        let mut writer = cheap_writer();
        let mut out = Vec::new();
        let err = writer.write(&mut out).unwrap_err();
        assert!(matches!(err, PackageError::ConfigurationInvalid(_)));
        assert!(out.is_empty());
        // A failed staging does not consume the single shot.
        assert!(!matches!(
            writer.write(&mut out).unwrap_err(),
            PackageError::AlreadyWritten
        ));
    }

    #[test]
    fn double_write_rejected_without_touching_output() {
        let mut writer = cheap_writer();
        writer.add_item(PayloadItem::binary("a", vec![1, 2, 3]).unwrap());

        let mut out1 = Vec::new();
        writer.write(&mut out1).unwrap();
        assert_eq!(writer.state(), WriterState::Closed);

        let mut out2 = Vec::new();
        assert!(matches!(
            writer.write(&mut out2),
            Err(PackageError::AlreadyWritten)
        ));
        assert!(out2.is_empty());
    }

    #[test]
    fn missing_bindings_aggregate() {
        let mut writer = cheap_writer();
        let a = PayloadItem::binary("a", vec![1]).unwrap();
        let b = PayloadItem::binary("b", vec![2]).unwrap();
        writer.add_item(PayloadItem::unbound(a.descriptor.clone()));
        writer.add_item(PayloadItem::unbound(b.descriptor.clone()));

        let mut out = Vec::new();
        match writer.write(&mut out) {
            Err(PackageError::StreamBindingAbsent { items }) => {
                assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected aggregate binding error, got {other:?}"),
        }
        assert!(out.is_empty());
    }

    #[test]
    fn keyless_item_rejected_before_io() {
        let mut writer = cheap_writer();
        let mut item = PayloadItem::binary("k", vec![1, 2]).unwrap();
        item.descriptor.cipher_key = None;
        item.descriptor.authentication_key = None;
        writer.add_item(item);

        let mut out = Vec::new();
        match writer.write(&mut out) {
            Err(PackageError::KeyMaterialMissing { items }) => {
                assert_eq!(items, vec!["k".to_string()]);
            }
            other => panic!("expected key material error, got {other:?}"),
        }
        assert!(out.is_empty());
    }

    #[test]
    fn package_starts_and_ends_with_magic() {
        let mut writer = cheap_writer();
        writer.add_item(PayloadItem::binary("m", vec![0u8; 64]).unwrap());
        let mut out = Vec::new();
        writer.write(&mut out).unwrap();

        assert_eq!(&out[..4], b"OCPK");
        assert_eq!(&out[out.len() - 4..], b"OCPK");
    }

    #[test]
    fn invalid_layout_rejected_at_configuration() {
        let mut writer = cheap_writer();
        assert!(writer
            .set_layout(PayloadLayout::Fabric {
                stripe_min: 1,
                stripe_max: 8
            })
            .is_err());
    }
}
