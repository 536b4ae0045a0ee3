//! Package reader state machine.
//!
//! The reader walks `Fresh → HeaderRead → ManifestDecrypted →
//! PayloadDemuxing → Verified`; any verification failure short-circuits to
//! `Failed` and the instance is spent. Construction parses the plaintext
//! header, so a caller can inspect the crypto scheme and screen a keyring
//! before committing to the expensive key derivation.
//!
//! Demultiplexing replays the writer's decision sequence from the
//! deserialized payload configuration. Item ciphertext is buffered and
//! every tag verified before a single plaintext byte is produced.

use std::io::Read;

use obscur_crypto::agreement::{self, Um1PrivateKey, Um1PublicKey};
use obscur_crypto::confirm;
use obscur_crypto::random::StreamCsprng;
use obscur_crypto::stream::AuthenticatedDecryptor;
use obscur_crypto::PreKey;

use crate::envelope;
use crate::error::PackageError;
use crate::item::{resolve_item_keys, UnpackedItem};
use crate::manifest::{Manifest, ManifestCryptoConfig, ManifestHeader, PayloadItemKind};
use crate::mux::{Multiplexer, MuxStep};
use crate::wire;
use crate::{FORMAT_VERSION, MAX_MANIFEST_LEN};

/// Reader state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Constructed but header not yet parsed
    Fresh,
    /// Header and crypto descriptor parsed
    HeaderRead,
    /// Manifest verified and decrypted
    ManifestDecrypted,
    /// Payload demultiplexing in progress
    PayloadDemuxing,
    /// All items recovered and verified
    Verified,
    /// Instance closed
    Closed,
    /// A verification step failed; the instance is spent
    Failed,
}

/// Package reader over a sequential input stream.
pub struct PackageReader<R: Read> {
    input: R,
    state: ReaderState,
    header: ManifestHeader,
    crypto_config: ManifestCryptoConfig,
    pre_key: Option<PreKey>,
    manifest: Option<Manifest>,
}

impl<R: Read> PackageReader<R> {
    /// Open a package: parse the magic and the plaintext header.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::FormatMalformed`] for bad magic, an
    /// unsupported version, oversized length fields or a scheme-name
    /// mismatch.
    pub fn new(mut input: R) -> Result<Self, PackageError> {
        wire::read_magic(&mut input, "header")?;
        let header_len = wire::read_varint(&mut input)?;
        if header_len > u64::from(MAX_MANIFEST_LEN) {
            return Err(PackageError::FormatMalformed(
                "header length out of range".into(),
            ));
        }
        let header_bytes = wire::read_exact_vec(&mut input, header_len as usize)?;
        let header = ManifestHeader::from_bytes(&header_bytes)?;
        if header.format_version != FORMAT_VERSION {
            return Err(PackageError::FormatMalformed(format!(
                "unsupported format version {}",
                header.format_version
            )));
        }
        let crypto_config = ManifestCryptoConfig::from_bytes(&header.crypto_config)?;
        if header.scheme_name != crypto_config.scheme_name() {
            return Err(PackageError::FormatMalformed(format!(
                "scheme name {} does not match crypto config {}",
                header.scheme_name,
                crypto_config.scheme_name()
            )));
        }
        tracing::debug!(scheme = %header.scheme_name, "package header read");
        Ok(Self {
            input,
            state: ReaderState::HeaderRead,
            header,
            crypto_config,
            pre_key: None,
            manifest: None,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The parsed header.
    #[must_use]
    pub fn header(&self) -> &ManifestHeader {
        &self.header
    }

    /// The parsed crypto descriptor.
    #[must_use]
    pub fn crypto_config(&self) -> &ManifestCryptoConfig {
        &self.crypto_config
    }

    /// Screen a keyring against the stored confirmation record: one cheap
    /// MAC per candidate, no stretching. Returns the index of the
    /// confirmed pre-key, or `None` when no record is stored or no
    /// candidate matches.
    #[must_use]
    pub fn screen_keyring(&self, candidates: &[PreKey]) -> Option<usize> {
        let symmetric = self.crypto_config.symmetric();
        let confirmation = symmetric.key_confirmation.as_ref()?;
        let expected = symmetric.key_confirmation_output.as_ref()?;
        confirm::confirm_keyring(confirmation, expected, candidates)
    }

    /// Derive working keys from `pre_key`, then read, verify and decrypt
    /// the manifest body.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::KeyConfirmationFailed`] when the candidate
    /// fails the stored confirmation, [`PackageError::AuthenticationFailed`]
    /// on tag mismatch, and [`PackageError::FormatMalformed`] for length
    /// fields out of range. All failures move the reader to
    /// [`ReaderState::Failed`].
    pub fn decrypt_manifest(&mut self, pre_key: PreKey) -> Result<&Manifest, PackageError> {
        if self.state != ReaderState::HeaderRead {
            return Err(PackageError::InvalidState(
                "manifest decryption requires HeaderRead",
            ));
        }
        match self.decrypt_manifest_inner(pre_key) {
            Ok(()) => {
                self.state = ReaderState::ManifestDecrypted;
                Ok(self.manifest.as_ref().expect("stored by inner"))
            }
            Err(e) => {
                self.state = ReaderState::Failed;
                Err(e)
            }
        }
    }

    fn decrypt_manifest_inner(&mut self, pre_key: PreKey) -> Result<(), PackageError> {
        let keys = envelope::derive_keys(&self.crypto_config, &pre_key)?;

        let mut obf_length = [0u8; 4];
        self.input.read_exact(&mut obf_length)?;
        obscur_crypto::constant_time::xor_in_place(&mut obf_length, &keys.mac_key_prefix);
        let body_len = u32::from_le_bytes(obf_length);
        if body_len > MAX_MANIFEST_LEN {
            return Err(PackageError::FormatMalformed(
                "manifest length out of range".into(),
            ));
        }

        let ciphertext = wire::read_exact_vec(&mut self.input, body_len as usize)?;
        let manifest_bytes = envelope::open(&self.crypto_config, &keys, &ciphertext)?;
        let manifest = Manifest::from_bytes(&manifest_bytes)?;
        manifest.payload.layout.validate()?;
        tracing::debug!(items = manifest.items.len(), "manifest decrypted");

        self.manifest = Some(manifest);
        self.pre_key = Some(pre_key);
        Ok(())
    }

    /// UM1 path: recover the pre-key from the recorded ephemeral public
    /// key and the receiver's private key, then decrypt the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::ConfigurationInvalid`] when the package is
    /// not UM1-keyed, plus everything [`Self::decrypt_manifest`] returns.
    pub fn decrypt_manifest_um1(
        &mut self,
        sender_public: &Um1PublicKey,
        receiver_private: &Um1PrivateKey,
    ) -> Result<&Manifest, PackageError> {
        let ephemeral = match &self.crypto_config {
            ManifestCryptoConfig::Um1Hybrid {
                ephemeral_public_key,
                ..
            } => ephemeral_public_key.clone(),
            ManifestCryptoConfig::SymmetricOnly(_) => {
                return Err(PackageError::ConfigurationInvalid(
                    "package is not UM1-keyed".into(),
                ))
            }
        };
        let shared = agreement::respond(sender_public, receiver_private, &ephemeral)?;
        self.decrypt_manifest(shared.into_pre_key())
    }

    /// Demultiplex the payload, verify every item tag and the trailer,
    /// and return the recovered items.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::PayloadTruncated`] when the input ends
    /// before an item's declared length, [`PackageError::AuthenticationFailed`]
    /// on any tag mismatch, and [`PackageError::FormatMalformed`] for a
    /// bad trailer. All failures move the reader to [`ReaderState::Failed`].
    pub fn unpack(&mut self) -> Result<Vec<UnpackedItem>, PackageError> {
        if self.state != ReaderState::ManifestDecrypted {
            return Err(PackageError::InvalidState(
                "unpack requires ManifestDecrypted",
            ));
        }
        self.state = ReaderState::PayloadDemuxing;
        match self.unpack_inner() {
            Ok(items) => {
                self.state = ReaderState::Verified;
                if let Some(mut key) = self.pre_key.take() {
                    key.erase();
                }
                Ok(items)
            }
            Err(e) => {
                self.state = ReaderState::Failed;
                Err(e)
            }
        }
    }

    fn unpack_inner(&mut self) -> Result<Vec<UnpackedItem>, PackageError> {
        let manifest = self.manifest.take().expect("set on manifest decryption");
        let lengths: Vec<u64> = manifest.items.iter().map(|i| i.internal_length).collect();
        let csprng = StreamCsprng::new(&manifest.payload.csprng)?;
        let mut mux = Multiplexer::new(manifest.payload.layout, &lengths, csprng);

        // Replay the writer's decision sequence over the payload bytes.
        let mut buffers: Vec<Vec<u8>> = lengths
            .iter()
            .map(|&len| Vec::with_capacity(len as usize))
            .collect();
        while let Some(step) = mux.next_step() {
            match step {
                MuxStep::Item { index, len } => {
                    let start = buffers[index].len();
                    buffers[index].resize(start + len, 0);
                    if let Err(e) = self.input.read_exact(&mut buffers[index][start..]) {
                        return Err(truncation_error(e, &manifest, index, start as u64));
                    }
                }
                MuxStep::Padding(expected) => {
                    let mut pad = vec![0u8; expected.len()];
                    self.input.read_exact(&mut pad).map_err(|e| {
                        if e.kind() == std::io::ErrorKind::UnexpectedEof {
                            PackageError::FormatMalformed("payload ends inside padding".into())
                        } else {
                            PackageError::Io(e)
                        }
                    })?;
                }
            }
        }
        wire::read_magic(&mut self.input, "trailer")?;
        tracing::debug!("payload demultiplexed");

        let pre_key = self.pre_key.as_ref();
        let mut items = Vec::with_capacity(manifest.items.len());
        for (descriptor, ciphertext) in manifest.items.into_iter().zip(buffers) {
            if let (Some(confirmation), Some(expected), Some(key)) = (
                &descriptor.key_confirmation,
                &descriptor.key_confirmation_output,
                pre_key,
            ) {
                if !confirm::verify(confirmation, key, expected)? {
                    return Err(PackageError::KeyConfirmationFailed);
                }
            }

            let keys = resolve_item_keys(&descriptor, pre_key)?;
            let auth = descriptor
                .authentication
                .as_ref()
                .zip(keys.mac_key.as_ref())
                .map(|(a, k)| (a, k.as_slice()));
            let mut decryptor =
                AuthenticatedDecryptor::new(&descriptor.cipher, &keys.cipher_key, auth)?;
            decryptor.update(&ciphertext);

            let aad = descriptor.authenticatable_bytes()?;
            let data = decryptor
                .finalize(&aad, &descriptor.authentication_tag)
                .map_err(|e| PackageError::from(e).normalized())?;

            if data.len() as u64 != descriptor.external_length {
                return Err(PackageError::PayloadTruncated {
                    path: descriptor.path.clone(),
                    expected: descriptor.external_length,
                    actual: data.len() as u64,
                });
            }
            if descriptor.kind == PayloadItemKind::Utf8 && std::str::from_utf8(&data).is_err() {
                return Err(PackageError::FormatMalformed(format!(
                    "item {} is not valid UTF-8",
                    descriptor.path
                )));
            }

            tracing::debug!(path = %descriptor.path, bytes = data.len(), "item verified");
            items.push(UnpackedItem { descriptor, data });
        }
        Ok(items)
    }

    /// Consume the reader.
    pub fn close(mut self) {
        self.state = ReaderState::Closed;
    }
}

fn truncation_error(
    e: std::io::Error,
    manifest: &Manifest,
    index: usize,
    recovered: u64,
) -> PackageError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        let descriptor = &manifest.items[index];
        PackageError::PayloadTruncated {
            path: descriptor.path.clone(),
            expected: descriptor.internal_length,
            actual: recovered,
        }
    } else {
        PackageError::Io(e)
    }
}
