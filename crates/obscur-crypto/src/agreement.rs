//! UM1 one-pass key agreement.
//!
//! A single-flow unified-model exchange over X25519: the initiator creates
//! an ephemeral key pair on the receiver's curve and hashes the static and
//! ephemeral Diffie-Hellman results together; the responder mirrors the
//! computation from the ephemeral public key. The initiator's output feeds
//! the manifest envelope as a high-entropy pre-key.
//!
//! Keys carry a curve-domain name; exchanging keys from different domains
//! fails with [`CryptoError::CurveMismatch`]. The Curve25519 family is not
//! interoperable with the NIST/Brainpool short-Weierstrass families and no
//! bridging is attempted.

use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{CryptoError, PreKey};

/// Curve-domain name for the X25519 family.
pub const CURVE_25519: &str = "Curve25519";

/// Domain separation label for the shared-secret hash.
const UM1_CONTEXT: &[u8] = b"obscurcore-v1-um1";

/// A UM1 public key bound to its curve domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Um1PublicKey {
    /// Curve-domain name
    pub curve: String,
    /// Encoded point
    pub key: [u8; 32],
}

/// A UM1 private key bound to its curve domain.
///
/// The underlying scalar wipes itself on drop.
pub struct Um1PrivateKey {
    curve: String,
    secret: x25519_dalek::StaticSecret,
}

/// Shared secret produced by the exchange; wiped on drop.
pub struct Um1SharedSecret(Zeroizing<[u8; 32]>);

impl Um1SharedSecret {
    /// Borrow the raw secret.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert into a pre-key for the manifest envelope.
    #[must_use]
    pub fn into_pre_key(self) -> PreKey {
        PreKey::new(self.0.to_vec())
    }
}

impl Um1PrivateKey {
    /// Generate a fresh key pair on Curve25519.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            curve: CURVE_25519.to_owned(),
            secret: x25519_dalek::StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Import a raw scalar (clamped per RFC 7748).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            curve: CURVE_25519.to_owned(),
            secret: x25519_dalek::StaticSecret::from(bytes),
        }
    }

    /// Derive the matching public key.
    #[must_use]
    pub fn public_key(&self) -> Um1PublicKey {
        Um1PublicKey {
            curve: self.curve.clone(),
            key: x25519_dalek::PublicKey::from(&self.secret).to_bytes(),
        }
    }

    fn agree(&self, peer: &Um1PublicKey) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        if self.curve != peer.curve {
            return Err(CryptoError::CurveMismatch {
                ours: self.curve.clone(),
                theirs: peer.curve.clone(),
            });
        }
        let shared = self
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer.key));
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::LowOrderPoint);
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

fn hash_shared(
    static_dh: &[u8; 32],
    ephemeral_dh: &[u8; 32],
) -> Um1SharedSecret {
    let mut hasher = blake3::Hasher::new();
    hasher.update(UM1_CONTEXT);
    hasher.update(static_dh);
    hasher.update(ephemeral_dh);
    Um1SharedSecret(Zeroizing::new(*hasher.finalize().as_bytes()))
}

/// Initiator side: produce `(ephemeral_public, shared_secret)`.
///
/// # Errors
///
/// Returns [`CryptoError::CurveMismatch`] when the keys live on different
/// curve domains and [`CryptoError::LowOrderPoint`] for degenerate peers.
pub fn initiate(
    receiver_public: &Um1PublicKey,
    sender_private: &Um1PrivateKey,
) -> Result<(Um1PublicKey, Um1SharedSecret), CryptoError> {
    let ephemeral = Um1PrivateKey {
        curve: receiver_public.curve.clone(),
        secret: x25519_dalek::StaticSecret::random_from_rng(OsRng),
    };
    let static_dh = sender_private.agree(receiver_public)?;
    let ephemeral_dh = ephemeral.agree(receiver_public)?;
    let shared = hash_shared(&static_dh, &ephemeral_dh);
    Ok((ephemeral.public_key(), shared))
}

/// Responder side: recover the shared secret from the ephemeral key.
///
/// # Errors
///
/// Returns [`CryptoError::CurveMismatch`] when any key lives on a
/// different curve domain and [`CryptoError::LowOrderPoint`] for
/// degenerate peers.
pub fn respond(
    sender_public: &Um1PublicKey,
    receiver_private: &Um1PrivateKey,
    ephemeral_public: &Um1PublicKey,
) -> Result<Um1SharedSecret, CryptoError> {
    let static_dh = receiver_private.agree(sender_public)?;
    let ephemeral_dh = receiver_private.agree(ephemeral_public)?;
    Ok(hash_shared(&static_dh, &ephemeral_dh))
}
