//! Key confirmation: proving knowledge of a pre-key without revealing it.
//!
//! The confirmation tag is a MAC over a fixed canonical challenge under the
//! pre-key, salted by a random value stored in the configuration. On read,
//! a keyring can be screened with one cheap MAC per candidate before any
//! expensive stretch runs against a wrong guess.

use crate::constant_time::verify_tag;
use crate::mac::{AuthConfig, MacStream};
use crate::registry::MacAlgorithm;
use crate::{CryptoError, PreKey};

/// Canonical challenge string every confirmation tag commits to.
pub const CONFIRMATION_CANON: &[u8] = b"obscurcore-v1-keyconfirm";

/// Fresh confirmation configuration: HMAC-SHA-256 over a random 32-byte
/// salt.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if salt generation fails.
pub fn fresh_config() -> Result<AuthConfig, CryptoError> {
    let mut config = AuthConfig::mac(MacAlgorithm::HmacSha256);
    config.salt = Some(crate::random::random_vec(32)?);
    Ok(config)
}

/// Compute the confirmation tag for `key` under `config`.
///
/// # Errors
///
/// Propagates MAC initialization failures.
pub fn generate(config: &AuthConfig, key: &PreKey) -> Result<Vec<u8>, CryptoError> {
    let mut mac = MacStream::new(config, key.as_bytes())?;
    if let Some(salt) = &config.salt {
        mac.update(salt);
    }
    mac.update(CONFIRMATION_CANON);
    mac.finalize()
}

/// Check `key` against a stored confirmation output. Constant-time.
///
/// # Errors
///
/// Propagates MAC initialization failures.
pub fn verify(config: &AuthConfig, key: &PreKey, expected: &[u8]) -> Result<bool, CryptoError> {
    let tag = generate(config, key)?;
    Ok(verify_tag(&tag, expected))
}

/// Screen a keyring: return the index of the first candidate whose
/// confirmation tag matches `expected`.
///
/// Candidates whose tag computation fails (wrong key shape for the
/// configured function) are skipped rather than aborting the screen.
#[must_use]
pub fn confirm_keyring(config: &AuthConfig, expected: &[u8], candidates: &[PreKey]) -> Option<usize> {
    candidates
        .iter()
        .position(|key| matches!(verify(config, key, expected), Ok(true)))
}
