//! Constant-time operations over secret data.
//!
//! Every comparison against a tag, confirmation output, or derived key goes
//! through this module. Execution time depends only on the declared length,
//! never on the position of the first difference.

use subtle::ConstantTimeEq;

/// Constant-time comparison of byte slices.
///
/// Returns `true` if the slices are equal. Slices of different lengths
/// compare unequal without inspecting content.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Timing-safe tag verification.
///
/// Identical to [`ct_eq`] but kept out-of-line so the comparison cannot be
/// specialized away at call sites handling secret tags.
#[must_use]
#[inline(never)]
pub fn verify_tag(expected: &[u8], actual: &[u8]) -> bool {
    ct_eq(expected, actual)
}

/// Byte-wise XOR of `mask` into `target`.
///
/// Used for the length-field obfuscation in the package header.
///
/// # Panics
///
/// Panics if `mask` is shorter than `target`.
pub fn xor_in_place(target: &mut [u8], mask: &[u8]) {
    assert!(mask.len() >= target.len());
    for (t, m) in target.iter_mut().zip(mask) {
        *t ^= m;
    }
}
