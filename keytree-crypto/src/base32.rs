//! Canonical base32 with the keytree alphabet.
//!
//! The alphabet drops the following letters:
//! i - can be confused with 1, j
//! l - can be confused with 1
//! o - can be confused with 0
//! u - can be confused with v

use data_encoding::{Encoding, Specification};
use once_cell::sync::Lazy;
use thiserror::Error;

const KEYTREE_ALPHABET: &str = "0123456789abcdefghjkmnpqrstvwxyz";

static KEYTREE_ENCODING: Lazy<Encoding> = Lazy::new(|| {
    let mut spec = Specification::new();
    spec.symbols.push_str(KEYTREE_ALPHABET);
    spec.encoding().expect("keytree base32 specification is valid")
});

/// Base32 decoding error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("uncanonical base32 input")]
pub struct Base32Error;

/// Encode bytes as unpadded keytree base32.
pub fn encode(src: &[u8]) -> String {
    KEYTREE_ENCODING.encode(src)
}

/// Decode a keytree base32 string.
///
/// Strict: any input that would not re-encode to the same string (wrong
/// alphabet, padding, or non-zero trailing bits) is rejected.
pub fn decode(s: &str) -> Result<Vec<u8>, Base32Error> {
    KEYTREE_ENCODING.decode(s.as_bytes()).map_err(|_| Base32Error)
}
