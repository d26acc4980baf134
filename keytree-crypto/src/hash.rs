//! The 256-bit hash type and the canonical field hasher.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::base32;

pub const HASH_LEN: usize = 32;
pub const HASH_BITS: usize = 8 * HASH_LEN;

/// Opaque 256-bit hash.
///
/// Bits are indexed MSB-first within each byte, so bit 0 is the top bit of
/// byte 0. The all-zero hash is the distinguished empty value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const EMPTY: Hash = Hash([0u8; HASH_LEN]);

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        *self == Hash::EMPTY
    }

    /// Bit at `idx`, MSB-first within each byte. Returns 0 or 1.
    pub fn bit(&self, idx: usize) -> usize {
        ((self.0[idx / 8] >> (7 - idx % 8)) & 1) as usize
    }

    pub fn from_base32(s: &str) -> Result<Hash, base32::Base32Error> {
        let bytes = base32::decode(s)?;
        if bytes.len() != HASH_LEN {
            return Err(base32::Base32Error);
        }
        let mut h = [0u8; HASH_LEN];
        h.copy_from_slice(&bytes);
        Ok(Hash(h))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base32::encode(&self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = base32::Base32Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_base32(s)
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Hash::from_base32(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 hasher with the canonical keytree field encodings.
///
/// Strings are size-prefixed with a big-endian u64 length.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Hasher {
        Hasher { inner: Sha256::new() }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.inner.update(v.to_be_bytes());
    }

    pub fn write_bool(&mut self, b: bool) {
        self.inner.update([b as u8]);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.inner.update(s.as_bytes());
    }

    pub fn sum(self) -> Hash {
        Hash(self.inner.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of a string's UTF-8 bytes. Used for name hashing.
pub fn hash_string(s: &str) -> Hash {
    let mut h = Hasher::new();
    h.write(s.as_bytes());
    h.sum()
}

/// Combine two hashes into a parent hash.
///
/// The special case `combine(empty, empty) == empty` gives the trie the
/// property that any subtree without leaves hashes to the empty value.
pub fn combine(a: &Hash, b: &Hash) -> Hash {
    if a.is_empty() && b.is_empty() {
        return Hash::EMPTY;
    }

    let mut h = Hasher::new();
    h.write(a.as_bytes());
    h.write(b.as_bytes());
    h.sum()
}

/// Index of the first bit where `a` and `b` differ, or `HASH_BITS` if equal.
pub fn first_difference(a: &Hash, b: &Hash) -> usize {
    let mut idx = 0;
    while idx < HASH_BITS && a.bit(idx) == b.bit(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_order_is_msb_first() {
        let mut bytes = [0u8; HASH_LEN];
        bytes[0] = 0b1000_0000;
        bytes[1] = 0b0000_0001;
        let h = Hash(bytes);
        assert_eq!(h.bit(0), 1);
        assert_eq!(h.bit(1), 0);
        assert_eq!(h.bit(7), 0);
        assert_eq!(h.bit(15), 1);
    }

    #[test]
    fn combine_empty_absorbs() {
        assert_eq!(combine(&Hash::EMPTY, &Hash::EMPTY), Hash::EMPTY);
        let h = hash_string("x");
        assert_ne!(combine(&h, &Hash::EMPTY), Hash::EMPTY);
        assert_ne!(combine(&Hash::EMPTY, &h), Hash::EMPTY);
        assert_ne!(combine(&h, &Hash::EMPTY), combine(&Hash::EMPTY, &h));
    }

    #[test]
    fn first_difference_bounds() {
        let a = hash_string("a");
        assert_eq!(first_difference(&a, &a), HASH_BITS);
        let b = hash_string("b");
        let idx = first_difference(&a, &b);
        assert!(idx < HASH_BITS);
        assert_ne!(a.bit(idx), b.bit(idx));
        for i in 0..idx {
            assert_eq!(a.bit(i), b.bit(i));
        }
    }

    #[test]
    fn base32_round_trip() {
        let h = hash_string("round trip");
        let s = h.to_string();
        assert_eq!(s.len(), 52);
        assert_eq!(Hash::from_base32(&s).unwrap(), h);
    }

    #[test]
    fn serde_uses_base32_strings() {
        let h = hash_string("serde");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn hasher_strings_are_length_prefixed() {
        // "ab" + "c" must hash differently from "a" + "bc".
        let mut h1 = Hasher::new();
        h1.write_str("ab");
        h1.write_str("c");
        let mut h2 = Hasher::new();
        h2.write_str("a");
        h2.write_str("bc");
        assert_ne!(h1.sum(), h2.sum());
    }
}
