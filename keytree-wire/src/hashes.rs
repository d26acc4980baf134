//! Sparse codec for the 256 per-depth sibling hashes of a lookup proof.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use keytree_crypto::{Hash, HASH_BITS};

/// One sibling hash per trie depth.
///
/// Serialized as a JSON map from decimal depth to hash, with empty hashes
/// omitted; a proof touching a handful of depths stays small on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Hashes(Box<[Hash; HASH_BITS]>);

impl Hashes {
    pub fn new() -> Hashes {
        Hashes(Box::new([Hash::EMPTY; HASH_BITS]))
    }
}

impl Default for Hashes {
    fn default() -> Self {
        Hashes::new()
    }
}

impl Index<usize> for Hashes {
    type Output = Hash;

    fn index(&self, idx: usize) -> &Hash {
        &self.0[idx]
    }
}

impl IndexMut<usize> for Hashes {
    fn index_mut(&mut self, idx: usize) -> &mut Hash {
        &mut self.0[idx]
    }
}

impl fmt::Debug for Hashes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (i, h) in self.0.iter().enumerate() {
            if !h.is_empty() {
                map.entry(&i, h);
            }
        }
        map.finish()
    }
}

impl Serialize for Hashes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = BTreeMap::new();
        for (i, h) in self.0.iter().enumerate() {
            if !h.is_empty() {
                map.insert(i.to_string(), *h);
            }
        }
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hashes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, Hash>::deserialize(deserializer)?;
        let mut hashes = Hashes::new();
        for (key, value) in map {
            let idx: usize = key.parse().map_err(D::Error::custom)?;
            if idx >= HASH_BITS {
                return Err(D::Error::custom("depth index out of range"));
            }
            hashes[idx] = value;
        }
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keytree_crypto::hash_string;

    #[test]
    fn sparse_round_trip() {
        let mut hashes = Hashes::new();
        hashes[0] = hash_string("a");
        hashes[17] = hash_string("b");
        hashes[255] = hash_string("c");

        let json = serde_json::to_string(&hashes).unwrap();
        let back: Hashes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hashes);

        // Only the three occupied depths appear on the wire.
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn empty_serializes_to_empty_map() {
        assert_eq!(serde_json::to_string(&Hashes::new()).unwrap(), "{}");
    }

    #[test]
    fn rejects_out_of_range_depth() {
        let err = serde_json::from_str::<Hashes>(&format!(
            "{{\"256\":\"{}\"}}",
            hash_string("x")
        ));
        assert!(err.is_err());
    }
}
