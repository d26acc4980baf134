//! Wire entity shapes and their canonical hashes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use keytree_crypto::{combine, hash_string, Hash, Hasher, Signable};

/// A directory record: a name mapped to a set of named keys.
///
/// Records are append-only; a record is only ever superseded by a version
/// with a strictly greater timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, String>,
    pub timestamp: u64,
    pub in_recovery: bool,
}

impl Entry {
    /// Canonical hash: name, key count, then each key name/value in
    /// lexicographic order, then timestamp and the recovery flag.
    pub fn hash(&self) -> Hash {
        let mut h = Hasher::new();
        h.write_str(&self.name);

        h.write_u64(self.keys.len() as u64);
        for (name, value) in &self.keys {
            h.write_str(name);
            h.write_str(value);
        }

        h.write_u64(self.timestamp);
        h.write_bool(self.in_recovery);

        h.sum()
    }

    pub fn name_hash(&self) -> Hash {
        hash_string(&self.name)
    }

    pub fn to_leaf(&self) -> TrieLeaf {
        TrieLeaf {
            name_hash: self.name_hash(),
            entry_hash: self.hash(),
        }
    }
}

impl Signable for Entry {
    fn signing_type_name(&self) -> &'static str {
        "github.com/jellevandenhooff/keytree.Entry-0.4"
    }

    fn hash(&self) -> Hash {
        Entry::hash(self)
    }
}

/// An entry together with the signatures that authorize it.
///
/// Signature names are either the public key they validate against, or the
/// literal `"dkim"` or `"test"` for proofs of ownership.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignedEntry {
    pub entry: Entry,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: BTreeMap<String, String>,
}

/// A leaf of the trie: name hash and entry hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrieLeaf {
    pub name_hash: Hash,
    pub entry_hash: Hash,
}

impl TrieLeaf {
    pub fn hash(&self) -> Hash {
        combine(&self.name_hash, &self.entry_hash)
    }
}

/// A trie node as served to peers: exactly one of a leaf, a pair of child
/// hashes, or a pair of inline children (batched replies).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrieNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf: Option<TrieLeaf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_hashes: Option<[Hash; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<[Option<Box<TrieNode>>; 2]>,
}

impl TrieNode {
    /// Recompute the hash this node claims to have.
    ///
    /// For batched replies the children's hashes are recomputed recursively,
    /// so a verified parent hash covers the entire inline subtree.
    pub fn computed_hash(&self) -> Hash {
        if let Some(leaf) = &self.leaf {
            return leaf.hash();
        }
        if let Some(hashes) = &self.child_hashes {
            return combine(&hashes[0], &hashes[1]);
        }
        if let Some(children) = &self.children {
            let child = |i: usize| {
                children[i]
                    .as_ref()
                    .map(|c| c.computed_hash())
                    .unwrap_or(Hash::EMPTY)
            };
            return combine(&child(0), &child(1));
        }
        Hash::EMPTY
    }

    /// Structural validity: exactly one node kind must be present.
    pub fn check(&self) -> bool {
        let count = self.leaf.is_some() as usize
            + self.child_hashes.is_some() as usize
            + self.children.is_some() as usize;
        count == 1
    }
}

/// The root of a trie snapshot at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Root {
    pub root_hash: Hash,
    pub timestamp: u64,
}

impl Signable for Root {
    fn signing_type_name(&self) -> &'static str {
        "github.com/jellevandenhooff/keytree.Root-0.1"
    }

    fn hash(&self) -> Hash {
        let mut h = Hasher::new();
        h.write(self.root_hash.as_bytes());
        h.write_u64(self.timestamp);
        h.sum()
    }
}

/// A root signed by the server that published it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignedRoot {
    pub root: Root,
    pub signature: String,
}

/// A transition from one root to the next: inserting `updates` in order
/// into the old trie must yield exactly `new_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateBatch {
    #[serde(default)]
    pub updates: Vec<TrieLeaf>,
    pub new_root: SignedRoot,
}

/// Sparse Merkle lookup proof for one key.
///
/// `hashes` holds the sibling hash per depth (empties omitted on the wire);
/// `leaf_key` is the name hash of the leaf actually found on the path when
/// it differs from the looked-up key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrieLookup {
    #[serde(default)]
    pub hashes: crate::Hashes,
    pub leaf_key: Hash,
}

/// A lookup proof anchored to a signed root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignedTrieLookup {
    pub signed_root: SignedRoot,
    pub trie_lookup: TrieLookup,
}

/// Reply to a lookup: the entry plus a proof per known trie that agrees.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LookupReply {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signed_trie_lookups: BTreeMap<String, SignedTrieLookup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Entry>,
}

/// The statement a DKIM proof of ownership attests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DkimStatement {
    pub sender: String,
    pub token: String,
}

/// Status of an in-flight DKIM proof request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DkimStatus {
    #[serde(default)]
    pub proof: String,
    #[serde(default)]
    pub status: Vec<String>,
    pub expiration: u64,
}
