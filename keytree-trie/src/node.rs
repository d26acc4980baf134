//! Trie nodes and the core operations.
//!
//! An absent subtree is `None`; every function treats `None` as the empty
//! trie, so the operations live on `NodeRef` rather than on `Node` alone.

use std::sync::{Arc, OnceLock};

use keytree_crypto::{combine, first_difference, Hash};
use keytree_wire::{TrieLeaf, TrieLookup};

/// A possibly-empty reference to an immutable subtree.
pub type NodeRef = Option<Arc<Node>>;

/// An immutable trie node: either a leaf or an internal node with two
/// possibly-empty children. Subtrees are shared, never mutated; updates
/// rebuild the root-to-leaf path only.
pub struct Node {
    children: [NodeRef; 2],
    leaf: Option<TrieLeaf>,
    hash: OnceLock<Hash>,
}

impl Node {
    pub fn new_leaf(leaf: TrieLeaf) -> Arc<Node> {
        Arc::new(Node {
            children: [None, None],
            leaf: Some(leaf),
            hash: OnceLock::new(),
        })
    }

    pub fn new_internal(children: [NodeRef; 2]) -> Arc<Node> {
        Arc::new(Node {
            children,
            leaf: None,
            hash: OnceLock::new(),
        })
    }

    /// Rebuild a node whose hash is already known, preserving the cache.
    pub(crate) fn with_known_hash(
        children: [NodeRef; 2],
        leaf: Option<TrieLeaf>,
        hash: Hash,
    ) -> Arc<Node> {
        let cell = OnceLock::new();
        let _ = cell.set(hash);
        Arc::new(Node {
            children,
            leaf,
            hash: cell,
        })
    }

    pub fn leaf(&self) -> Option<&TrieLeaf> {
        self.leaf.as_ref()
    }

    pub fn children(&self) -> &[NodeRef; 2] {
        &self.children
    }

    /// The Merkle hash, computed on first use and cached.
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| match &self.leaf {
            Some(leaf) => leaf.hash(),
            None => combine(
                &hash_of(self.children[0].as_ref()),
                &hash_of(self.children[1].as_ref()),
            ),
        })
    }
}

/// Hash of a possibly-empty subtree.
pub fn hash_of(node: Option<&Arc<Node>>) -> Hash {
    node.map(|n| n.hash()).unwrap_or(Hash::EMPTY)
}

/// Collapse a pair of children into a node.
///
/// Both empty yields empty; a lone leaf child floats up (path compression);
/// anything else becomes an internal node.
pub fn merge(children: [NodeRef; 2]) -> NodeRef {
    match (&children[0], &children[1]) {
        (None, None) => None,
        (None, Some(right)) if right.leaf().is_some() => children[1].clone(),
        (Some(left), None) if left.leaf().is_some() => children[0].clone(),
        _ => Some(Node::new_internal(children)),
    }
}

/// The two notional children of a subtree at `depth`.
///
/// A leaf moves into the child selected by bit `depth` of its name hash.
pub fn split(node: Option<&Arc<Node>>, depth: usize) -> [NodeRef; 2] {
    match node {
        None => [None, None],
        Some(n) => match n.leaf() {
            Some(leaf) => {
                let mut children: [NodeRef; 2] = [None, None];
                children[leaf.name_hash.bit(depth)] = Some(n.clone());
                children
            }
            None => n.children().clone(),
        },
    }
}

fn get_at<'a>(node: Option<&'a Arc<Node>>, key: &Hash, idx: usize) -> Option<&'a TrieLeaf> {
    let n = node?;
    if let Some(leaf) = n.leaf() {
        return if leaf.name_hash == *key { Some(leaf) } else { None };
    }
    get_at(n.children()[key.bit(idx)].as_ref(), key, idx + 1)
}

/// The leaf stored under `key`, if present.
pub fn get<'a>(node: Option<&'a Arc<Node>>, key: &Hash) -> Option<&'a TrieLeaf> {
    get_at(node, key, 0)
}

fn set_at(node: Option<&Arc<Node>>, key: &Hash, idx: usize, value: Option<TrieLeaf>) -> NodeRef {
    let replace_here = match node {
        None => true,
        Some(n) => matches!(n.leaf(), Some(leaf) if leaf.name_hash == *key),
    };
    if replace_here {
        return value.map(Node::new_leaf);
    }

    let mut children = split(node, idx);
    let bit = key.bit(idx);
    children[bit] = set_at(children[bit].as_ref(), key, idx + 1, value);
    merge(children)
}

/// Insert, replace, or delete the leaf for `key`, returning the new root.
///
/// Inserting next to a different leaf splits at the first differing bit of
/// the two name hashes; deleting a missing key returns the input unchanged.
pub fn set(node: Option<&Arc<Node>>, key: &Hash, value: Option<TrieLeaf>) -> NodeRef {
    set_at(node, key, 0, value)
}

fn lookup_at(
    node: Option<&Arc<Node>>,
    key: &Hash,
    idx: usize,
    proof: &mut TrieLookup,
) -> Option<TrieLeaf> {
    let n = node?;

    if let Some(leaf) = n.leaf() {
        if leaf.name_hash == *key {
            return Some(*leaf);
        }
        proof.leaf_key = leaf.name_hash;
        proof.hashes[first_difference(&leaf.name_hash, key)] = leaf.entry_hash;
        return None;
    }

    let bit = key.bit(idx);
    let other = n.children()[1 - bit].as_ref();
    proof.hashes[idx] = hash_of(other);

    let result = lookup_at(n.children()[bit].as_ref(), key, idx + 1, proof);

    // The key's path ended without meeting a leaf; if the sibling here is a
    // leaf, record it so the proof stays verifiable under path compression.
    if proof.leaf_key == *key {
        if let Some(other_leaf) = other.and_then(|o| o.leaf()) {
            proof.leaf_key = other_leaf.name_hash;
            proof.hashes[idx] = other_leaf.entry_hash;
        }
    }

    result
}

/// Produce a lookup proof for `key` along with the leaf, if any.
///
/// The proof records the sibling hash at every depth on the path; when a
/// different leaf occupies the key's position, its name hash is recorded as
/// `leaf_key` with its entry hash at the first differing bit.
pub fn lookup(node: Option<&Arc<Node>>, key: &Hash) -> (TrieLookup, Option<TrieLeaf>) {
    let mut proof = TrieLookup {
        hashes: Default::default(),
        leaf_key: *key,
    };
    let leaf = lookup_at(node, key, 0, &mut proof);
    (proof, leaf)
}

fn leftmost_leaf(node: Option<&Arc<Node>>) -> Option<TrieLeaf> {
    let n = node?;
    if let Some(leaf) = n.leaf() {
        return Some(*leaf);
    }
    leftmost_leaf(n.children()[0].as_ref()).or_else(|| leftmost_leaf(n.children()[1].as_ref()))
}

fn next_leaf_at(node: Option<&Arc<Node>>, key: &Hash, idx: usize) -> Option<TrieLeaf> {
    let n = node?;

    if let Some(leaf) = n.leaf() {
        return if *key < leaf.name_hash { Some(*leaf) } else { None };
    }

    if key.bit(idx) == 0 {
        next_leaf_at(n.children()[0].as_ref(), key, idx + 1)
            .or_else(|| leftmost_leaf(n.children()[1].as_ref()))
    } else {
        next_leaf_at(n.children()[1].as_ref(), key, idx + 1)
    }
}

/// The leaf with the smallest name hash strictly greater than `key`.
pub fn next_leaf(node: Option<&Arc<Node>>, key: &Hash) -> Option<TrieLeaf> {
    next_leaf_at(node, key, 0)
}

/// Total node count of a subtree, leaves included.
pub fn node_count(node: Option<&Arc<Node>>) -> usize {
    match node {
        None => 0,
        Some(n) => {
            1 + node_count(n.children()[0].as_ref()) + node_count(n.children()[1].as_ref())
        }
    }
}

/// Leaf count of a subtree.
pub fn leaf_count(node: Option<&Arc<Node>>) -> usize {
    match node {
        None => 0,
        Some(n) => {
            if n.leaf().is_some() {
                1
            } else {
                leaf_count(n.children()[0].as_ref()) + leaf_count(n.children()[1].as_ref())
            }
        }
    }
}
