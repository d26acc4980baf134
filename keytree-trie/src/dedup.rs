//! Content-addressed, reference-counted interning of trie nodes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use keytree_crypto::Hash;

use crate::node::{Node, NodeRef};

struct DedupInfo {
    refs: usize,
    node: Arc<Node>,
}

/// A Dedup stores one canonical copy of every distinct trie node across all
/// in-memory tries. Every `add`/`find_and_add` must be balanced by exactly
/// one `remove`; entries are freed when their refcount reaches zero.
///
/// Because the stored pointer is unique per content hash, callers can decide
/// "have I already got this subtree" in O(1), and overlapping tries from
/// multiple peers share all common structure.
pub struct Dedup {
    nodes: Mutex<HashMap<Hash, DedupInfo>>,
}

impl Dedup {
    pub fn new() -> Dedup {
        Dedup {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    fn add_locked(
        nodes: &mut HashMap<Hash, DedupInfo>,
        node: &Arc<Node>,
        count: usize,
    ) -> Arc<Node> {
        let hash = node.hash();
        if let Some(info) = nodes.get_mut(&hash) {
            info.refs += count;
            return info.node.clone();
        }

        let left = node.children()[0]
            .as_ref()
            .map(|c| Self::add_locked(nodes, c, 1));
        let right = node.children()[1]
            .as_ref()
            .map(|c| Self::add_locked(nodes, c, 1));
        let children = [left, right];

        let same = |i: usize| match (&children[i], &node.children()[i]) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        let canonical = if same(0) && same(1) {
            node.clone()
        } else {
            Node::with_known_hash(children, node.leaf().copied(), hash)
        };

        nodes.insert(
            hash,
            DedupInfo {
                refs: count,
                node: canonical.clone(),
            },
        );
        canonical
    }

    fn remove_locked(nodes: &mut HashMap<Hash, DedupInfo>, node: &Arc<Node>) {
        let hash = node.hash();
        let Some(info) = nodes.get_mut(&hash) else {
            return;
        };
        info.refs -= 1;
        if info.refs == 0 {
            let stored = nodes.remove(&hash).map(|info| info.node);
            if let Some(stored) = stored {
                for child in stored.children().iter().flatten() {
                    Self::remove_locked(nodes, child);
                }
            }
        }
    }

    /// Intern a tree, contributing one reference to the root. Returns the
    /// canonical instance, which must be used in place of the input.
    pub fn add(&self, node: Option<&Arc<Node>>) -> NodeRef {
        self.add_many(node, 1)
    }

    /// Intern a tree, contributing `count` references to the root.
    pub fn add_many(&self, node: Option<&Arc<Node>>, count: usize) -> NodeRef {
        let node = node?;
        let mut nodes = self.nodes.lock().unwrap();
        Some(Self::add_locked(&mut nodes, node, count))
    }

    /// Intern a node whose children are already interned; the children's
    /// references are consumed by the parent. If the node is already present
    /// the duplicate children references are dropped.
    pub fn add_with_children_already_added(&self, node: Arc<Node>) -> Arc<Node> {
        let mut nodes = self.nodes.lock().unwrap();

        let hash = node.hash();
        if nodes.contains_key(&hash) {
            for child in node.children().iter().flatten() {
                Self::remove_locked(&mut nodes, child);
            }
            let info = nodes.get_mut(&hash).expect("entry checked above");
            info.refs += 1;
            return info.node.clone();
        }

        nodes.insert(
            hash,
            DedupInfo {
                refs: 1,
                node: node.clone(),
            },
        );
        node
    }

    /// The interned node for `hash`, with its refcount bumped.
    pub fn find_and_add(&self, hash: Hash) -> NodeRef {
        let mut nodes = self.nodes.lock().unwrap();
        let info = nodes.get_mut(&hash)?;
        info.refs += 1;
        Some(info.node.clone())
    }

    /// The interned node for `hash` without taking a reference. For
    /// on-demand read handlers that finish before the next remove.
    pub fn find_only(&self, hash: Hash) -> NodeRef {
        let nodes = self.nodes.lock().unwrap();
        nodes.get(&hash).map(|info| info.node.clone())
    }

    /// Drop one reference from the root, recursively freeing nodes whose
    /// count reaches zero.
    pub fn remove(&self, node: Option<&Arc<Node>>) {
        let Some(node) = node else {
            return;
        };
        let mut nodes = self.nodes.lock().unwrap();
        Self::remove_locked(&mut nodes, node);
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Dedup::new()
    }
}
