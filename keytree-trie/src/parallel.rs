//! Bounded-fanout parallel warm-up of cached hashes.

use std::sync::Arc;

use keytree_crypto::Hash;

use crate::node::Node;

/// Compute the root hash, hashing up to `m` subtrees on separate threads
/// first so the serial pass over a freshly built trie completes quickly.
pub fn parallel_hash(node: Option<&Arc<Node>>, m: usize) -> Hash {
    let Some(root) = node else {
        return Hash::EMPTY;
    };

    let mut work: Vec<&Arc<Node>> = vec![root];
    while work.len() < m {
        let front = work[0];
        let [Some(left), Some(right)] = front.children() else {
            break;
        };
        work.remove(0);
        work.push(left);
        work.push(right);
    }

    std::thread::scope(|scope| {
        for &subtree in &work {
            scope.spawn(move || {
                subtree.hash();
            });
        }
    });

    root.hash()
}
