//! Root recomputation from a lookup proof.

use keytree_crypto::{combine, first_difference, Hash, HASH_BITS};
use keytree_wire::TrieLookup;

/// Recompute the root hash a lookup proof commits to, assuming `key` maps to
/// `value` (`empty` for absence).
///
/// Folds the recorded sibling hashes from the deepest bit up to the root. At
/// the first bit where `key` and the proof's `leaf_key` diverge, the other
/// leaf is reconstituted and folded in; empty siblings below a lone leaf are
/// skipped, mirroring path compression.
pub fn complete_lookup(proof: &TrieLookup, key: &Hash, value: &Hash) -> Hash {
    let (mut current, mut is_leaf) = if value.is_empty() {
        (Hash::EMPTY, false)
    } else {
        (combine(key, value), true)
    };

    let leaf_idx = first_difference(key, &proof.leaf_key);

    for i in (0..HASH_BITS).rev() {
        let mut h = proof.hashes[i];

        if i == leaf_idx {
            h = combine(&proof.leaf_key, &h);

            if current.is_empty() {
                current = h;
                is_leaf = true;
                continue;
            }
        }

        if h.is_empty() && is_leaf {
            continue;
        }

        current = if key.bit(i) == 0 {
            combine(&current, &h)
        } else {
            combine(&h, &current)
        };
        is_leaf = false;
    }

    current
}
