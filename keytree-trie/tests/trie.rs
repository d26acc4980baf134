//! Trie behavior tests: determinism, proofs, pagination, and dedup
//! conservation.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use keytree_crypto::{combine, first_difference, hash_string, Hash};
use keytree_trie::{
    complete_lookup, get, hash_of, leaf_count, lookup, next_leaf, parallel_hash, set, Dedup,
    Node, NodeRef,
};
use keytree_wire::{Entry, TrieLeaf};

fn make_entries(n: usize, rng: &mut StdRng) -> Vec<Entry> {
    (0..n)
        .map(|_| Entry {
            name: format!("{}", rng.gen::<i64>()),
            ..Default::default()
        })
        .collect()
}

fn check_lookup(root: Option<&Arc<Node>>, key: &Hash, expected: Option<&Entry>, other: &Entry) {
    let expected_leaf = expected.map(|e| e.to_leaf());
    assert_eq!(get(root, key).copied(), expected_leaf);

    let (proof, found) = lookup(root, key);
    assert_eq!(found, expected_leaf);

    let value = expected.map(|e| e.hash()).unwrap_or(Hash::EMPTY);
    assert_eq!(complete_lookup(&proof, key, &value), hash_of(root));

    // The same proof also commits to what the root becomes if the key is
    // changed to `other` (or removed).
    let other_leaf = if expected.is_some() {
        None
    } else {
        Some(other.to_leaf())
    };
    let other_value = other_leaf.map(|l| l.entry_hash).unwrap_or(Hash::EMPTY);
    let adjusted = set(root, key, other_leaf);
    assert_eq!(
        complete_lookup(&proof, key, &other_value),
        hash_of(adjusted.as_ref())
    );
}

#[test]
fn stress_trie_randomly() {
    let mut rng = StdRng::seed_from_u64(42);
    let entries = make_entries(100, &mut rng);

    let mut root: NodeRef = None;
    let mut reference: HashMap<Hash, Entry> = HashMap::new();

    for step in 0..1000 {
        let entry = &entries[rng.gen_range(0..entries.len())];
        if rng.gen_bool(0.5) {
            root = set(root.as_ref(), &entry.name_hash(), Some(entry.to_leaf()));
            reference.insert(entry.name_hash(), entry.clone());
        } else {
            root = set(root.as_ref(), &entry.name_hash(), None);
            reference.remove(&entry.name_hash());
        }

        if step % 100 == 0 {
            // Rebuilding from scratch in arbitrary order gives the same hash.
            let mut rebuilt: NodeRef = None;
            for (key, entry) in &reference {
                rebuilt = set(rebuilt.as_ref(), key, Some(entry.to_leaf()));
            }
            assert_eq!(hash_of(root.as_ref()), hash_of(rebuilt.as_ref()));
        }

        let probe = &entries[rng.gen_range(0..entries.len())];
        let key = probe.name_hash();
        check_lookup(root.as_ref(), &key, reference.get(&key), probe);
    }
}

#[test]
fn insertion_order_independence() {
    let mut rng = StdRng::seed_from_u64(7);
    let entries = make_entries(100, &mut rng);

    let mut forward: NodeRef = None;
    for e in &entries {
        forward = set(forward.as_ref(), &e.name_hash(), Some(e.to_leaf()));
    }
    let mut reverse: NodeRef = None;
    for e in entries.iter().rev() {
        reverse = set(reverse.as_ref(), &e.name_hash(), Some(e.to_leaf()));
    }

    assert_eq!(hash_of(forward.as_ref()), hash_of(reverse.as_ref()));
    assert_eq!(leaf_count(forward.as_ref()), entries.len());
}

#[test]
fn empty_trie_lookup() {
    let key = hash_string("alice@x");
    let (proof, found) = lookup(None, &key);
    assert!(found.is_none());
    assert_eq!(proof.leaf_key, key);
    assert_eq!(serde_json::to_string(&proof.hashes).unwrap(), "{}");
    assert_eq!(complete_lookup(&proof, &key, &Hash::EMPTY), Hash::EMPTY);
}

#[test]
fn single_leaf_root() {
    let entry = Entry {
        name: "email:a@x".to_owned(),
        timestamp: 1000,
        ..Default::default()
    };
    let key = entry.name_hash();
    let root = set(None, &key, Some(entry.to_leaf()));

    assert_eq!(hash_of(root.as_ref()), combine(&key, &entry.hash()));
    assert_eq!(get(root.as_ref(), &key).copied(), Some(entry.to_leaf()));

    let absent = hash_string("bob@x");
    let (proof, found) = lookup(root.as_ref(), &absent);
    assert!(found.is_none());
    assert_eq!(proof.leaf_key, key);
    assert_eq!(proof.hashes[first_difference(&absent, &key)], entry.hash());
    assert_eq!(
        complete_lookup(&proof, &absent, &Hash::EMPTY),
        hash_of(root.as_ref())
    );
}

#[test]
fn delete_miss_returns_input_unchanged() {
    let entry = Entry {
        name: "email:a@x".to_owned(),
        ..Default::default()
    };
    let root = set(None, &entry.name_hash(), Some(entry.to_leaf()));
    let after = set(root.as_ref(), &hash_string("absent"), None);
    assert!(Arc::ptr_eq(root.as_ref().unwrap(), after.as_ref().unwrap()));
}

#[test]
fn delete_to_empty() {
    let entry = Entry {
        name: "email:a@x".to_owned(),
        ..Default::default()
    };
    let key = entry.name_hash();
    let root = set(None, &key, Some(entry.to_leaf()));
    assert!(set(root.as_ref(), &key, None).is_none());
}

#[test]
fn next_leaf_walks_in_name_hash_order() {
    let mut rng = StdRng::seed_from_u64(3);
    let entries = make_entries(50, &mut rng);

    let mut root: NodeRef = None;
    for e in &entries {
        root = set(root.as_ref(), &e.name_hash(), Some(e.to_leaf()));
    }

    let mut sorted: Vec<Hash> = entries.iter().map(|e| e.name_hash()).collect();
    sorted.sort();
    sorted.dedup();

    let mut walked = Vec::new();
    let mut cursor = Hash::EMPTY;
    while let Some(leaf) = next_leaf(root.as_ref(), &cursor) {
        walked.push(leaf.name_hash);
        cursor = leaf.name_hash;
    }
    assert_eq!(walked, sorted);
}

#[test]
fn parallel_hash_matches_serial() {
    let mut rng = StdRng::seed_from_u64(11);
    let entries = make_entries(200, &mut rng);

    let mut root: NodeRef = None;
    for e in &entries {
        root = set(root.as_ref(), &e.name_hash(), Some(e.to_leaf()));
    }

    assert_eq!(parallel_hash(root.as_ref(), 8), hash_of(root.as_ref()));
    assert_eq!(parallel_hash(None, 8), Hash::EMPTY);
}

fn leaf(n: u64) -> TrieLeaf {
    TrieLeaf {
        name_hash: hash_string(&format!("name-{}", n)),
        entry_hash: hash_string(&format!("entry-{}", n)),
    }
}

#[test]
fn dedup_balanced_add_remove_conserves_nothing() {
    let dedup = Dedup::new();

    let mut root: NodeRef = None;
    for i in 0..64 {
        let l = leaf(i);
        root = set(root.as_ref(), &l.name_hash, Some(l));
    }

    let interned = dedup.add(root.as_ref());
    assert!(dedup.num_nodes() > 0);

    let again = dedup.add(interned.as_ref());
    assert!(Arc::ptr_eq(again.as_ref().unwrap(), interned.as_ref().unwrap()));

    dedup.remove(interned.as_ref());
    assert!(dedup.num_nodes() > 0);
    dedup.remove(interned.as_ref());
    assert_eq!(dedup.num_nodes(), 0);
}

#[test]
fn dedup_shares_overlapping_tries() {
    let dedup = Dedup::new();

    let mut a: NodeRef = None;
    for i in 0..64 {
        let l = leaf(i);
        a = set(a.as_ref(), &l.name_hash, Some(l));
    }
    // b differs from a in a single leaf.
    let extra = leaf(1000);
    let b = set(a.as_ref(), &extra.name_hash, Some(extra));

    let a = dedup.add(a.as_ref());
    let nodes_a = dedup.num_nodes();
    let b = dedup.add(b.as_ref());
    let nodes_both = dedup.num_nodes();

    // The overlap is shared: adding b costs far less than a whole trie.
    assert!(nodes_both - nodes_a < nodes_a / 2);

    dedup.remove(b.as_ref());
    assert_eq!(dedup.num_nodes(), nodes_a);
    dedup.remove(a.as_ref());
    assert_eq!(dedup.num_nodes(), 0);
}

#[test]
fn dedup_find_and_add_takes_a_reference() {
    let dedup = Dedup::new();
    let l = leaf(1);
    let root = set(None, &l.name_hash, Some(l));
    let interned = dedup.add(root.as_ref()).unwrap();
    let hash = interned.hash();

    let found = dedup.find_and_add(hash).unwrap();
    assert!(Arc::ptr_eq(&found, &interned));
    assert!(dedup.find_only(hash).is_some());

    dedup.remove(Some(&interned));
    assert!(dedup.find_only(hash).is_some());
    dedup.remove(Some(&interned));
    assert!(dedup.find_only(hash).is_none());
    assert_eq!(dedup.num_nodes(), 0);
}

#[test]
fn dedup_add_with_children_already_added() {
    let dedup = Dedup::new();

    // Pick two leaves that split at the root.
    let l0 = leaf(1);
    let l1 = (2..)
        .map(leaf)
        .find(|l| l.name_hash.bit(0) != l0.name_hash.bit(0))
        .unwrap();
    let c0 = dedup.add_with_children_already_added(Node::new_leaf(l0));
    let c1 = dedup.add_with_children_already_added(Node::new_leaf(l1));

    let bit = l0.name_hash.bit(0);
    let mut children: [NodeRef; 2] = [None, None];
    children[bit] = Some(c0);
    children[1 - bit] = Some(c1);
    let parent = dedup.add_with_children_already_added(Node::new_internal(children));
    assert_eq!(dedup.num_nodes(), 3);

    // A second interning of an identical parent consumes the duplicate
    // children references.
    let dup0 = dedup.find_and_add(leaf_node_hash(l0)).unwrap();
    let dup1 = dedup.find_and_add(leaf_node_hash(l1)).unwrap();
    let mut dup_children: [NodeRef; 2] = [None, None];
    dup_children[bit] = Some(dup0);
    dup_children[1 - bit] = Some(dup1);
    let dup_parent = dedup.add_with_children_already_added(Node::new_internal(dup_children));
    assert!(Arc::ptr_eq(&dup_parent, &parent));
    assert_eq!(dedup.num_nodes(), 3);

    dedup.remove(Some(&parent));
    dedup.remove(Some(&parent));
    assert_eq!(dedup.num_nodes(), 0);
}

fn leaf_node_hash(l: TrieLeaf) -> Hash {
    l.hash()
}
