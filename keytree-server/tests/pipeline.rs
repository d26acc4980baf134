//! Update pipeline behavior: staging, batching, and batch reachability.

mod common;

use common::{make_server, open_store, test_update, unix_now, wait_for};

use keytree_trie::{hash_of, set, NodeRef};

#[tokio::test]
async fn accepted_updates_commit_as_one_replayable_batch() {
    let dir = tempfile::tempdir().unwrap();
    let server = make_server(open_store(dir.path()), Vec::new());

    let h0 = hash_of(server.local_root().as_ref());
    let now = unix_now();

    let updates = [
        test_update("test:alice", &[], now),
        test_update("test:bob", &[], now),
        test_update("test:carol", &[], now),
    ];
    for update in &updates {
        server.submit(update.clone()).await.unwrap();
    }

    // The flush timer commits the batch shortly after the first submit.
    let server2 = server.clone();
    wait_for("batch commit", move || {
        hash_of(server2.local_root().as_ref()) != h0
    })
    .await;

    let batch = server.update_cache().get(h0).await.expect("batch for h0");
    assert_eq!(batch.updates.len(), 3);

    // Replaying the batch's leaves from h0 lands exactly on the signed root.
    let mut replayed: NodeRef = None;
    for leaf in &batch.updates {
        replayed = set(replayed.as_ref(), &leaf.name_hash, Some(*leaf));
    }
    assert_eq!(hash_of(replayed.as_ref()), batch.new_root.root.root_hash);
    assert_eq!(
        batch.new_root.root.root_hash,
        hash_of(server.local_root().as_ref())
    );

    // The signed root verifies against the server's public key.
    keytree_crypto::verify(
        server.public_key(),
        &batch.new_root.root,
        &batch.new_root.signature,
    )
    .unwrap();
}

#[tokio::test]
async fn rejected_updates_do_not_touch_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let server = make_server(open_store(dir.path()), Vec::new());
    let h0 = hash_of(server.local_root().as_ref());

    // Timestamp far outside the window.
    let stale = test_update("test:alice", &[], 1000);
    assert!(server.submit(stale).await.is_err());

    // No token proof at all.
    let mut unproven = test_update("test:bob", &[], unix_now());
    unproven.signatures.clear();
    assert!(server.submit(unproven).await.is_err());

    assert_eq!(hash_of(server.local_root().as_ref()), h0);
}

#[tokio::test]
async fn later_timestamp_supersedes_within_a_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let server = make_server(store.clone(), Vec::new());
    let now = unix_now();

    let v1 = test_update("test:alice", &[("k", "v1")], now);
    let v2 = test_update("test:alice", &[("k", "v2")], now + 1);
    server.submit(v1).await.unwrap();
    server.submit(v2.clone()).await.unwrap();

    // Same timestamp as the staged entry: rejected by monotonicity before
    // ever reaching the store.
    let dup = test_update("test:alice", &[("k", "v3")], now + 1);
    assert!(server.submit(dup).await.is_err());

    let name_hash = v2.entry.name_hash();
    let server2 = server.clone();
    wait_for("flush", move || {
        server2.store().read(name_hash).unwrap().is_some()
    })
    .await;

    let latest = store.read(name_hash).unwrap().unwrap();
    assert_eq!(latest.entry.keys.get("k").map(String::as_str), Some("v2"));
}
