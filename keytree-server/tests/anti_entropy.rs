//! Anti-entropy fetch: convergence on a remote trie and dedup reuse across
//! successive roots.

mod common;

use std::sync::Arc;

use common::{make_server, open_store, serve_http, test_update, unix_now, wait_for};

use tokio_util::sync::CancellationToken;

use keytree_mirror::Coordinator;
use keytree_trie::{hash_of, leaf_count, node_count, Dedup};
use keytree_wire::KeytreeClient;

#[tokio::test]
async fn fetch_converges_and_reuses_dedup() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    let now = unix_now();
    let seeded: Vec<_> = (0..512)
        .map(|i| test_update(&format!("test:node-{}", i), &[], now))
        .collect();
    store.perform_updates(&seeded).unwrap();

    let upstream = make_server(store, Vec::new());
    let address = serve_http(upstream.clone()).await;
    let conn = KeytreeClient::new(&address).unwrap();

    let dedup = Arc::new(Dedup::new());
    let coordinator = Coordinator::new(dedup.clone(), 8);
    let ctx = CancellationToken::new();

    // Starting from nothing, the fetched trie hashes to the peer's root and
    // dedup holds exactly its distinct nodes.
    let target = hash_of(upstream.local_root().as_ref());
    let (root, result) = coordinator.fetch(&ctx, &conn, target, None).await;
    result.unwrap();
    assert_eq!(hash_of(root.as_ref()), target);
    assert_eq!(leaf_count(root.as_ref()), 512);
    assert_eq!(dedup.num_nodes(), node_count(root.as_ref()));

    // Advance the peer by one entry and fetch again: almost everything is
    // already interned.
    upstream
        .submit(test_update("test:extra", &[], unix_now()))
        .await
        .unwrap();
    let upstream2 = upstream.clone();
    wait_for("commit", move || {
        hash_of(upstream2.local_root().as_ref()) != target
    })
    .await;

    let nodes_before = dedup.num_nodes();
    let new_target = hash_of(upstream.local_root().as_ref());
    let (new_root, result) = coordinator
        .fetch(&ctx, &conn, new_target, root.clone())
        .await;
    result.unwrap();
    assert_eq!(hash_of(new_root.as_ref()), new_target);

    // Only the changed root-to-leaf path is new; well over 95% is reused.
    let added = dedup.num_nodes() - nodes_before;
    assert!(added > 0);
    assert!(
        added < nodes_before / 20,
        "expected heavy reuse, added {} of {}",
        added,
        nodes_before
    );

    // Releasing both fetched roots empties the dedup completely.
    dedup.remove(root.as_ref());
    dedup.remove(new_root.as_ref());
    assert_eq!(dedup.num_nodes(), 0);
}

#[tokio::test]
async fn cancelled_fetch_keeps_partial_progress() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    let now = unix_now();
    let seeded: Vec<_> = (0..64)
        .map(|i| test_update(&format!("test:p-{}", i), &[], now))
        .collect();
    store.perform_updates(&seeded).unwrap();

    let upstream = make_server(store, Vec::new());
    let address = serve_http(upstream.clone()).await;
    let conn = KeytreeClient::new(&address).unwrap();

    let dedup = Arc::new(Dedup::new());
    let coordinator = Coordinator::new(dedup.clone(), 8);

    let ctx = CancellationToken::new();
    ctx.cancel();

    let target = hash_of(upstream.local_root().as_ref());
    let (root, result) = coordinator.fetch(&ctx, &conn, target, None).await;
    assert!(result.is_err());
    // Nothing was fetched, and the fallback was empty.
    assert!(root.is_none());

    // A later attempt with a live context succeeds and reuses whatever the
    // cancelled run interned.
    let ctx = CancellationToken::new();
    let (root, result) = coordinator.fetch(&ctx, &conn, target, None).await;
    result.unwrap();
    assert_eq!(hash_of(root.as_ref()), target);
}
