//! Two-server federation: anti-entropy bootstrap, per-name reconciliation,
//! and incremental tracking.

mod common;

use common::{make_server, open_store, serve_http, test_update, unix_now, wait_for};

use tokio_util::sync::CancellationToken;

use keytree_server::config::ServerInfo;
use keytree_server::spawn_trackers;
use keytree_trie::hash_of;

#[tokio::test]
async fn mirror_converges_and_then_tracks() {
    let upstream_dir = tempfile::tempdir().unwrap();
    let mirror_dir = tempfile::tempdir().unwrap();

    // Pre-populate the upstream's store so its batch ring has no path from
    // the empty root: the mirror is forced through anti-entropy.
    let now = unix_now();
    let upstream_store = open_store(upstream_dir.path());
    let seeded: Vec<_> = (0..32)
        .map(|i| test_update(&format!("test:seed-{}", i), &[("k", "v")], now))
        .collect();
    upstream_store.perform_updates(&seeded).unwrap();

    let upstream = make_server(upstream_store, Vec::new());
    let upstream_address = serve_http(upstream.clone()).await;

    let mirror = make_server(
        open_store(mirror_dir.path()),
        vec![ServerInfo {
            address: upstream_address,
            public_key: upstream.public_key().to_owned(),
        }],
    );

    let ctx = CancellationToken::new();
    spawn_trackers(&mirror, &ctx);

    // Anti-entropy: the mirror's copy of the upstream trie converges on the
    // upstream's signed root.
    let (mirror2, upstream2) = (mirror.clone(), upstream.clone());
    let upstream_key = upstream.public_key().to_owned();
    wait_for("anti-entropy convergence", move || {
        let tracked = mirror2.get_root_for(&upstream_key);
        !hash_of(tracked.as_ref()).is_empty()
            && hash_of(tracked.as_ref()) == hash_of(upstream2.local_root().as_ref())
    })
    .await;

    // Reconciliation: the fixers replay every name's history through the
    // mirror's own pipeline, so its *local* trie reaches the same hash.
    let (mirror2, upstream2) = (mirror.clone(), upstream.clone());
    wait_for("local reconcile", move || {
        hash_of(mirror2.local_root().as_ref()) == hash_of(upstream2.local_root().as_ref())
    })
    .await;

    let probe = seeded[7].entry.name_hash();
    let replicated = mirror.store().read(probe).unwrap().unwrap();
    assert_eq!(replicated.entry.name, "test:seed-7");

    // Incremental tracking: a fresh update flows through the long-polled
    // batch path without another anti-entropy round.
    let fresh = test_update("test:fresh", &[("k", "new")], unix_now());
    upstream.submit(fresh.clone()).await.unwrap();

    let mirror2 = mirror.clone();
    let fresh_hash = fresh.entry.name_hash();
    wait_for("incremental update", move || {
        mirror2
            .store()
            .read(fresh_hash)
            .ok()
            .flatten()
            .is_some()
    })
    .await;

    // The mirror shares trie structure between its own trie and the tracked
    // copy through the common dedup.
    assert!(mirror.dedup().num_nodes() > 0);

    ctx.cancel();
}
