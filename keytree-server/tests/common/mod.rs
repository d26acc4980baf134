// Each integration test compiles as a separate binary that includes this
// module via `mod common;`; not every binary uses every helper.
#![allow(dead_code)]
//! Shared helpers for keytree-server integration tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use keytree_crypto::{generate_ed25519_keypair, Signer};
use keytree_rules::{token_for_entry, RejectDkim, Verifier};
use keytree_server::config::ServerInfo;
use keytree_server::dkim::UnavailableProver;
use keytree_server::{http, run_update_pipeline, Config, Server};
use keytree_store::{RedbStore, SharedStore};
use keytree_trie::parallel_hash;
use keytree_wire::{Entry, SignedEntry};

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn test_config(upstream: Vec<ServerInfo>) -> (Config, Signer) {
    let (public_key, private_key) = generate_ed25519_keypair();
    let signer = Signer::new(&private_key).unwrap();
    (
        Config {
            public_key,
            private_key,
            upstream,
            dns_server: String::new(),
        },
        signer,
    )
}

pub fn open_store(dir: &Path) -> SharedStore {
    Arc::new(RedbStore::open(&dir.join("keytree-server.redb")).unwrap())
}

/// Build a server over `store` and start its update pipeline.
pub fn make_server(store: SharedStore, upstream: Vec<ServerInfo>) -> Arc<Server> {
    let (config, signer) = test_config(upstream);

    let root = store.load().unwrap();
    parallel_hash(root.as_ref(), 4);

    let verifier = Verifier::new(Arc::new(RejectDkim), true);
    let (server, update_rx) = Server::new(config, signer, store, verifier, root, None);
    tokio::spawn(run_update_pipeline(server.clone(), update_rx));
    server
}

/// Serve a server's HTTP surface on an ephemeral local port.
pub async fn serve_http(server: Arc<Server>) -> String {
    let app = http::router(server, Arc::new(UnavailableProver));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

/// A `test:` entry update that the verifier accepts via its token proof.
pub fn test_update(name: &str, keys: &[(&str, &str)], timestamp: u64) -> SignedEntry {
    let entry = Entry {
        name: name.to_owned(),
        keys: keys
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        timestamp,
        in_recovery: false,
    };
    let mut signatures = BTreeMap::new();
    signatures.insert("test".to_string(), token_for_entry(&entry));
    SignedEntry { entry, signatures }
}

/// Poll `condition` until it holds or the deadline passes.
pub async fn wait_for<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub fn cancel_on_drop() -> CancellationToken {
    CancellationToken::new()
}
