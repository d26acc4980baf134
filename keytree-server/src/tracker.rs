//! Per-peer tracking: incremental batches, anti-entropy fallback, and
//! per-name reconciliation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use keytree_crypto::Hash;
use keytree_mirror::FetchError;
use keytree_trie::{hash_of, leaf_count, node_count, set, split, NodeRef};
use keytree_wire::{Backoff, KeytreeClient, WireError};

use crate::config::{FIXER_PARALLELISM, RECONCILE_QUEUE_SIZE};
use crate::server::Server;

/// Wall-clock budget for one anti-entropy fetch attempt; partial progress
/// stays interned for the next attempt.
const FETCH_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum TrackError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("bad signature from peer")]
    BadSignature,

    #[error("hash did not match new root")]
    HashMismatch,

    #[error("cancelled")]
    Cancelled,
}

impl TrackError {
    fn is_not_found(&self) -> bool {
        matches!(self, TrackError::Wire(WireError::NotFound))
    }
}

/// Tracks one upstream peer, keeping a local copy of its trie and feeding
/// divergent names through the reconcile queue into the update pipeline.
pub struct Tracker {
    ctx: CancellationToken,
    conn: KeytreeClient,
    server: Arc<Server>,
    address: String,
    public_key: String,
    queue_tx: mpsc::Sender<Hash>,
    queue_rx: Arc<Mutex<mpsc::Receiver<Hash>>>,
}

impl Tracker {
    pub fn new(
        ctx: CancellationToken,
        conn: KeytreeClient,
        server: Arc<Server>,
        address: String,
        public_key: String,
    ) -> Tracker {
        let (queue_tx, queue_rx) = mpsc::channel(RECONCILE_QUEUE_SIZE);
        Tracker {
            ctx,
            conn,
            server,
            address,
            public_key,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
        }
    }

    /// Follow the peer until cancelled. Errors are logged and retried; the
    /// tracker never takes the server down.
    pub async fn run(self: Arc<Self>) {
        for _ in 0..FIXER_PARALLELISM {
            let tracker = self.clone();
            tokio::spawn(async move { tracker.fixer().await });
        }

        let mut backoff = Backoff::new();
        while !self.ctx.is_cancelled() {
            match self.track().await {
                Err(err) if err.is_not_found() => {
                    tracing::info!(address = %self.address, "performing anti-entropy");
                    self.run_anti_entropy(&mut backoff).await;
                }
                Err(TrackError::Cancelled) => break,
                Err(err) => {
                    tracing::warn!(address = %self.address, "tracking failed: {}", err);
                    backoff.wait().await;
                }
                Ok(()) => break,
            }
        }
    }

    /// The tight incremental path: long-poll for the batch moving our copy
    /// of the peer's trie forward, verify it, apply it, and fan the touched
    /// names out to the fixers.
    async fn track(&self) -> Result<(), TrackError> {
        while !self.ctx.is_cancelled() {
            let root = self.server.get_root_for(&self.public_key);

            let batch = tokio::select! {
                batch = self.conn.update_batch(hash_of(root.as_ref())) => batch?,
                _ = self.ctx.cancelled() => return Err(TrackError::Cancelled),
            };

            keytree_crypto::verify(
                &self.public_key,
                &batch.new_root.root,
                &batch.new_root.signature,
            )
            .map_err(|_| TrackError::BadSignature)?;

            let mut new_root = root;
            for leaf in &batch.updates {
                new_root = set(new_root.as_ref(), &leaf.name_hash, Some(*leaf));
            }
            let new_root = self.server.dedup().add(new_root.as_ref());

            if hash_of(new_root.as_ref()) != batch.new_root.root.root_hash {
                self.server.dedup().remove(new_root.as_ref());
                return Err(TrackError::HashMismatch);
            }

            self.server
                .consider_trie(&self.public_key, new_root, Some(batch.new_root.clone()));

            for leaf in &batch.updates {
                if self.queue_tx.send(leaf.name_hash).await.is_err() {
                    return Err(TrackError::Cancelled);
                }
            }
        }

        Err(TrackError::Cancelled)
    }

    /// The slow path, entered when the peer no longer remembers our root:
    /// snapshot its trie wholesale, then reconcile name by name.
    async fn run_anti_entropy(&self, backoff: &mut Backoff) {
        while !self.ctx.is_cancelled() {
            match self.fetch_anti_entropy().await {
                Ok(root) => {
                    tracing::info!(address = %self.address, "anti-entropy successful");
                    backoff.reset();
                    let local = self.server.local_root();
                    self.reconcile(local, root, 0).await;
                    return;
                }
                Err(TrackError::Wire(WireError::NotFound)) => {
                    // The peer moved on mid-fetch; try again immediately.
                    continue;
                }
                Err(TrackError::Cancelled) => {
                    let root = self.server.get_root_for(&self.public_key);
                    tracing::info!(
                        address = %self.address,
                        nodes = node_count(root.as_ref()),
                        leaves = leaf_count(root.as_ref()),
                        "anti-entropy progress"
                    );
                    continue;
                }
                Err(err) => {
                    tracing::warn!(address = %self.address, "anti-entropy failed: {}", err);
                    backoff.wait().await;
                }
            }
        }
    }

    /// Fetch the peer's current trie via the coordinator. The new trie is
    /// installed even when incomplete; its signature is only advertised when
    /// the fetched hash checks out.
    async fn fetch_anti_entropy(&self) -> Result<NodeRef, TrackError> {
        let reply = tokio::select! {
            reply = self.conn.root() => reply?,
            _ = self.ctx.cancelled() => return Err(TrackError::Cancelled),
        };

        keytree_crypto::verify(&self.public_key, &reply.root, &reply.signature)
            .map_err(|_| TrackError::BadSignature)?;

        let root_hash = reply.root.root_hash;
        let old_root = self.server.get_root_for(&self.public_key);

        let fetch_ctx = self.ctx.child_token();
        let deadline = {
            let fetch_ctx = fetch_ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(FETCH_DEADLINE).await;
                fetch_ctx.cancel();
            })
        };
        let (root, result) = self
            .server
            .coordinator()
            .fetch(&fetch_ctx, &self.conn, root_hash, old_root)
            .await;
        deadline.abort();

        // Keep the signature iff the trie is exactly what was signed.
        let signed_root = (hash_of(root.as_ref()) == root_hash).then_some(reply);
        self.server
            .consider_trie(&self.public_key, root.clone(), signed_root);

        match result {
            Ok(()) => Ok(root),
            Err(FetchError::Cancelled) => Err(TrackError::Cancelled),
            Err(FetchError::Wire(err)) => Err(err.into()),
            Err(FetchError::BadHash) => Err(TrackError::HashMismatch),
            Err(FetchError::TooDeep) => Err(TrackError::HashMismatch),
        }
    }

    /// Walk local and remote tries in lock-step; identical subtrees stop the
    /// descent, and leaves that differ enqueue their name for history sync.
    fn reconcile<'a>(&'a self, local: NodeRef, remote: NodeRef, depth: usize) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.ctx.is_cancelled() {
                return;
            }

            let Some(remote_node) = remote else {
                return;
            };
            if hash_of(local.as_ref()) == remote_node.hash() {
                return;
            }

            let divergent_name = match (local.as_ref().and_then(|n| n.leaf()), remote_node.leaf())
            {
                (_, Some(remote_leaf)) if local.is_none() => Some(remote_leaf.name_hash),
                (Some(local_leaf), Some(remote_leaf))
                    if local_leaf.name_hash == remote_leaf.name_hash =>
                {
                    Some(remote_leaf.name_hash)
                }
                _ => None,
            };

            if let Some(name_hash) = divergent_name {
                let _ = self.queue_tx.send(name_hash).await;
                return;
            }

            let local_children = split(local.as_ref(), depth);
            let remote_children = split(Some(&remote_node), depth);
            for (local_child, remote_child) in local_children.into_iter().zip(remote_children) {
                self.reconcile(local_child, remote_child, depth + 1).await;
            }
        })
    }

    /// Fixer worker: drain the reconcile queue, one name at a time.
    async fn fixer(&self) {
        loop {
            let name_hash = {
                let mut queue = self.queue_rx.lock().await;
                tokio::select! {
                    name_hash = queue.recv() => name_hash,
                    _ = self.ctx.cancelled() => return,
                }
            };
            let Some(name_hash) = name_hash else {
                return;
            };
            self.fixup(name_hash).await;
        }
    }

    /// Replay the peer's history for one name into the local pipeline,
    /// strictly newer entries only. Every entry passes the full local
    /// verifier; this is the only point where foreign entries become
    /// authoritative locally.
    async fn fixup(&self, name_hash: Hash) {
        let _guard = self.server.reconcile_locks.lock(name_hash).await;

        let store = self.server.store().clone();
        let local = match tokio::task::spawn_blocking(move || store.read(name_hash)).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(err)) => {
                tracing::warn!("fixup read failed: {}", err);
                return;
            }
            Err(err) => {
                tracing::warn!("fixup read failed: {}", err);
                return;
            }
        };

        let mut since = local.map(|entry| entry.entry.timestamp + 1).unwrap_or(0);

        while !self.ctx.is_cancelled() {
            match self.conn.history(name_hash, since).await {
                Ok(Some(update)) => {
                    let timestamp = update.entry.timestamp;
                    // Apply updates in order; a rejected one does not stop
                    // the rest of the history.
                    if let Err(err) = self.server.submit(update).await {
                        tracing::debug!("fixup update rejected: {}", err);
                    }
                    since = timestamp + 1;
                }
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(address = %self.address, "history failed: {}", err);
                    return;
                }
            }
        }
    }
}

/// Spawn one tracker per configured upstream plus the periodic trie cleaner.
pub fn spawn_trackers(server: &Arc<Server>, ctx: &CancellationToken) {
    for info in server.upstream().to_vec() {
        let conn = match KeytreeClient::new(&info.address) {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(address = %info.address, "skipping upstream: {}", err);
                continue;
            }
        };

        tracing::info!(address = %info.address, public_key = %info.public_key, "spawning tracker");

        server
            .state
            .lock()
            .unwrap()
            .trackers
            .insert(info.public_key.clone());

        let tracker = Arc::new(Tracker::new(
            ctx.clone(),
            conn,
            server.clone(),
            info.address,
            info.public_key,
        ));
        tokio::spawn(tracker.run());
    }
}

/// Periodically release tries nobody is tracking or reading.
pub async fn run_cleaner(server: Arc<Server>, ctx: CancellationToken) {
    while !ctx.is_cancelled() {
        server.clean_old_tries();
        tokio::select! {
            _ = tokio::time::sleep(crate::config::CLEAN_INTERVAL) => {}
            _ = ctx.cancelled() => {}
        }
    }
}
