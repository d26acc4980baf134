//! The server core: shared state and the single-writer update pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use keytree_concurrency::HashLocker;
use keytree_crypto::Hash;
use keytree_mirror::{Coordinator, FETCH_PARALLELISM};
use keytree_rules::{check_update, Verifier, VerifyError, Window};
use keytree_store::SharedStore;
use keytree_trie::{hash_of, parallel_hash, set, Dedup, NodeRef};
use keytree_wire::{Entry, Root, SignedEntry, SignedRoot, UpdateBatch};

use crate::config::{
    Config, NO_FLUSH_UPDATE_INTERVAL, UPDATE_BATCH_BACKLOG, UPDATE_FLUSH_INTERVAL,
    UPDATE_QUEUE_SIZE, UPDATE_WINDOW_SLACK,
};
use crate::distribution::{TrieCache, UpdateCache};
use crate::util::unix_now;

/// A trie a lookup can be answered against: the root plus, when the trie
/// matches a signature we verified, its signed root.
#[derive(Clone, Default)]
pub struct LookupTrie {
    pub root: NodeRef,
    pub signed_root: Option<SignedRoot>,
}

/// Mutable server state guarded by one lock, held only for O(1) swaps.
pub(crate) struct State {
    pub local: LookupTrie,
    pub all_tries: HashMap<String, LookupTrie>,
    pub trackers: HashSet<String>,
}

/// An update submission error.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Rejected(#[from] VerifyError),

    #[error("store error: {0}")]
    Store(String),

    #[error("server shutting down")]
    Closed,
}

/// One request travelling to the update pipeline with its reply slot.
pub struct UpdateRequest {
    update: SignedEntry,
    reply: oneshot::Sender<Result<(), UpdateError>>,
}

pub struct Server {
    pub(crate) config: Config,
    signer: keytree_crypto::Signer,

    dedup: Arc<Dedup>,
    coordinator: Arc<Coordinator>,
    verifier: Verifier,
    store: SharedStore,

    update_cache: UpdateCache,
    trie_cache: Mutex<TrieCache>,
    update_tx: mpsc::Sender<UpdateRequest>,

    pub(crate) reconcile_locks: HashLocker,

    pub(crate) state: Mutex<State>,

    catch_up_cutoff: Option<u64>,
}

impl Server {
    /// Build a server around an already-loaded local trie. Returns the
    /// receiver the update pipeline must be run with.
    pub fn new(
        config: Config,
        signer: keytree_crypto::Signer,
        store: SharedStore,
        verifier: Verifier,
        initial_root: NodeRef,
        catch_up_cutoff: Option<u64>,
    ) -> (Arc<Server>, mpsc::Receiver<UpdateRequest>) {
        let dedup = Arc::new(Dedup::new());
        let coordinator = Arc::new(Coordinator::new(dedup.clone(), FETCH_PARALLELISM));
        let trie_cache = TrieCache::new(dedup.clone(), UPDATE_BATCH_BACKLOG);
        let update_cache = UpdateCache::new(hash_of(initial_root.as_ref()), UPDATE_BATCH_BACKLOG);

        let (update_tx, update_rx) = mpsc::channel(UPDATE_QUEUE_SIZE);

        let server = Arc::new(Server {
            config,
            signer,
            dedup,
            coordinator,
            verifier,
            store,
            update_cache,
            trie_cache: Mutex::new(trie_cache),
            update_tx,
            reconcile_locks: HashLocker::new(),
            state: Mutex::new(State {
                local: LookupTrie::default(),
                all_tries: HashMap::new(),
                trackers: HashSet::new(),
            }),
            catch_up_cutoff,
        });

        {
            let mut state = server.state.lock().unwrap();
            server.set_and_sign_root(&mut state, initial_root);
        }

        (server, update_rx)
    }

    pub fn dedup(&self) -> &Arc<Dedup> {
        &self.dedup
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn update_cache(&self) -> &UpdateCache {
        &self.update_cache
    }

    pub fn public_key(&self) -> &str {
        &self.config.public_key
    }

    pub fn upstream(&self) -> &[crate::config::ServerInfo] {
        &self.config.upstream
    }

    /// Submit a signed entry into the update pipeline and wait for the
    /// verdict.
    pub async fn submit(&self, update: SignedEntry) -> Result<(), UpdateError> {
        let (reply, rx) = oneshot::channel();
        self.update_tx
            .send(UpdateRequest { update, reply })
            .await
            .map_err(|_| UpdateError::Closed)?;
        rx.await.map_err(|_| UpdateError::Closed)?
    }

    /// The current local signed root.
    pub fn signed_root(&self) -> Option<SignedRoot> {
        self.state.lock().unwrap().local.signed_root.clone()
    }

    /// The current local trie root.
    pub fn local_root(&self) -> NodeRef {
        self.state.lock().unwrap().local.root.clone()
    }

    /// The tracked trie for a peer's public key, if any.
    pub fn get_root_for(&self, public_key: &str) -> NodeRef {
        let state = self.state.lock().unwrap();
        state
            .all_tries
            .get(public_key)
            .and_then(|t| t.root.clone())
    }

    /// Install a peer's trie, releasing the reference held for the one it
    /// replaces. Ownership of `root`'s dedup reference moves to the server.
    pub fn consider_trie(&self, public_key: &str, root: NodeRef, signed_root: Option<SignedRoot>) {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.all_tries.get(public_key) {
            self.dedup.remove(existing.root.as_ref());
        }
        state
            .all_tries
            .insert(public_key.to_owned(), LookupTrie { root, signed_root });
    }

    /// Drop tries that have gone stale and have no tracker keeping them.
    pub fn clean_old_tries(&self) {
        let mut state = self.state.lock().unwrap();
        let cutoff = unix_now().saturating_sub(crate::config::OLD_TRIE_CUTOFF);

        let stale: Vec<String> = state
            .all_tries
            .iter()
            .filter(|(public_key, trie)| {
                let timestamp = trie
                    .signed_root
                    .as_ref()
                    .map(|s| s.root.timestamp)
                    .unwrap_or(0);
                timestamp < cutoff
                    && !state.trackers.contains(*public_key)
                    && **public_key != self.config.public_key
            })
            .map(|(public_key, _)| public_key.clone())
            .collect();

        for public_key in stale {
            if let Some(trie) = state.all_tries.remove(&public_key) {
                self.dedup.remove(trie.root.as_ref());
            }
        }
    }

    /// Pin `new_root`, sign it with a fresh timestamp, and make it the local
    /// trie. The state lock must be held by the caller.
    fn set_and_sign_root(&self, state: &mut State, new_root: NodeRef) -> NodeRef {
        let new_root = self.trie_cache.lock().unwrap().set_current(new_root);

        let root = Root {
            root_hash: hash_of(new_root.as_ref()),
            timestamp: unix_now(),
        };
        let signed = SignedRoot {
            signature: self.signer.sign(&root),
            root,
        };

        state.local = LookupTrie {
            root: new_root.clone(),
            signed_root: Some(signed),
        };
        state
            .all_tries
            .insert(self.config.public_key.clone(), state.local.clone());

        new_root
    }

    /// Commit a flushed batch: swap in the new local root, sign it, and
    /// publish the transition into the update cache.
    fn publish(&self, new_root: NodeRef, leaves: Vec<keytree_wire::TrieLeaf>) {
        let mut state = self.state.lock().unwrap();

        let new_root = self.set_and_sign_root(&mut state, new_root);
        let signed = state
            .local
            .signed_root
            .clone()
            .expect("set_and_sign_root always signs");

        let batch = UpdateBatch {
            updates: leaves,
            new_root: signed,
        };
        self.update_cache.add(hash_of(new_root.as_ref()), batch);
    }

    fn window(&self) -> Window {
        let now = unix_now();
        let start = match self.catch_up_cutoff {
            Some(cutoff) => cutoff.saturating_sub(UPDATE_WINDOW_SLACK),
            None => now.saturating_sub(UPDATE_WINDOW_SLACK),
        };
        Window {
            start,
            end: now + UPDATE_WINDOW_SLACK,
        }
    }

    async fn read_old_entry(&self, name_hash: Hash) -> Result<Option<SignedEntry>, UpdateError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.read(name_hash))
            .await
            .map_err(|err| UpdateError::Store(err.to_string()))?
            .map_err(|err| UpdateError::Store(err.to_string()))
    }
}

/// The single writer that owns the in-progress local root.
///
/// Batches amortize signing, the durable write, and the full-tree hash
/// recomputation; the flush timer bounds per-update latency.
pub async fn run_update_pipeline(server: Arc<Server>, mut requests: mpsc::Receiver<UpdateRequest>) {
    let mut new_root = server.local_root();
    let mut pending_updates: Vec<SignedEntry> = Vec::new();
    let mut pending: HashMap<Hash, Entry> = HashMap::new();

    let mut flush_at = Instant::now() + NO_FLUSH_UPDATE_INTERVAL;

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(UpdateRequest { update, reply }) = request else {
                    break;
                };

                let result = stage_update(
                    &server,
                    &mut new_root,
                    &mut pending_updates,
                    &mut pending,
                    update,
                )
                .await;
                if result.is_ok() && pending_updates.len() == 1 {
                    flush_at = Instant::now() + UPDATE_FLUSH_INTERVAL;
                }
                let _ = reply.send(result);
            }

            _ = tokio::time::sleep_until(flush_at) => {
                flush(&server, &mut new_root, &mut pending_updates, &mut pending).await;
                flush_at = Instant::now() + NO_FLUSH_UPDATE_INTERVAL;
            }
        }
    }
}

async fn stage_update(
    server: &Server,
    new_root: &mut NodeRef,
    pending_updates: &mut Vec<SignedEntry>,
    pending: &mut HashMap<Hash, Entry>,
    update: SignedEntry,
) -> Result<(), UpdateError> {
    check_update(&update)?;

    let leaf = update.entry.to_leaf();

    let old_entry = match pending.get(&leaf.name_hash) {
        Some(entry) => Some(entry.clone()),
        None => server
            .read_old_entry(leaf.name_hash)
            .await?
            .map(|signed| signed.entry),
    };

    server
        .verifier
        .verify_update(old_entry.as_ref(), &update, server.window())
        .await?;

    *new_root = set(new_root.as_ref(), &leaf.name_hash, Some(leaf));
    pending.insert(leaf.name_hash, update.entry.clone());
    pending_updates.push(update);

    Ok(())
}

async fn flush(
    server: &Arc<Server>,
    new_root: &mut NodeRef,
    pending_updates: &mut Vec<SignedEntry>,
    pending: &mut HashMap<Hash, Entry>,
) {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    parallel_hash(new_root.as_ref(), parallelism);

    let mut staged = std::mem::take(pending_updates);
    pending.clear();

    if !staged.is_empty() {
        let store = server.store.clone();
        let batch = staged.clone();
        let written = tokio::task::spawn_blocking(move || store.perform_updates(&batch)).await;

        let failed = match written {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(err) => Some(err.to_string()),
        };
        if let Some(err) = failed {
            // Roll back to the last committed root; the staged updates are
            // dropped and submitters must retry.
            tracing::error!("flushing failed: {}", err);
            *new_root = server.local_root();
            staged.clear();
        }
    }

    let leaves = staged.iter().map(|update| update.entry.to_leaf()).collect();
    server.publish(new_root.clone(), leaves);

    *new_root = server.local_root();
}
