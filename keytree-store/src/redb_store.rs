//! redb-backed entry store.
//!
//! Tables:
//! - `entries`: 40-byte key (name hash ++ big-endian timestamp) → JSON
//!   SignedEntry
//! - `meta`: schema version

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use keytree_crypto::{Hash, HASH_LEN};
use keytree_trie::{set, NodeRef};
use keytree_wire::SignedEntry;

use crate::{EntryStore, StoreError};

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema-version";
const SCHEMA_VERSION: u64 = 1;

const KEY_LEN: usize = HASH_LEN + 8;

fn entry_key(name_hash: &Hash, timestamp: u64) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..HASH_LEN].copy_from_slice(name_hash.as_bytes());
    key[HASH_LEN..].copy_from_slice(&timestamp.to_be_bytes());
    key
}

fn name_of_key(key: &[u8]) -> Hash {
    let mut name = [0u8; HASH_LEN];
    name.copy_from_slice(&key[..HASH_LEN]);
    Hash(name)
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a store, checking the schema version.
    pub fn open(path: &Path) -> Result<RedbStore, StoreError> {
        let db = Database::create(path)?;

        let write = db.begin_write()?;
        let found = {
            let mut meta = write.open_table(META)?;
            let existing = meta.get(SCHEMA_VERSION_KEY)?.map(|version| version.value());
            match existing {
                Some(version) => version,
                None => {
                    meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
                    // Make sure the entries table exists as well.
                    write.open_table(ENTRIES)?;
                    SCHEMA_VERSION
                }
            }
        };
        write.commit()?;

        if found != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(RedbStore { db })
    }
}

impl EntryStore for RedbStore {
    fn read(&self, name_hash: Hash) -> Result<Option<SignedEntry>, StoreError> {
        let read = self.db.begin_read()?;
        let entries = read.open_table(ENTRIES)?;

        let lo = entry_key(&name_hash, 0);
        let hi = entry_key(&name_hash, u64::MAX);
        let mut range = entries.range(lo.as_slice()..=hi.as_slice())?;

        match range.next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(serde_json::from_slice(value.value())?))
            }
            None => Ok(None),
        }
    }

    fn read_since(&self, name_hash: Hash, since: u64) -> Result<Option<SignedEntry>, StoreError> {
        let read = self.db.begin_read()?;
        let entries = read.open_table(ENTRIES)?;

        let lo = entry_key(&name_hash, since);
        let hi = entry_key(&name_hash, u64::MAX);
        let mut range = entries.range(lo.as_slice()..=hi.as_slice())?;

        match range.next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(serde_json::from_slice(value.value())?))
            }
            None => Ok(None),
        }
    }

    fn perform_updates(&self, updates: &[SignedEntry]) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }

        let write = self.db.begin_write()?;
        {
            let mut entries = write.open_table(ENTRIES)?;
            for update in updates {
                let key = entry_key(&update.entry.name_hash(), update.entry.timestamp);
                let value = serde_json::to_vec(update)?;
                entries.insert(key.as_slice(), value.as_slice())?;
            }
        }
        write.commit()?;
        Ok(())
    }

    fn load(&self) -> Result<NodeRef, StoreError> {
        let read = self.db.begin_read()?;
        let entries = read.open_table(ENTRIES)?;

        let mut root: NodeRef = None;
        let mut pending: Option<(Hash, Vec<u8>)> = None;

        // Keys are sorted, so the last row per name is its latest entry.
        for item in entries.iter()? {
            let (key, value) = item?;
            let name = name_of_key(key.value());
            if let Some((pending_name, bytes)) = pending.take() {
                if pending_name != name {
                    root = apply_latest(root, &bytes)?;
                }
            }
            pending = Some((name, value.value().to_vec()));
        }
        if let Some((_, bytes)) = pending {
            root = apply_latest(root, &bytes)?;
        }

        Ok(root)
    }
}

fn apply_latest(root: NodeRef, bytes: &[u8]) -> Result<NodeRef, StoreError> {
    let update: SignedEntry = serde_json::from_slice(bytes)?;
    let leaf = update.entry.to_leaf();
    Ok(set(root.as_ref(), &leaf.name_hash, Some(leaf)))
}
