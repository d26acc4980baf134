//! The update verifier: who may change a record, and when.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use keytree_crypto::base32;
use keytree_wire::{DkimStatement, Entry, SignedEntry};

pub const ONE_DAY_IN_SECONDS: u64 = 24 * 60 * 60;

/// How long a recovery-armed record must sit before a proof of ownership
/// alone can take it over.
pub const RECOVER_WAIT_TIME: u64 = 4 * ONE_DAY_IN_SECONDS;

const TOKEN_LEN: usize = 16;

/// An update was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct VerifyError {
    message: String,
}

impl VerifyError {
    pub(crate) fn bad_request(message: &str) -> VerifyError {
        VerifyError {
            message: message.to_owned(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The ownership token for an entry: the first 128 bits of its hash in
/// base32. Quoted in the proof email subject or used literally for `test:`
/// names.
pub fn token_for_entry(entry: &Entry) -> String {
    base32::encode(&entry.hash().as_bytes()[..TOKEN_LEN])
}

/// Half-open timestamp window an update must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub fn contains(&self, t: u64) -> bool {
        self.start <= t && t < self.end
    }
}

/// Checks a DKIM proof of ownership against a statement.
///
/// The DKIM sub-service itself (mail parsing, DNS lookups) lives outside the
/// core; the verifier only consumes this predicate.
#[async_trait]
pub trait DkimVerifier: Send + Sync {
    async fn verify(&self, statement: &DkimStatement, proof: &str) -> Result<(), VerifyError>;
}

/// A verifier for deployments without a DKIM proof service: every proof is
/// rejected, so only `test:` names can demonstrate ownership.
pub struct RejectDkim;

#[async_trait]
impl DkimVerifier for RejectDkim {
    async fn verify(&self, _statement: &DkimStatement, _proof: &str) -> Result<(), VerifyError> {
        Err(VerifyError::bad_request("dkim verification unavailable"))
    }
}

struct ChangeInfo {
    valid_signatures: BTreeSet<String>,
    changed_keys: BTreeSet<String>,
    had_keytree_key: bool,
    has_valid_keytree_signature: bool,
    has_changed_keytree_key: bool,
    has_valid_ownership_proof: bool,
}

/// Structural validity of an entry: size caps and character classes.
pub fn check_entry(entry: &Entry) -> Result<(), VerifyError> {
    crate::limits::size_check_entry(entry)?;
    crate::names::check_name(&entry.name)?;
    for (name, value) in &entry.keys {
        crate::names::check_key(name, value)?;
    }
    Ok(())
}

/// Structural validity of a signed update.
pub fn check_update(update: &SignedEntry) -> Result<(), VerifyError> {
    check_entry(&update.entry)?;
    crate::limits::size_check_signatures(&update.signatures)?;
    Ok(())
}

/// The policy engine deciding whether `old → new` is an authorized change.
pub struct Verifier {
    dkim: Arc<dyn DkimVerifier>,
    allow_test_names: bool,
}

impl Verifier {
    pub fn new(dkim: Arc<dyn DkimVerifier>, allow_test_names: bool) -> Verifier {
        Verifier {
            dkim,
            allow_test_names,
        }
    }

    async fn check_proof_of_ownership(&self, update: &SignedEntry) -> Result<(), VerifyError> {
        let name = &update.entry.name;
        let token = token_for_entry(&update.entry);

        if let Some(email) = name.strip_prefix("email:") {
            let Some(proof) = update.signatures.get("dkim") else {
                return Err(VerifyError::bad_request("no dkim signature"));
            };
            let statement = DkimStatement {
                sender: email.to_owned(),
                token,
            };
            self.dkim.verify(&statement, proof).await
        } else if name.starts_with("test:") && self.allow_test_names {
            let Some(signature) = update.signatures.get("test") else {
                return Err(VerifyError::bad_request("no test signature"));
            };
            if *signature != token {
                return Err(VerifyError::bad_request("bad test signature"));
            }
            Ok(())
        } else {
            Err(VerifyError::bad_request("unknown name type"))
        }
    }

    async fn change_info(&self, old: &Entry, update: &SignedEntry) -> ChangeInfo {
        let mut valid_signatures = BTreeSet::new();
        for (name, key) in &old.keys {
            let Some(signature) = update.signatures.get(key) else {
                continue;
            };
            if keytree_crypto::verify(key, &update.entry, signature).is_err() {
                continue;
            }
            valid_signatures.insert(name.clone());
        }

        let mut changed_keys = BTreeSet::new();
        for (name, key) in &old.keys {
            if update.entry.keys.get(name) != Some(key) {
                changed_keys.insert(name.clone());
            }
        }
        for (name, key) in &update.entry.keys {
            if old.keys.get(name) != Some(key) {
                changed_keys.insert(name.clone());
            }
        }

        let is_keytree = |name: &String| name.starts_with("keytree:");
        let had_keytree_key = old.keys.keys().any(is_keytree);
        let has_valid_keytree_signature = valid_signatures.iter().any(is_keytree);
        let has_changed_keytree_key = changed_keys.iter().any(is_keytree);

        let has_valid_ownership_proof = self.check_proof_of_ownership(update).await.is_ok();

        ChangeInfo {
            valid_signatures,
            changed_keys,
            had_keytree_key,
            has_valid_keytree_signature,
            has_changed_keytree_key,
            has_valid_ownership_proof,
        }
    }

    /// Decide whether `update` may replace `old` within `window`.
    pub async fn verify_update(
        &self,
        old: Option<&Entry>,
        update: &SignedEntry,
        window: Window,
    ) -> Result<(), VerifyError> {
        let base = Entry::default();
        let old = old.unwrap_or(&base);

        if !window.contains(update.entry.timestamp) {
            return Err(VerifyError::bad_request("bad timestamp; must be in window"));
        }
        if old.timestamp >= update.entry.timestamp {
            return Err(VerifyError::bad_request(
                "bad timestamp; must be > old timestamp",
            ));
        }

        let info = self.change_info(old, update).await;

        let mut override_signature_requirement = false;

        if old.in_recovery {
            if !info.has_valid_ownership_proof {
                return Err(VerifyError::bad_request(
                    "need valid proof of ownership if record in recovery",
                ));
            }
            if old.timestamp + RECOVER_WAIT_TIME < update.entry.timestamp {
                override_signature_requirement = true;
            }
        }

        if update.entry.in_recovery {
            if !info.has_valid_ownership_proof {
                return Err(VerifyError::bad_request(
                    "need valid proof of ownership to put record in recovery",
                ));
            }
            if !info.changed_keys.is_empty() {
                return Err(VerifyError::bad_request(
                    "can't change keys if record is in recovery",
                ));
            }
        }

        if !info.had_keytree_key {
            if !info.has_valid_ownership_proof {
                return Err(VerifyError::bad_request(
                    "record without keytree keys needs valid proof of ownership",
                ));
            }
            override_signature_requirement = true;
        }

        if !info.changed_keys.is_empty()
            && !info.has_valid_keytree_signature
            && !override_signature_requirement
        {
            return Err(VerifyError::bad_request(
                "need valid signature without valid override",
            ));
        }

        if info.has_changed_keytree_key
            && !info.valid_signatures.contains("keytree:recovery")
            && !info.has_valid_ownership_proof
        {
            return Err(VerifyError::bad_request(
                "need proof of ownership to change a keytree key",
            ));
        }

        Ok(())
    }
}
