//! Seam to the external DKIM proof-of-ownership service.
//!
//! The proof service itself (inbound mail, DNS lookups, signature parsing)
//! runs outside the core; the server only exposes its wire surface and
//! consumes its verdicts through `keytree_rules::DkimVerifier`.

use async_trait::async_trait;

use keytree_wire::{DkimStatement, DkimStatus};

/// Handles `/dkim/prepare` and `/dkim/poll`.
#[async_trait]
pub trait DkimProver: Send + Sync {
    /// Register a statement to be proven; returns the address the user must
    /// email.
    async fn prepare(&self, statement: DkimStatement) -> Option<String>;

    /// The current proof status for an email address.
    async fn poll(&self, email: &str) -> Option<DkimStatus>;
}

/// Stands in when no proof service is configured: every request is a miss.
pub struct UnavailableProver;

#[async_trait]
impl DkimProver for UnavailableProver {
    async fn prepare(&self, _statement: DkimStatement) -> Option<String> {
        None
    }

    async fn poll(&self, _email: &str) -> Option<DkimStatus> {
        None
    }
}
