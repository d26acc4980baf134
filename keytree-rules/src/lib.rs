//! Keytree Rules
//!
//! The authorization policy for directory updates:
//! - **limits**: structural size caps on entries and signatures
//! - **names**: character-class rules for names, keys, and values
//! - **Verifier**: the signature / ownership-proof / recovery decision table
//!
//! A record that declares any `keytree:*` key is self-managed: only a holder
//! of a live signing key may change it, except that a recovery-armed record
//! can be taken over with a proof of ownership after the recovery wait.

mod limits;
mod names;
mod verifier;

pub use limits::{
    size_check_entry, size_check_signatures, MAX_DKIM_SIGNATURE_VALUE_LENGTH, MAX_KEYS,
    MAX_KEY_NAME_LENGTH, MAX_KEY_VALUE_LENGTH, MAX_NAME_LENGTH, MAX_SIGNATURES,
    MAX_SIGNATURE_NAME_LENGTH, MAX_SIGNATURE_VALUE_LENGTH, MAX_TOTAL_VALUE_LENGTH,
};
pub use names::{check_email, check_key, check_name};
pub use verifier::{
    check_entry, check_update, token_for_entry, DkimVerifier, RejectDkim, VerifyError, Verifier,
    Window, RECOVER_WAIT_TIME,
};
