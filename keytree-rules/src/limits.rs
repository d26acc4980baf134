//! Size caps on entries and signatures.

use keytree_wire::Entry;
use std::collections::BTreeMap;

use crate::verifier::VerifyError;

pub const MAX_NAME_LENGTH: usize = 1024;
pub const MAX_KEYS: usize = 64;
pub const MAX_KEY_NAME_LENGTH: usize = 64;
pub const MAX_KEY_VALUE_LENGTH: usize = 4096;
pub const MAX_TOTAL_VALUE_LENGTH: usize = 8192;

pub const MAX_SIGNATURES: usize = 4;
pub const MAX_SIGNATURE_NAME_LENGTH: usize = 128;
pub const MAX_SIGNATURE_VALUE_LENGTH: usize = 128;
pub const MAX_DKIM_SIGNATURE_VALUE_LENGTH: usize = 4096;

pub fn size_check_entry(entry: &Entry) -> Result<(), VerifyError> {
    if entry.name.len() > MAX_NAME_LENGTH {
        return Err(VerifyError::bad_request("bad name; too long"));
    }
    if entry.keys.len() > MAX_KEYS {
        return Err(VerifyError::bad_request("bad keys; too many"));
    }

    let mut total = 0;
    for (name, value) in &entry.keys {
        if name.len() > MAX_KEY_NAME_LENGTH {
            return Err(VerifyError::bad_request("bad key name; too long"));
        }
        if value.len() > MAX_KEY_VALUE_LENGTH {
            return Err(VerifyError::bad_request("bad key value; too long"));
        }
        total += value.len();
    }
    if total > MAX_TOTAL_VALUE_LENGTH {
        return Err(VerifyError::bad_request("bad keys; total value too long"));
    }

    Ok(())
}

pub fn size_check_signatures(signatures: &BTreeMap<String, String>) -> Result<(), VerifyError> {
    if signatures.len() > MAX_SIGNATURES {
        return Err(VerifyError::bad_request("bad signatures; too many"));
    }

    for (name, value) in signatures {
        if name.len() > MAX_SIGNATURE_NAME_LENGTH {
            return Err(VerifyError::bad_request("bad signature name; too long"));
        }
        let cap = if name == "dkim" {
            MAX_DKIM_SIGNATURE_VALUE_LENGTH
        } else {
            MAX_SIGNATURE_VALUE_LENGTH
        };
        if value.len() > cap {
            return Err(VerifyError::bad_request("bad signature value; too long"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_caps() {
        let mut entry = Entry::default();
        entry.name = "x".repeat(MAX_NAME_LENGTH);
        assert!(size_check_entry(&entry).is_ok());
        entry.name.push('x');
        assert!(size_check_entry(&entry).is_err());

        let mut entry = Entry::default();
        entry
            .keys
            .insert("k".into(), "v".repeat(MAX_KEY_VALUE_LENGTH + 1));
        assert!(size_check_entry(&entry).is_err());

        let mut entry = Entry::default();
        for i in 0..3 {
            entry
                .keys
                .insert(format!("k{}", i), "v".repeat(MAX_KEY_VALUE_LENGTH));
        }
        assert!(size_check_entry(&entry).is_err(), "total cap applies");
    }

    #[test]
    fn signature_caps_with_dkim_exception() {
        let mut signatures = BTreeMap::new();
        signatures.insert("dkim".to_string(), "s".repeat(MAX_SIGNATURE_VALUE_LENGTH + 1));
        assert!(size_check_signatures(&signatures).is_ok());
        signatures.insert(
            "dkim".to_string(),
            "s".repeat(MAX_DKIM_SIGNATURE_VALUE_LENGTH + 1),
        );
        assert!(size_check_signatures(&signatures).is_err());

        let mut signatures = BTreeMap::new();
        signatures.insert("pubkey".to_string(), "s".repeat(MAX_SIGNATURE_VALUE_LENGTH + 1));
        assert!(size_check_signatures(&signatures).is_err());

        let mut signatures = BTreeMap::new();
        for i in 0..=MAX_SIGNATURES {
            signatures.insert(format!("k{}", i), "v".to_string());
        }
        assert!(size_check_signatures(&signatures).is_err());
    }
}
