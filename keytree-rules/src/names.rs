//! Character-class rules for names, key names, and key values.

use crate::verifier::VerifyError;

const ALLOWED_KEY_NAME_CHARACTERS: &str = "abcdefghijklmnopqrstuvwxyz1234567890-_:";

const ALLOWED_KEY_VALUE_CHARACTERS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890=-+_.,:@()/\\\"' \r\n";

const ALLOWED_LOCAL_CHARACTERS: &str = "abcdefghijklmnopqrstuvwxyz1234567890-_.";
const ALLOWED_DOMAIN_CHARACTERS: &str = "abcdefghijklmnopqrstuvwxyz1234567890-_.";

pub fn check_key(name: &str, value: &str) -> Result<(), VerifyError> {
    if name.chars().any(|c| !ALLOWED_KEY_NAME_CHARACTERS.contains(c)) {
        return Err(VerifyError::bad_request("bad key name character"));
    }
    if value.chars().any(|c| !ALLOWED_KEY_VALUE_CHARACTERS.contains(c)) {
        return Err(VerifyError::bad_request("bad key value character"));
    }
    Ok(())
}

pub fn check_name(name: &str) -> Result<(), VerifyError> {
    check_email(name)
}

/// For `email:` names: exactly one `@`, restricted local and domain
/// characters, and no trailing dot. Other name types pass through.
pub fn check_email(name: &str) -> Result<(), VerifyError> {
    let Some(email) = name.strip_prefix("email:") else {
        return Ok(());
    };

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(VerifyError::bad_request("expected one @"));
    };

    if local.chars().any(|c| !ALLOWED_LOCAL_CHARACTERS.contains(c)) {
        return Err(VerifyError::bad_request("bad email character"));
    }
    if domain.chars().any(|c| !ALLOWED_DOMAIN_CHARACTERS.contains(c)) {
        return Err(VerifyError::bad_request("bad domain character"));
    }
    if domain.ends_with('.') {
        return Err(VerifyError::bad_request("domain must not end in ."));
    }

    Ok(())
}
