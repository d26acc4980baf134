//! Typed Ed25519 signing of content hashes.
//!
//! Keys and signatures travel as wrapped base32 strings, e.g.
//! `ed25519-pub(<base32>)`. Signing covers the signable's hash followed by
//! its type name, so signatures over one record type can never be replayed
//! as another.

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::RngCore;
use thiserror::Error;

use crate::base32;
use crate::hash::Hash;

const SECRET_KEY_LEN: usize = 32;
const PUBLIC_KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;

/// Cryptographic operation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("badly formatted key material")]
    BadFormat,

    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,

    #[error("bad signature")]
    BadSignature,
}

/// A value that can be signed: a content hash plus a type name that is mixed
/// into the signed bytes.
pub trait Signable {
    fn signing_type_name(&self) -> &'static str;
    fn hash(&self) -> Hash;
}

fn wrap(data: &[u8], prefix: &str) -> String {
    format!("{}({})", prefix, base32::encode(data))
}

fn unwrap_slice(s: &str, prefix: &str) -> Result<Vec<u8>, CryptoError> {
    let inner = s
        .strip_prefix(prefix)
        .and_then(|s| s.strip_prefix('('))
        .and_then(|s| s.strip_suffix(')'))
        .ok_or(CryptoError::BadFormat)?;
    base32::decode(inner).map_err(|_| CryptoError::BadFormat)
}

fn unwrap_fixed<const N: usize>(s: &str, prefix: &str) -> Result<[u8; N], CryptoError> {
    let bytes = unwrap_slice(s, prefix)?;
    bytes.try_into().map_err(|_| CryptoError::BadFormat)
}

/// Generate a fresh Ed25519 keypair as wrapped strings `(public, private)`.
pub fn generate_ed25519_keypair() -> (String, String) {
    let mut seed = [0u8; SECRET_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let signing = SigningKey::from_bytes(&seed);
    (
        wrap(signing.verifying_key().as_bytes(), "ed25519-pub"),
        wrap(&seed, "ed25519-priv"),
    )
}

fn prepare_for_signing(signable: &dyn Signable) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(signable.hash().as_bytes());
    buf.extend_from_slice(signable.signing_type_name().as_bytes());
    buf
}

/// Sign a signable with a wrapped private key.
pub fn sign(private_key: &str, signable: &dyn Signable) -> Result<String, CryptoError> {
    let seed: [u8; SECRET_KEY_LEN] = unwrap_fixed(private_key, "ed25519-priv")?;
    let signing = SigningKey::from_bytes(&seed);
    let sig = signing.sign(&prepare_for_signing(signable));
    Ok(wrap(&sig.to_bytes(), "ed25519-sig"))
}

/// Verify a wrapped signature over a signable with a wrapped public key.
pub fn verify(public_key: &str, signable: &dyn Signable, signature: &str) -> Result<(), CryptoError> {
    let key: [u8; PUBLIC_KEY_LEN] = unwrap_fixed(public_key, "ed25519-pub")?;
    let verifying = VerifyingKey::from_bytes(&key).map_err(|_| CryptoError::InvalidPublicKey)?;

    let sig: [u8; SIGNATURE_LEN] = unwrap_fixed(signature, "ed25519-sig")?;
    let sig = ed25519_dalek::Signature::from_bytes(&sig);

    verifying
        .verify(&prepare_for_signing(signable), &sig)
        .map_err(|_| CryptoError::BadSignature)
}

/// A signer whose private key has been validated at construction, so
/// signing itself cannot fail.
pub struct Signer {
    private_key: String,
}

struct ProbeSignable;

impl Signable for ProbeSignable {
    fn signing_type_name(&self) -> &'static str {
        "test"
    }

    fn hash(&self) -> Hash {
        Hash::EMPTY
    }
}

impl Signer {
    pub fn new(private_key: &str) -> Result<Signer, CryptoError> {
        sign(private_key, &ProbeSignable)?;
        Ok(Signer { private_key: private_key.to_owned() })
    }

    pub fn sign(&self, signable: &dyn Signable) -> String {
        // Cannot fail: the key was exercised in new().
        sign(&self.private_key, signable).unwrap_or_default()
    }
}
