//! Keytree Crypto
//!
//! Centralized cryptographic operations for keytree:
//! - **Hash**: 256-bit value with MSB-first bit access and canonical base32
//! - **Hasher**: incremental SHA-256 with the canonical field encodings
//! - **Signable**: typed Ed25519 signing and verification of content hashes
//! - **base32**: the keytree alphabet with strict canonical decoding
//!
//! All Ed25519 signing, verification, and SHA-256 hashing should go through
//! this crate. This provides a single audit surface for cryptographic
//! correctness.

pub mod base32;
mod hash;
mod sign;

pub use hash::{combine, first_difference, hash_string, Hash, Hasher, HASH_BITS, HASH_LEN};
pub use sign::{
    generate_ed25519_keypair, sign, verify, CryptoError, Signable, Signer,
};
