//! Deterministic address derivation from an OAuth identity and a private salt.
//!
//! The same `(salt, subject, audience)` always yields the same address, which lets a user recover
//! their address on any device without the address itself ever being stored.

use blake2::{digest::consts::U32, Blake2b};
use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};

use crate::keys::ED25519_FLAG;

type Blake2b256 = Blake2b<U32>;

/// Derives the address for an identity.
///
/// SHA-256 over `salt || len(subject) || subject || len(audience) || audience` seeds an Ed25519
/// keypair; the address is the public-key address of that keypair (see [`public_key_address`]).
/// Lengths are `u64` big-endian, so no two `(subject, audience)` splits share a seed.
#[must_use]
pub fn derive(salt: &[u8; 32], subject: &str, audience: &str) -> String {
    let seed = address_seed(salt, subject, audience);
    let signing_key = SigningKey::from_bytes(&seed);
    public_key_address(&signing_key.verifying_key().to_bytes())
}

fn address_seed(salt: &[u8; 32], subject: &str, audience: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    for field in [subject, audience] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().into()
}

/// `0x`-prefixed hex of `BLAKE2b-256(0x00 || public_key)`.
#[must_use]
pub fn public_key_address(public_key: &[u8; 32]) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update([ED25519_FLAG]);
    hasher.update(public_key);
    format!("0x{}", hex::encode(hasher.finalize()))
}
