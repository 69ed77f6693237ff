//! Nonce binding between an ephemeral key and an OAuth identity token.
//!
//! The nonce commits to the ephemeral public key, the max-epoch and the randomness through a
//! Poseidon hash over the BN254 scalar field, the same field the zkLogin circuit works in.
//! Providers then either echo it verbatim or embed its SHA-256 digest.

use std::collections::HashMap;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use light_poseidon::{Poseidon, PoseidonHasher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{claims::IdentityToken, error::ZkLoginError, keys::EphemeralPublicKey};

/// Number of low-order bytes of the Poseidon digest kept in the nonce.
const NONCE_BYTES: usize = 20;

/// How an issuer embeds the caller-supplied nonce in its identity token.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NonceBindingPolicy {
    /// The token carries the nonce verbatim.
    Raw,
    /// The token carries the lowercase hex SHA-256 digest of the nonce.
    Sha256Hashed,
}

impl NonceBindingPolicy {
    /// The value a compliant token must carry for `expected_nonce` under this policy.
    #[must_use]
    pub fn transform(self, expected_nonce: &str) -> String {
        match self {
            Self::Raw => expected_nonce.to_string(),
            Self::Sha256Hashed => hex::encode(Sha256::digest(expected_nonce.as_bytes())),
        }
    }
}

/// Issuer-keyed nonce policies.
///
/// Adding a provider is a table entry, not a code path.
#[derive(Debug, Clone)]
pub struct NoncePolicyTable {
    exact: HashMap<String, NonceBindingPolicy>,
    prefixes: Vec<(String, NonceBindingPolicy)>,
}

impl Default for NoncePolicyTable {
    fn default() -> Self {
        let exact = [
            ("https://accounts.google.com", NonceBindingPolicy::Raw),
            ("accounts.google.com", NonceBindingPolicy::Raw),
            ("https://www.facebook.com", NonceBindingPolicy::Raw),
            ("https://id.twitch.tv/oauth2", NonceBindingPolicy::Raw),
            ("https://kauth.kakao.com", NonceBindingPolicy::Raw),
            ("https://slack.com", NonceBindingPolicy::Raw),
            ("https://appleid.apple.com", NonceBindingPolicy::Sha256Hashed),
        ]
        .into_iter()
        .map(|(issuer, policy)| (issuer.to_string(), policy))
        .collect();

        // Microsoft issuers embed the tenant id in the path.
        let prefixes = vec![(
            "https://login.microsoftonline.com/".to_string(),
            NonceBindingPolicy::Raw,
        )];

        Self { exact, prefixes }
    }
}

impl NoncePolicyTable {
    /// Registers (or overrides) the policy for an issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str, policy: NonceBindingPolicy) -> Self {
        self.exact.insert(normalize_issuer(issuer), policy);
        self
    }

    /// Looks up the policy for an issuer without defaulting.
    #[must_use]
    pub fn lookup(&self, issuer: &str) -> Option<NonceBindingPolicy> {
        let issuer = normalize_issuer(issuer);
        self.exact.get(&issuer).copied().or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| issuer.starts_with(prefix.as_str()))
                .map(|(_, policy)| *policy)
        })
    }

    /// Whether the issuer has an explicit table entry.
    #[must_use]
    pub fn is_recognized(&self, issuer: &str) -> bool {
        self.lookup(issuer).is_some()
    }

    /// The policy for an issuer. Unrecognized issuers fall back to `Raw` and are logged.
    #[must_use]
    pub fn policy_for(&self, issuer: &str) -> NonceBindingPolicy {
        self.lookup(issuer).unwrap_or_else(|| {
            warn!(issuer, "unrecognized issuer, assuming raw nonce binding");
            NonceBindingPolicy::Raw
        })
    }
}

fn normalize_issuer(issuer: &str) -> String {
    issuer.trim().trim_end_matches('/').to_string()
}

/// Computes the nonce a compliant OAuth flow must echo for this ephemeral key.
///
/// The extended public key (`0x00 || pk`, read as a big-endian integer) is split into its high and
/// low 128-bit halves; the randomness is reduced into the BN254 scalar field. Poseidon over
/// `[pk_high, pk_low, max_epoch, randomness]` yields a field element whose low 20 bytes,
/// base64url-encoded without padding, form the nonce (27 characters).
///
/// # Errors
/// Returns `ZkLoginError::Internal` if the Poseidon hasher cannot be built.
pub fn expected_nonce(
    public_key: &EphemeralPublicKey,
    max_epoch: u64,
    randomness: &[u8; 32],
) -> Result<String, ZkLoginError> {
    let extended = public_key.to_extended_bytes();
    let mut high = [0u8; 16];
    let mut low = [0u8; 16];
    // The leading byte is the zero scheme flag, so the integer fits in 256 bits.
    high.copy_from_slice(&extended[1..17]);
    low.copy_from_slice(&extended[17..33]);

    let inputs = [
        Fr::from(u128::from_be_bytes(high)),
        Fr::from(u128::from_be_bytes(low)),
        Fr::from(max_epoch),
        Fr::from_be_bytes_mod_order(randomness),
    ];

    let mut poseidon = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|err| ZkLoginError::Internal(format!("poseidon setup failed: {err}")))?;
    let digest = poseidon
        .hash(&inputs)
        .map_err(|err| ZkLoginError::Internal(format!("poseidon hash failed: {err}")))?;

    let bytes = digest.into_bigint().to_bytes_be();
    Ok(URL_SAFE_NO_PAD.encode(&bytes[bytes.len() - NONCE_BYTES..]))
}

/// Checks the token nonce against the expected raw nonce under `policy`.
///
/// A token without a nonce never verifies.
#[must_use]
pub fn verify(token: &IdentityToken, expected_raw_nonce: &str, policy: NonceBindingPolicy) -> bool {
    let Some(token_nonce) = token.nonce() else {
        return false;
    };
    let expected = policy.transform(expected_raw_nonce);
    let token_nonce = match policy {
        NonceBindingPolicy::Raw => token_nonce.to_string(),
        NonceBindingPolicy::Sha256Hashed => token_nonce.to_ascii_lowercase(),
    };
    token_nonce.as_bytes().ct_eq(expected.as_bytes()).into()
}
