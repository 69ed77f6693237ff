//! Request shapes accepted by the orchestrator.
//!
//! These are request-scoped: created per call and dropped once the call completes.

use std::fmt;

use base64::Engine;
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::{error::ZkLoginError, BASE64_LENIENT};

/// Claim used to bind the proof when the caller does not name one.
pub const DEFAULT_KEY_CLAIM_NAME: &str = "sub";

/// Expected decoded length of salt and randomness.
pub const SECRET_INPUT_LENGTH: usize = 32;

/// `maxEpoch` may arrive as a JSON number or a decimal string.
#[derive(Clone, Deserialize)]
#[serde(untagged)]
pub enum EpochInput {
    /// Numeric form.
    Number(u64),
    /// Decimal string form.
    Text(String),
}

impl EpochInput {
    pub(crate) fn parse(&self) -> Result<u64, ZkLoginError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Text(text) => text.trim().parse().map_err(|_| {
                ZkLoginError::invalid_input("maxEpoch", "must be an unsigned integer")
            }),
        }
    }
}

impl From<u64> for EpochInput {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

/// A request to generate a zkLogin proof.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    /// The raw OAuth identity token.
    #[serde(default)]
    pub jwt: String,
    /// Base64 ephemeral public key, raw (32 bytes) or extended (33 bytes).
    #[serde(default, alias = "ephemeralPublicKey")]
    pub extended_ephemeral_public_key: Option<String>,
    /// Upper bound on the proof's validity, in chain epochs.
    #[serde(default)]
    pub max_epoch: Option<EpochInput>,
    /// Base64 of the 32-byte nonce randomness.
    #[serde(default, alias = "jwtRandomness")]
    pub randomness: Option<String>,
    /// Base64 of the 32-byte user salt.
    #[serde(default)]
    pub salt: Option<String>,
    /// Claim the address binds to. Defaults to `sub`.
    #[serde(default)]
    pub key_claim_name: Option<String>,
    /// OAuth client id the token was issued for.
    #[serde(default)]
    pub audience: Option<String>,
    /// Backend selector (`local`, `remote`, `mock`). Defaults to the deployment default.
    #[serde(default)]
    pub backend: Option<String>,
    /// Session holding the ephemeral key, as an alternative to passing the public key.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl fmt::Debug for ProofRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofRequest")
            .field("jwt_len", &self.jwt.len())
            .field(
                "extended_ephemeral_public_key",
                &self.extended_ephemeral_public_key,
            )
            .field("max_epoch", &self.max_epoch.as_ref().map(|_| "<set>"))
            .field("randomness_len", &self.randomness.as_ref().map(String::len))
            .field("salt_len", &self.salt.as_ref().map(String::len))
            .field("key_claim_name", &self.key_claim_name)
            .field("audience", &self.audience)
            .field("backend", &self.backend)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// A request for the nonce a client must pass to the OAuth authorization endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceRequest {
    /// Base64 ephemeral public key.
    #[serde(default, alias = "ephemeralPublicKey")]
    pub extended_ephemeral_public_key: Option<String>,
    /// Session holding the ephemeral key.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Upper bound on the proof's validity, in chain epochs.
    #[serde(default)]
    pub max_epoch: Option<EpochInput>,
    /// Base64 of the 32-byte randomness.
    #[serde(default, alias = "jwtRandomness")]
    pub randomness: Option<String>,
    /// Backend that will prove the request; its input width applies. Defaults to the deployment
    /// default.
    #[serde(default)]
    pub backend: Option<String>,
}

/// A request for the address of an identity, independent of any proof.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    /// The raw OAuth identity token.
    #[serde(default)]
    pub jwt: String,
    /// Base64 of the 32-byte user salt.
    #[serde(default)]
    pub salt: Option<String>,
    /// Claim the address binds to. Defaults to `sub`.
    #[serde(default)]
    pub key_claim_name: Option<String>,
    /// Backend that will prove for this identity; its input width applies to the salt.
    #[serde(default)]
    pub backend: Option<String>,
}

impl fmt::Debug for AddressRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressRequest")
            .field("jwt_len", &self.jwt.len())
            .field("salt_len", &self.salt.as_ref().map(String::len))
            .field("key_claim_name", &self.key_claim_name)
            .field("backend", &self.backend)
            .finish()
    }
}

impl fmt::Debug for EpochInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text:?}"),
        }
    }
}

/// Decodes a base64 secret input that must be exactly 32 bytes.
///
/// The decoded bytes are zeroized when dropped; errors carry only lengths.
pub(crate) fn decode_secret_input(
    field: &'static str,
    value: Option<&str>,
) -> Result<Zeroizing<[u8; SECRET_INPUT_LENGTH]>, ZkLoginError> {
    let value = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ZkLoginError::invalid_input(field, "is required"))?;

    let decoded = Zeroizing::new(
        BASE64_LENIENT
            .decode(value)
            .map_err(|_| ZkLoginError::invalid_input(field, "is not valid base64"))?,
    );

    if decoded.len() != SECRET_INPUT_LENGTH {
        return Err(ZkLoginError::InvalidFieldLength {
            field,
            expected: SECRET_INPUT_LENGTH,
            actual: decoded.len(),
        });
    }

    let mut out = Zeroizing::new([0u8; SECRET_INPUT_LENGTH]);
    out.copy_from_slice(&decoded);
    Ok(out)
}

/// Returns the trimmed value of a required, non-empty text field.
pub(crate) fn required_text<'a>(
    field: &str,
    value: Option<&'a str>,
) -> Result<&'a str, ZkLoginError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ZkLoginError::invalid_input(field, "is required"))
}
