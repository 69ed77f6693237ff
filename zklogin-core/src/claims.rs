//! Identity token (JWT) claim extraction.
//!
//! Only structure is checked here. Signature verification belongs to the proving circuit, which
//! checks the token against the issuer's published keys.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde_json::{Map, Value};

use crate::error::ZkLoginError;

/// Claims every usable identity token must carry.
pub const REQUIRED_CLAIMS: [&str; 3] = ["iss", "sub", "aud"];

/// URL-safe base64 that tolerates both padded and unpadded segments.
const TOKEN_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A decoded OAuth identity token.
///
/// Request-scoped: built per call and dropped when the call completes. Claims are read from the
/// payload on demand, so an unusually typed claim only matters if something asks for it.
#[derive(Debug, Clone)]
pub struct IdentityToken {
    payload: Map<String, Value>,
}

impl IdentityToken {
    /// Splits and decodes a compact JWT.
    ///
    /// # Errors
    /// Returns `ZkLoginError::MalformedToken` if the token does not have exactly three segments or
    /// if the header or payload is not a base64url-encoded JSON object.
    pub fn parse(token: &str) -> Result<Self, ZkLoginError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        if segments.len() != 3 {
            return Err(ZkLoginError::MalformedToken(format!(
                "expected 3 segments, got {}",
                segments.len()
            )));
        }

        decode_segment(segments[0], "header")?;
        let payload = decode_segment(segments[1], "payload")?;

        Ok(Self { payload })
    }

    /// Asserts that every named claim is present and non-empty.
    ///
    /// # Errors
    /// Returns `ZkLoginError::MissingClaim` naming the first absent claim.
    pub fn require_claims(self, names: &[&str]) -> Result<Self, ZkLoginError> {
        for name in names {
            self.required(name)?;
        }
        Ok(self)
    }

    /// Returns the non-empty string value of a claim.
    ///
    /// # Errors
    /// Returns `ZkLoginError::MissingClaim` if the claim is absent or empty.
    pub fn required(&self, name: &str) -> Result<String, ZkLoginError> {
        self.claim_value(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ZkLoginError::MissingClaim(name.to_string()))
    }

    /// Returns the string form of any payload claim. `aud` arrays resolve to their first entry and
    /// numeric claims are rendered in decimal.
    #[must_use]
    pub fn claim_value(&self, name: &str) -> Option<String> {
        if name == "aud" {
            return self.audience().map(str::to_string);
        }
        match self.payload.get(name)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// The `aud` claim (first entry when the token carries several).
    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        match self.payload.get("aud")? {
            Value::String(aud) => Some(aud.as_str()),
            Value::Array(auds) => auds.first().and_then(Value::as_str),
            _ => None,
        }
    }

    /// The `nonce` claim.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.payload.get("nonce").and_then(Value::as_str)
    }
}

fn decode_segment(segment: &str, name: &str) -> Result<Map<String, Value>, ZkLoginError> {
    let bytes = TOKEN_SEGMENT.decode(segment).map_err(|err| {
        ZkLoginError::MalformedToken(format!("{name} is not valid base64url: {err}"))
    })?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ZkLoginError::MalformedToken(format!(
            "{name} is not a JSON object"
        ))),
        Err(err) => Err(ZkLoginError::MalformedToken(format!(
            "{name} is not valid JSON: {err}"
        ))),
    }
}
