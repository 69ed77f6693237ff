use serde::Serialize;
use thiserror::Error;

use crate::nonce::NonceBindingPolicy;

/// Stable, machine-readable error codes returned to callers.
///
/// The serialized form (`SCREAMING_SNAKE_CASE`) is part of the public HTTP contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The identity token is not a three-segment JWT with JSON header and payload.
    MalformedToken,
    /// A required claim is absent or empty.
    MissingClaim,
    /// A binary field (salt, randomness, public key) decoded to the wrong length.
    InvalidFieldLength,
    /// A request field is missing, empty or not decodable.
    InvalidInput,
    /// The token nonce does not match the expected nonce under the issuer's policy.
    NonceMismatch,
    /// The referenced ephemeral key session does not exist or has expired.
    SessionNotFound,
    /// The supplied ephemeral public key differs from the key held for the session.
    KeyMismatch,
    /// The requested proving backend is unknown or not enabled.
    UnsupportedBackend,
    /// Local proving artifacts are not present at their configured paths.
    ArtifactsMissing,
    /// The proving backend could not be reached.
    BackendUnreachable,
    /// The proving backend did not answer within its timeout.
    BackendTimeout,
    /// The proving backend answered with a failure.
    BackendRejected,
    /// The proving backend reported success but the proof is structurally invalid.
    MalformedProofResult,
    /// An unexpected internal failure.
    Internal,
}

/// Error outputs from `zklogin-core`.
#[derive(Debug, Error)]
pub enum ZkLoginError {
    /// The identity token could not be split or decoded.
    #[error("malformed identity token: {0}")]
    MalformedToken(String),
    /// A required claim is absent from the identity token.
    #[error("missing required claim `{0}`")]
    MissingClaim(String),
    /// A binary input has the wrong decoded length.
    #[error("invalid length for `{field}`: expected {expected} bytes, got {actual}")]
    InvalidFieldLength {
        /// Name of the offending field.
        field: &'static str,
        /// Expected decoded length.
        expected: usize,
        /// Actual decoded length.
        actual: usize,
    },
    /// The presented input is not valid for the requested operation.
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// The attribute that is invalid.
        attribute: String,
        /// The reason the input is invalid.
        reason: String,
    },
    /// The token nonce does not bind the presented ephemeral key.
    #[error("nonce mismatch for issuer `{issuer}` under {policy} policy")]
    NonceMismatch {
        /// Issuer of the token.
        issuer: String,
        /// Policy that was applied.
        policy: NonceBindingPolicy,
    },
    /// No live ephemeral key is held for the session.
    #[error("ephemeral key session not found or expired")]
    SessionNotFound,
    /// The request public key does not match the session key.
    #[error("ephemeral public key does not match the session key")]
    KeyMismatch,
    /// The requested backend is unknown or disabled.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),
    /// Local proving artifacts are missing.
    #[error("proving artifacts missing: {}", .0.join(", "))]
    ArtifactsMissing(Vec<String>),
    /// Transport-level failure reaching the backend.
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),
    /// The backend exceeded its timeout.
    #[error("backend timed out after {timeout_ms} ms")]
    BackendTimeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// The backend answered with a failure.
    #[error("backend rejected the request{}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    BackendRejected {
        /// Upstream HTTP status, when the backend is remote.
        status: Option<u16>,
        /// Raw upstream diagnostic.
        body: String,
    },
    /// The backend returned a proof with the wrong shape.
    #[error("malformed proof result: {0}")]
    MalformedProofResult(String),
    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ZkLoginError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedToken(_) => ErrorKind::MalformedToken,
            Self::MissingClaim(_) => ErrorKind::MissingClaim,
            Self::InvalidFieldLength { .. } => ErrorKind::InvalidFieldLength,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::NonceMismatch { .. } => ErrorKind::NonceMismatch,
            Self::SessionNotFound => ErrorKind::SessionNotFound,
            Self::KeyMismatch => ErrorKind::KeyMismatch,
            Self::UnsupportedBackend(_) => ErrorKind::UnsupportedBackend,
            Self::ArtifactsMissing(_) => ErrorKind::ArtifactsMissing,
            Self::BackendUnreachable(_) => ErrorKind::BackendUnreachable,
            Self::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            Self::BackendRejected { .. } => ErrorKind::BackendRejected,
            Self::MalformedProofResult(_) => ErrorKind::MalformedProofResult,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error was raised while validating the request, before any backend was invoked.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::MissingClaim(_)
                | Self::InvalidFieldLength { .. }
                | Self::InvalidInput { .. }
                | Self::NonceMismatch { .. }
                | Self::SessionNotFound
                | Self::KeyMismatch
                | Self::UnsupportedBackend(_)
        )
    }

    /// Raw upstream diagnostic attached to backend failures.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::ArtifactsMissing(paths) => Some(paths.join(", ")),
            Self::BackendUnreachable(detail) | Self::MalformedProofResult(detail) => {
                Some(detail.clone())
            }
            Self::BackendRejected { body, .. } => Some(body.clone()),
            _ => None,
        }
    }

    pub(crate) fn invalid_input(attribute: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}
