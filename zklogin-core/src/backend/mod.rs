//! Proving backends and the registry the orchestrator selects them from.
//!
//! Every backend receives the same [`AdaptedProofRequest`]; differences in what the backend
//! accepts (the width of binary inputs, the wire format) are resolved before or inside the
//! backend, never in the orchestrator.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use crate::{
    config::{BackendDescriptor, BackendTarget, ProverConfig},
    error::ZkLoginError,
    field,
    keys::EphemeralPublicKey,
    proof::ZkProof,
};

mod local;
mod mock;
mod remote;

pub use local::LocalBackend;
pub use mock::MockBackend;
pub use remote::RemoteBackend;

/// The kinds of proving backend a deployment can register.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    /// Witness generation and Groth16 proving on this host.
    Local,
    /// A remote proving service reached over HTTP.
    Remote,
    /// A fixed, structurally valid fake proof. Development only.
    Mock,
}

/// Width of the binary inputs (salt, randomness) a backend accepts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputWidth {
    /// The full 32 bytes.
    #[default]
    #[strum(to_string = "full32", serialize = "32")]
    Full32,
    /// Only the leading 16 bytes, for provers that reject wider inputs.
    #[strum(to_string = "truncated16", serialize = "16")]
    Truncated16,
}

impl InputWidth {
    /// Number of bytes kept.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Full32 => 32,
            Self::Truncated16 => 16,
        }
    }

    /// The value a backend of this width sees for a 32-byte input: the leading [`Self::bytes`]
    /// bytes, read as a big-endian integer and returned right-aligned in 32 bytes.
    ///
    /// Nonces and addresses are computed over this value so they match what the prover binds.
    #[must_use]
    pub fn narrow(self, value: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let keep = self.bytes();
        let mut narrowed = Zeroizing::new([0u8; 32]);
        narrowed[32 - keep..].copy_from_slice(&value[..keep]);
        narrowed
    }
}

/// The request shape every backend receives, already adapted to the backend's input width.
///
/// Serialized as the camelCase JSON body proving services accept.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptedProofRequest {
    /// The raw identity token.
    pub jwt: String,
    /// Base64 of the 33-byte extended ephemeral public key.
    pub extended_ephemeral_public_key: String,
    /// Max epoch as a decimal string.
    pub max_epoch: String,
    /// Randomness as a decimal field element.
    pub jwt_randomness: String,
    /// Salt as a decimal field element.
    pub salt: String,
    /// Claim the proof binds to.
    pub key_claim_name: String,
    /// OAuth client id.
    pub audience: String,
}

/// Validated inputs to [`AdaptedProofRequest::adapt`].
pub(crate) struct AdaptInputs<'a> {
    pub jwt: &'a str,
    pub public_key: &'a EphemeralPublicKey,
    pub max_epoch: u64,
    pub randomness: &'a [u8; 32],
    pub salt: &'a [u8; 32],
    pub key_claim_name: &'a str,
    pub audience: &'a str,
}

impl AdaptedProofRequest {
    /// Builds the backend request, narrowing binary inputs to `width`.
    ///
    /// Narrowing keeps the leading bytes (see [`InputWidth::narrow`]) and is logged with lengths
    /// only.
    pub(crate) fn adapt(inputs: &AdaptInputs<'_>, width: InputWidth) -> Self {
        let keep = width.bytes();
        if keep < inputs.salt.len() {
            warn!(
                from = inputs.salt.len(),
                to = keep,
                "truncating salt and randomness for backend input width"
            );
        }
        let randomness = width.narrow(inputs.randomness);
        let salt = width.narrow(inputs.salt);

        Self {
            jwt: inputs.jwt.to_string(),
            extended_ephemeral_public_key: inputs.public_key.to_extended_base64(),
            max_epoch: inputs.max_epoch.to_string(),
            jwt_randomness: field::to_decimal_string(randomness.as_slice()),
            salt: field::to_decimal_string(salt.as_slice()),
            key_claim_name: inputs.key_claim_name.to_string(),
            audience: inputs.audience.to_string(),
        }
    }
}

impl fmt::Debug for AdaptedProofRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptedProofRequest")
            .field("jwt_len", &self.jwt.len())
            .field(
                "extended_ephemeral_public_key",
                &self.extended_ephemeral_public_key,
            )
            .field("max_epoch", &self.max_epoch)
            .field("jwt_randomness", &"[REDACTED]")
            .field("salt", &"[REDACTED]")
            .field("key_claim_name", &self.key_claim_name)
            .field("audience", &self.audience)
            .finish()
    }
}

/// A proving backend.
///
/// Implementations report failures as the backend variants of [`ZkLoginError`]
/// (`BackendUnreachable`, `BackendTimeout`, `BackendRejected`, `MalformedProofResult`,
/// `ArtifactsMissing`) and must not retry or fall back on their own.
#[async_trait]
pub trait ProvingBackend: Send + Sync {
    /// Which kind of backend this is.
    fn kind(&self) -> BackendKind;

    /// The input width this backend accepts.
    fn input_width(&self) -> InputWidth {
        InputWidth::Full32
    }

    /// Produces a proof for `request`, giving up after `timeout`.
    async fn invoke(
        &self,
        request: &AdaptedProofRequest,
        timeout: Duration,
    ) -> Result<ZkProof, ZkLoginError>;
}

struct Registered {
    backend: Arc<dyn ProvingBackend>,
    timeout: Duration,
}

/// The backends enabled for this deployment, keyed by kind.
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Registered>,
    default: BackendKind,
}

impl BackendRegistry {
    /// An empty registry whose default is `default`. Register that backend before use.
    #[must_use]
    pub fn new(default: BackendKind) -> Self {
        Self {
            backends: HashMap::new(),
            default,
        }
    }

    /// Builds the registry described by a validated configuration.
    ///
    /// # Errors
    /// Returns `ZkLoginError::Internal` if the remote HTTP client cannot be built.
    pub fn from_config(config: &ProverConfig) -> Result<Self, ZkLoginError> {
        let mut registry = Self::new(config.default_backend);
        for descriptor in &config.backends {
            if descriptor.kind() == BackendKind::Mock && !config.enable_mock {
                continue;
            }
            registry = registry.with_backend(build_backend(descriptor)?, descriptor.timeout);
        }
        Ok(registry)
    }

    /// Registers (or replaces) a backend with its per-call timeout.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ProvingBackend>, timeout: Duration) -> Self {
        self.backends
            .insert(backend.kind(), Registered { backend, timeout });
        self
    }

    /// The deployment's default backend kind.
    #[must_use]
    pub const fn default_kind(&self) -> BackendKind {
        self.default
    }

    /// Whether a backend of this kind is registered.
    #[must_use]
    pub fn contains(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Kinds of every registered backend.
    #[must_use]
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.backends.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_ref().to_string());
        kinds
    }

    /// Resolves a selector (or the default, when absent) to a registered backend and its timeout.
    ///
    /// # Errors
    /// Returns `ZkLoginError::UnsupportedBackend` for an unknown selector or a backend that is not
    /// enabled in this deployment.
    pub fn select(
        &self,
        selector: Option<&str>,
    ) -> Result<(Arc<dyn ProvingBackend>, Duration), ZkLoginError> {
        let kind = match selector.map(str::trim).filter(|s| !s.is_empty()) {
            None => self.default,
            Some(selector) => selector
                .parse::<BackendKind>()
                .map_err(|_| ZkLoginError::UnsupportedBackend(selector.to_string()))?,
        };

        self.backends
            .get(&kind)
            .map(|registered| (Arc::clone(&registered.backend), registered.timeout))
            .ok_or_else(|| ZkLoginError::UnsupportedBackend(kind.to_string()))
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("default", &self.default)
            .field("backends", &self.kinds())
            .finish()
    }
}

fn build_backend(descriptor: &BackendDescriptor) -> Result<Arc<dyn ProvingBackend>, ZkLoginError> {
    let backend: Arc<dyn ProvingBackend> = match &descriptor.target {
        BackendTarget::Local {
            zkey_path,
            witness_generator,
            prover_binary,
        } => Arc::new(
            LocalBackend::new(zkey_path, witness_generator, prover_binary)
                .with_input_width(descriptor.input_width),
        ),
        BackendTarget::Remote { endpoint } => Arc::new(
            RemoteBackend::new(endpoint.clone())?.with_input_width(descriptor.input_width),
        ),
        BackendTarget::Mock => Arc::new(MockBackend),
    };
    Ok(backend)
}
