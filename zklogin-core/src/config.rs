//! Deployment configuration for the prover: which backends exist, which one is the default, and
//! which issuers hash their nonces.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{
    backend::{BackendKind, InputWidth},
    nonce::{NonceBindingPolicy, NoncePolicyTable},
};

/// Default per-call backend timeout.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default lifetime of an ephemeral key session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

/// Errors raised while validating a [`ProverConfig`]. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The default backend is not among the configured backends.
    #[error("default backend `{0}` is not configured")]
    DefaultNotConfigured(BackendKind),
    /// The mock backend is configured while mocks are disabled.
    #[error("the mock backend requires mocks to be explicitly enabled")]
    MockDisabled,
    /// The remote endpoint is not a usable URL.
    #[error("invalid remote prover endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint {
        /// The configured endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A backend kind appears more than once.
    #[error("backend `{0}` is configured more than once")]
    DuplicateBackend(BackendKind),
    /// A backend timeout of zero.
    #[error("backend `{0}` has a zero timeout")]
    ZeroTimeout(BackendKind),
    /// A configured backend could not be constructed.
    #[error("failed to initialize backend: {0}")]
    BackendInit(String),
}

/// Where a backend lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
    /// Proving on this host.
    Local {
        /// Groth16 proving key.
        zkey_path: PathBuf,
        /// Witness generator executable: `<generator> <input.json> <witness.wtns>`.
        witness_generator: PathBuf,
        /// Prover executable: `<prover> <zkey> <witness.wtns> <proof.json> <public.json>`.
        prover_binary: PathBuf,
    },
    /// A remote proving service.
    Remote {
        /// Full URL the proof request is POSTed to.
        endpoint: String,
    },
    /// The fixed fake proof.
    Mock,
}

/// One configured backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Where the backend lives.
    pub target: BackendTarget,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Width of the binary inputs the backend accepts.
    pub input_width: InputWidth,
}

impl BackendDescriptor {
    /// A descriptor with the default timeout and full input width.
    #[must_use]
    pub const fn new(target: BackendTarget) -> Self {
        Self {
            target,
            timeout: DEFAULT_BACKEND_TIMEOUT,
            input_width: InputWidth::Full32,
        }
    }

    /// Overrides the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the input width.
    #[must_use]
    pub fn with_input_width(mut self, input_width: InputWidth) -> Self {
        self.input_width = input_width;
        self
    }

    /// The kind of backend this descriptor produces.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self.target {
            BackendTarget::Local { .. } => BackendKind::Local,
            BackendTarget::Remote { .. } => BackendKind::Remote,
            BackendTarget::Mock => BackendKind::Mock,
        }
    }
}

/// Everything the orchestrator needs to know about a deployment.
#[derive(Debug, Clone)]
pub struct ProverConfig {
    /// Backend used when a request does not name one.
    pub default_backend: BackendKind,
    /// Configured backends.
    pub backends: Vec<BackendDescriptor>,
    /// Whether the mock backend may be registered at all.
    pub enable_mock: bool,
    /// Extra issuers (beyond the built-in table) that embed `sha256(nonce)`.
    pub hashed_nonce_issuers: Vec<String>,
    /// Lifetime of sessions issued by the key store.
    pub session_ttl: Duration,
}

impl ProverConfig {
    /// A configuration with a single backend as the default.
    #[must_use]
    pub fn single(descriptor: BackendDescriptor) -> Self {
        let enable_mock = descriptor.kind() == BackendKind::Mock;
        Self {
            default_backend: descriptor.kind(),
            backends: vec![descriptor],
            enable_mock,
            hashed_nonce_issuers: Vec::new(),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Checks the configuration for problems that would otherwise surface at request time.
    ///
    /// # Errors
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = Vec::with_capacity(self.backends.len());
        for descriptor in &self.backends {
            let kind = descriptor.kind();
            if seen.contains(&kind) {
                return Err(ConfigError::DuplicateBackend(kind));
            }
            seen.push(kind);

            if descriptor.timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(kind));
            }

            match &descriptor.target {
                BackendTarget::Mock if !self.enable_mock => return Err(ConfigError::MockDisabled),
                BackendTarget::Remote { endpoint } => validate_endpoint(endpoint)?,
                _ => {}
            }
        }

        if !seen.contains(&self.default_backend) {
            return Err(ConfigError::DefaultNotConfigured(self.default_backend));
        }
        Ok(())
    }

    /// The nonce policy table: built-in providers plus the configured hashed-nonce issuers.
    #[must_use]
    pub fn nonce_policies(&self) -> NoncePolicyTable {
        self.hashed_nonce_issuers
            .iter()
            .fold(NoncePolicyTable::default(), |table, issuer| {
                table.with_issuer(issuer, NonceBindingPolicy::Sha256Hashed)
            })
    }
}

/// Plain HTTP is only accepted for loopback endpoints.
fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = reqwest::Url::parse(endpoint).map_err(|_| invalid("not a valid URL"))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" => match url.host_str() {
            Some("localhost" | "127.0.0.1" | "[::1]") => Ok(()),
            _ => Err(invalid("plain http is only allowed for loopback hosts")),
        },
        _ => Err(invalid("scheme must be https")),
    }
}
