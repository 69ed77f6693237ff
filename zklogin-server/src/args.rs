//! Command-line and environment configuration for the server.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use eyre::{bail, WrapErr as _};
use zklogin_core::{
    BackendDescriptor, BackendKind, BackendTarget, InputWidth, ProverConfig,
};

/// zkLogin proof service.
#[derive(Debug, Clone, Parser)]
#[command(name = "zklogin-server", version, about)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "ZKLOGIN_LISTEN_ADDR", default_value = "0.0.0.0:3001")]
    pub listen_addr: SocketAddr,

    /// Backend used when a request does not name one (`local`, `remote` or `mock`).
    #[arg(long, env = "ZKLOGIN_BACKEND", default_value = "remote")]
    pub backend: BackendKind,

    /// Endpoint of the remote prover. Enables the `remote` backend.
    #[arg(long, env = "ZKLOGIN_PROVER_URL")]
    pub prover_url: Option<String>,

    /// Input width the remote prover accepts (`full32` or `truncated16`).
    #[arg(long, env = "ZKLOGIN_PROVER_INPUT_WIDTH", default_value = "full32")]
    pub prover_input_width: InputWidth,

    /// Groth16 proving key. With the two executables below, enables the `local` backend.
    #[arg(long, env = "ZKLOGIN_ZKEY_PATH")]
    pub zkey_path: Option<PathBuf>,

    /// Witness generator executable.
    #[arg(long, env = "ZKLOGIN_WITNESS_GENERATOR")]
    pub witness_generator: Option<PathBuf>,

    /// Groth16 prover executable.
    #[arg(long, env = "ZKLOGIN_PROVER_BINARY")]
    pub prover_binary: Option<PathBuf>,

    /// Per-call backend timeout in milliseconds.
    #[arg(long, env = "ZKLOGIN_TIMEOUT_MS", default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Register the mock backend. Never enable in production.
    #[arg(long, env = "ZKLOGIN_ENABLE_MOCK")]
    pub enable_mock: bool,

    /// Comma-separated CORS origins; `*` allows any origin.
    #[arg(long, env = "ZKLOGIN_ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub allowed_origins: Vec<String>,

    /// Comma-separated issuers that embed `sha256(nonce)` in addition to the built-in ones.
    #[arg(long, env = "ZKLOGIN_HASHED_NONCE_ISSUERS", value_delimiter = ',')]
    pub hashed_nonce_issuers: Vec<String>,

    /// Lifetime of ephemeral key sessions, in seconds.
    #[arg(long, env = "ZKLOGIN_SESSION_TTL_SECS", default_value_t = 600)]
    pub session_ttl_secs: u64,

    /// Interval between sweeps of expired sessions, in seconds.
    #[arg(long, env = "ZKLOGIN_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "ZKLOGIN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Builds and validates the prover configuration.
    ///
    /// # Errors
    /// Fails on partial local artifact configuration or when the configuration does not validate,
    /// for example a `remote` default without a prover URL.
    pub fn prover_config(&self) -> eyre::Result<ProverConfig> {
        let timeout = Duration::from_millis(self.timeout_ms);
        let mut backends = Vec::new();

        if let Some(endpoint) = &self.prover_url {
            backends.push(
                BackendDescriptor::new(BackendTarget::Remote {
                    endpoint: endpoint.clone(),
                })
                .with_timeout(timeout)
                .with_input_width(self.prover_input_width),
            );
        }

        match (&self.zkey_path, &self.witness_generator, &self.prover_binary) {
            (Some(zkey_path), Some(witness_generator), Some(prover_binary)) => backends.push(
                BackendDescriptor::new(BackendTarget::Local {
                    zkey_path: zkey_path.clone(),
                    witness_generator: witness_generator.clone(),
                    prover_binary: prover_binary.clone(),
                })
                .with_timeout(timeout),
            ),
            (None, None, None) => {}
            _ => bail!(
                "the local backend needs ZKLOGIN_ZKEY_PATH, ZKLOGIN_WITNESS_GENERATOR and ZKLOGIN_PROVER_BINARY together"
            ),
        }

        if self.enable_mock {
            backends.push(BackendDescriptor::new(BackendTarget::Mock));
        }

        let config = ProverConfig {
            default_backend: self.backend,
            backends,
            enable_mock: self.enable_mock,
            hashed_nonce_issuers: self
                .hashed_nonce_issuers
                .iter()
                .map(|issuer| issuer.trim().to_string())
                .filter(|issuer| !issuer.is_empty())
                .collect(),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
        };
        config
            .validate()
            .wrap_err("invalid prover configuration")?;
        Ok(config)
    }

    /// Interval between session sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
