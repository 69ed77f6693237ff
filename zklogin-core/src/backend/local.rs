use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{AdaptedProofRequest, BackendKind, InputWidth, ProvingBackend};
use crate::{error::ZkLoginError, proof::ZkProof};

/// Proves on this host by running a witness generator followed by a Groth16 prover.
///
/// Every invocation works in its own temporary directory, which is removed when the call
/// completes, fails or is cancelled. Child processes are killed if the call is dropped.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    zkey_path: PathBuf,
    witness_generator: PathBuf,
    prover_binary: PathBuf,
    input_width: InputWidth,
}

impl LocalBackend {
    /// Creates a local backend from its three artifacts.
    #[must_use]
    pub fn new(
        zkey_path: impl Into<PathBuf>,
        witness_generator: impl Into<PathBuf>,
        prover_binary: impl Into<PathBuf>,
    ) -> Self {
        Self {
            zkey_path: zkey_path.into(),
            witness_generator: witness_generator.into(),
            prover_binary: prover_binary.into(),
            input_width: InputWidth::Full32,
        }
    }

    /// Overrides the input width.
    #[must_use]
    pub fn with_input_width(mut self, input_width: InputWidth) -> Self {
        self.input_width = input_width;
        self
    }

    /// Paths of the artifacts that are not present on disk.
    pub async fn missing_artifacts(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for path in [&self.zkey_path, &self.witness_generator, &self.prover_binary] {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                missing.push(path.display().to_string());
            }
        }
        missing
    }

    async fn prove(&self, request: &AdaptedProofRequest) -> Result<ZkProof, ZkLoginError> {
        let missing = self.missing_artifacts().await;
        if !missing.is_empty() {
            return Err(ZkLoginError::ArtifactsMissing(missing));
        }

        let workdir = tempfile::Builder::new()
            .prefix("zklogin-proof-")
            .tempdir()
            .map_err(|err| ZkLoginError::Internal(format!("failed to create workdir: {err}")))?;
        let input = workdir.path().join("input.json");
        let witness = workdir.path().join("witness.wtns");
        let proof = workdir.path().join("proof.json");
        let public = workdir.path().join("public.json");

        let body = serde_json::to_vec(request)
            .map_err(|err| ZkLoginError::Internal(format!("failed to encode input: {err}")))?;
        tokio::fs::write(&input, body)
            .await
            .map_err(|err| ZkLoginError::Internal(format!("failed to write input: {err}")))?;

        debug!("generating witness");
        run(&self.witness_generator, &[input.as_path(), witness.as_path()]).await?;

        debug!("running groth16 prover");
        run(
            &self.prover_binary,
            &[
                self.zkey_path.as_path(),
                witness.as_path(),
                proof.as_path(),
                public.as_path(),
            ],
        )
        .await?;

        let raw = tokio::fs::read(&proof).await.map_err(|err| {
            ZkLoginError::MalformedProofResult(format!("prover wrote no proof: {err}"))
        })?;
        let value: serde_json::Value = serde_json::from_slice(&raw).map_err(|_| {
            ZkLoginError::MalformedProofResult(format!(
                "proof is not JSON: {}",
                String::from_utf8_lossy(&raw).chars().take(20).collect::<String>()
            ))
        })?;

        ZkProof::from_response(&value)
    }
}

/// Runs one pipeline step to completion.
async fn run(program: &Path, args: &[&Path]) -> Result<(), ZkLoginError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| {
            ZkLoginError::BackendUnreachable(format!("failed to run {}: {err}", program.display()))
        })?;

    if !output.status.success() {
        return Err(ZkLoginError::BackendRejected {
            status: None,
            body: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ProvingBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn input_width(&self) -> InputWidth {
        self.input_width
    }

    async fn invoke(
        &self,
        request: &AdaptedProofRequest,
        timeout: Duration,
    ) -> Result<ZkProof, ZkLoginError> {
        info!(zkey = %self.zkey_path.display(), "proving locally");
        tokio::time::timeout(timeout, self.prove(request))
            .await
            .map_err(|_| ZkLoginError::BackendTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }
}
