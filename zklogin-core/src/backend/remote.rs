use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use tracing::{info, warn};

use super::{AdaptedProofRequest, BackendKind, InputWidth, ProvingBackend};
use crate::{error::ZkLoginError, proof::ZkProof};

/// A remote proving service reached over HTTP.
///
/// Sets sensible defaults on every call (timeout, user-agent, JSON body). Calls are never retried:
/// a failed proof request is reported to the caller as-is.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: reqwest::Client,
    endpoint: String,
    input_width: InputWidth,
}

impl RemoteBackend {
    /// Creates a backend posting proof requests to `endpoint`.
    ///
    /// # Errors
    /// Returns `ZkLoginError::Internal` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ZkLoginError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("zklogin-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ZkLoginError::Internal(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            input_width: InputWidth::Full32,
        })
    }

    /// Overrides the input width.
    #[must_use]
    pub fn with_input_width(mut self, input_width: InputWidth) -> Self {
        self.input_width = input_width;
        self
    }

    /// Creates a request builder with defaults applied.
    fn req(&self, method: Method, timeout: Duration) -> RequestBuilder {
        self.client
            .request(method, &self.endpoint)
            .timeout(timeout)
            .header("Accept", "application/json")
    }

    /// Sends a request built by `req`, mapping transport failures.
    async fn handle(
        &self,
        request_builder: RequestBuilder,
        timeout: Duration,
    ) -> Result<Response, ZkLoginError> {
        request_builder.send().await.map_err(|err| {
            if err.is_timeout() {
                ZkLoginError::BackendTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                ZkLoginError::BackendUnreachable(format!("{}: {err}", self.endpoint))
            }
        })
    }
}

#[async_trait]
impl ProvingBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn input_width(&self) -> InputWidth {
        self.input_width
    }

    async fn invoke(
        &self,
        request: &AdaptedProofRequest,
        timeout: Duration,
    ) -> Result<ZkProof, ZkLoginError> {
        info!(endpoint = %self.endpoint, "requesting proof from remote prover");

        let response = self
            .handle(self.req(Method::POST, timeout).json(request), timeout)
            .await?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            if err.is_timeout() {
                ZkLoginError::BackendTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                ZkLoginError::BackendUnreachable(format!("failed to read response body: {err}"))
            }
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "remote prover rejected the request");
            return Err(ZkLoginError::BackendRejected {
                status: Some(status.as_u16()),
                body,
            });
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|_| {
            ZkLoginError::MalformedProofResult(format!(
                "response is not JSON: {}",
                body.chars().take(20).collect::<String>()
            ))
        })?;
        ZkProof::from_response(&value)
    }
}
