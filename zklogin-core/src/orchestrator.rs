//! The per-request proof state machine.
//!
//! `Received -> Validated -> BackendSelected -> BackendInvoked -> {Succeeded | Failed}`
//!
//! Validation runs to completion before any backend is touched. Backend failures are reported as
//! they are: no retries, no fan-out, no fallback to another backend.

use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::{
    address,
    backend::{AdaptInputs, AdaptedProofRequest, BackendKind, BackendRegistry, InputWidth},
    claims::{IdentityToken, REQUIRED_CLAIMS},
    config::{ConfigError, ProverConfig, DEFAULT_SESSION_TTL},
    error::ZkLoginError,
    key_store::{EphemeralKeyStore, IssuedKey},
    keys::EphemeralPublicKey,
    nonce::{self, NoncePolicyTable},
    proof::ProofResult,
    request::{
        decode_secret_input, required_text, AddressRequest, NonceRequest, ProofRequest,
        DEFAULT_KEY_CLAIM_NAME, SECRET_INPUT_LENGTH,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
enum RequestState {
    Received,
    Validated,
    BackendSelected(BackendKind),
    BackendInvoked(BackendKind),
    Succeeded,
    Failed,
}

impl RequestState {
    fn advance(&mut self, next: Self) {
        debug!(from = %self, to = %next, "proof request transition");
        *self = next;
    }
}

/// A request that passed validation. Secret inputs are zeroized on drop.
struct ValidatedRequest {
    jwt: String,
    public_key: EphemeralPublicKey,
    max_epoch: u64,
    randomness: Zeroizing<[u8; SECRET_INPUT_LENGTH]>,
    salt: Zeroizing<[u8; SECRET_INPUT_LENGTH]>,
    key_claim_name: String,
    key_claim_value: String,
    audience: String,
    width: InputWidth,
}

impl ValidatedRequest {
    fn address(&self) -> String {
        address::derive(
            &self.width.narrow(&self.salt),
            &self.key_claim_value,
            &self.audience,
        )
    }

    fn adapt_inputs(&self) -> AdaptInputs<'_> {
        AdaptInputs {
            jwt: &self.jwt,
            public_key: &self.public_key,
            max_epoch: self.max_epoch,
            randomness: &self.randomness,
            salt: &self.salt,
            key_claim_name: &self.key_claim_name,
            audience: &self.audience,
        }
    }
}

/// Validates proof requests, binds them to their ephemeral key and dispatches them to a backend.
pub struct ProofOrchestrator {
    registry: BackendRegistry,
    policies: NoncePolicyTable,
    key_store: Arc<dyn EphemeralKeyStore>,
    session_ttl: Duration,
}

impl ProofOrchestrator {
    /// Creates an orchestrator from its parts.
    #[must_use]
    pub fn new(
        registry: BackendRegistry,
        policies: NoncePolicyTable,
        key_store: Arc<dyn EphemeralKeyStore>,
    ) -> Self {
        Self {
            registry,
            policies,
            key_store,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Validates `config` and builds the orchestrator it describes.
    ///
    /// # Errors
    /// Returns the `ConfigError` found by validation, or `ConfigError::BackendInit` if a backend
    /// cannot be constructed.
    pub fn from_config(
        config: &ProverConfig,
        key_store: Arc<dyn EphemeralKeyStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = BackendRegistry::from_config(config)
            .map_err(|err| ConfigError::BackendInit(err.to_string()))?;
        Ok(Self::new(registry, config.nonce_policies(), key_store).with_session_ttl(config.session_ttl))
    }

    /// Overrides the lifetime of issued sessions.
    #[must_use]
    pub fn with_session_ttl(mut self, session_ttl: Duration) -> Self {
        self.session_ttl = session_ttl;
        self
    }

    /// The registered backends.
    #[must_use]
    pub const fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// The ephemeral key store.
    #[must_use]
    pub fn key_store(&self) -> &dyn EphemeralKeyStore {
        self.key_store.as_ref()
    }

    /// Runs a proof request through validation, backend selection and invocation.
    ///
    /// Never panics and never returns early without a result: every failure is reported in the
    /// returned envelope with its stable error code.
    pub async fn generate_proof(&self, request: &ProofRequest) -> ProofResult {
        let mut state = RequestState::Received;

        let validated = match self.validate(request) {
            Ok(validated) => validated,
            Err(err) => {
                state.advance(RequestState::Failed);
                warn!(code = %err.kind(), "proof request rejected: {err}");
                return ProofResult::failed(None, None, err);
            }
        };
        state.advance(RequestState::Validated);

        let address = validated.address();

        let (backend, timeout) = match self.registry.select(request.backend.as_deref()) {
            Ok(selected) => selected,
            Err(err) => {
                state.advance(RequestState::Failed);
                warn!(code = %err.kind(), "proof request rejected: {err}");
                return ProofResult::failed(None, Some(address), err);
            }
        };
        let kind = backend.kind();
        state.advance(RequestState::BackendSelected(kind));
        info!(backend = %kind, ?timeout, "invoking proving backend");

        let adapted = AdaptedProofRequest::adapt(&validated.adapt_inputs(), validated.width);
        drop(validated);

        state.advance(RequestState::BackendInvoked(kind));
        let outcome = tokio::time::timeout(timeout, backend.invoke(&adapted, timeout))
            .await
            .unwrap_or_else(|_| {
                Err(ZkLoginError::BackendTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            });

        match outcome {
            Ok(proof) => {
                state.advance(RequestState::Succeeded);
                info!(backend = %kind, "proof generated");
                ProofResult::succeeded(kind, address, proof)
            }
            Err(err) => {
                state.advance(RequestState::Failed);
                error!(backend = %kind, code = %err.kind(), "proof generation failed: {err}");
                ProofResult::failed(Some(kind), Some(address), err)
            }
        }
    }

    /// Computes the nonce a client must send to the OAuth provider for a given ephemeral key.
    ///
    /// The randomness is narrowed to the input width of the backend that will prove the request.
    ///
    /// # Errors
    /// Returns a validation error if the key cannot be resolved, the named backend is not
    /// enabled, or an input is missing or malformed.
    pub fn compute_nonce(&self, request: &NonceRequest) -> Result<String, ZkLoginError> {
        let width = self.requested_input_width(request.backend.as_deref())?;
        let supplied_key = supplied_public_key(request.extended_ephemeral_public_key.as_deref())?;
        let randomness = decode_secret_input("randomness", request.randomness.as_deref())?;
        let max_epoch = request
            .max_epoch
            .as_ref()
            .ok_or_else(|| ZkLoginError::invalid_input("maxEpoch", "is required"))?
            .parse()?;
        let public_key = self.resolve_public_key(request.session_id.as_deref(), supplied_key)?;

        nonce::expected_nonce(&public_key, max_epoch, &width.narrow(&randomness))
    }

    /// Derives the address for the identity in a token, without generating a proof.
    ///
    /// # Errors
    /// Returns a validation error if the token, the key claim or the salt is invalid, or the named
    /// backend is not enabled.
    pub fn derive_address(&self, request: &AddressRequest) -> Result<String, ZkLoginError> {
        let width = self.requested_input_width(request.backend.as_deref())?;
        let key_claim_name = key_claim_name(request.key_claim_name.as_deref());
        let token = IdentityToken::parse(&request.jwt)?.require_claims(&REQUIRED_CLAIMS)?;
        let key_claim_value = token.required(key_claim_name)?;
        let salt = decode_secret_input("salt", request.salt.as_deref())?;
        let audience = token.required("aud")?;

        Ok(address::derive(&width.narrow(&salt), &key_claim_value, &audience))
    }

    /// Issues a fresh ephemeral key session. `ttl` defaults to the configured session lifetime.
    pub fn issue_session(&self, ttl: Option<Duration>) -> IssuedKey {
        let issued = self.key_store.issue(ttl.unwrap_or(self.session_ttl));
        info!(expires_at = issued.expires_at, "issued ephemeral key session");
        issued
    }

    /// Ends a session. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.key_store.delete(session_id)
    }

    /// Drops expired sessions. Returns how many were removed.
    pub fn sweep_expired_sessions(&self) -> usize {
        self.key_store.sweep_expired()
    }

    fn validate(&self, request: &ProofRequest) -> Result<ValidatedRequest, ZkLoginError> {
        let token = IdentityToken::parse(&request.jwt)?.require_claims(&REQUIRED_CLAIMS)?;

        let key_claim_name = key_claim_name(request.key_claim_name.as_deref());
        let key_claim_value = token.required(key_claim_name)?;

        let supplied_key = supplied_public_key(request.extended_ephemeral_public_key.as_deref())?;
        let salt = decode_secret_input("salt", request.salt.as_deref())?;
        let randomness = decode_secret_input("randomness", request.randomness.as_deref())?;

        let max_epoch = request
            .max_epoch
            .as_ref()
            .ok_or_else(|| ZkLoginError::invalid_input("maxEpoch", "is required"))?
            .parse()?;
        let audience = required_text("audience", request.audience.as_deref())?;
        if token.audience().map(str::trim) != Some(audience) {
            return Err(ZkLoginError::invalid_input(
                "audience",
                "does not match the token audience",
            ));
        }

        let public_key = self.resolve_public_key(request.session_id.as_deref(), supplied_key)?;

        // an unusable selector fails at selection, after validation
        let width = self
            .registry
            .select(request.backend.as_deref())
            .map_or(InputWidth::Full32, |(backend, _)| backend.input_width());

        let issuer = token.required("iss")?;
        let policy = self.policies.policy_for(&issuer);
        let expected = nonce::expected_nonce(&public_key, max_epoch, &width.narrow(&randomness))?;
        if !nonce::verify(&token, &expected, policy) {
            return Err(ZkLoginError::NonceMismatch { issuer, policy });
        }

        Ok(ValidatedRequest {
            jwt: request.jwt.trim().to_string(),
            public_key,
            max_epoch,
            randomness,
            salt,
            key_claim_name: key_claim_name.to_string(),
            key_claim_value,
            audience: audience.to_string(),
            width,
        })
    }

    /// Input width of the backend a helper request names, or of the default backend.
    fn requested_input_width(&self, selector: Option<&str>) -> Result<InputWidth, ZkLoginError> {
        match selector.map(str::trim).filter(|selector| !selector.is_empty()) {
            Some(selector) => Ok(self.registry.select(Some(selector))?.0.input_width()),
            None => Ok(self
                .registry
                .select(None)
                .map_or(InputWidth::Full32, |(backend, _)| backend.input_width())),
        }
    }

    /// Resolves the ephemeral public key from a session, a supplied key, or both (which must agree).
    fn resolve_public_key(
        &self,
        session_id: Option<&str>,
        supplied: Option<EphemeralPublicKey>,
    ) -> Result<EphemeralPublicKey, ZkLoginError> {
        let session_id = session_id.map(str::trim).filter(|id| !id.is_empty());
        match (session_id, supplied) {
            (Some(session_id), supplied) => {
                let key_pair = self
                    .key_store
                    .get(session_id)
                    .ok_or(ZkLoginError::SessionNotFound)?;
                let session_key = *key_pair.public_key();
                match supplied {
                    Some(supplied) if supplied != session_key => Err(ZkLoginError::KeyMismatch),
                    _ => Ok(session_key),
                }
            }
            (None, Some(supplied)) => Ok(supplied),
            (None, None) => Err(ZkLoginError::invalid_input(
                "extendedEphemeralPublicKey",
                "is required when no sessionId is given",
            )),
        }
    }
}

fn supplied_public_key(encoded: Option<&str>) -> Result<Option<EphemeralPublicKey>, ZkLoginError> {
    encoded
        .filter(|key| !key.trim().is_empty())
        .map(EphemeralPublicKey::from_base64)
        .transpose()
}

fn key_claim_name(requested: Option<&str>) -> &str {
    requested
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_KEY_CLAIM_NAME)
}

impl fmt::Debug for ProofOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofOrchestrator")
            .field("registry", &self.registry)
            .field("sessions", &self.key_store.len())
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{MockBackend, ProvingBackend},
        key_store::{InMemoryKeyStore, ManualClock},
        keys::EphemeralKeyPair,
        nonce::NonceBindingPolicy,
        proof::{ProofStatus, ZkProof},
    };
    use async_trait::async_trait;
    use base64::{
        engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
        Engine,
    };
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    const NOW: u64 = 1_700_000_000;
    const GOOGLE: &str = "https://accounts.google.com";
    const AUDIENCE: &str = "client.apps.googleusercontent.com";

    /// Counts invocations and fails every one of them.
    #[derive(Default)]
    struct FailingRemote {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProvingBackend for FailingRemote {
        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        async fn invoke(
            &self,
            _request: &AdaptedProofRequest,
            _timeout: Duration,
        ) -> Result<ZkProof, ZkLoginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ZkLoginError::BackendRejected {
                status: Some(503),
                body: "prover overloaded".to_string(),
            })
        }
    }

    struct Stalled;

    #[async_trait]
    impl ProvingBackend for Stalled {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        async fn invoke(
            &self,
            _request: &AdaptedProofRequest,
            _timeout: Duration,
        ) -> Result<ZkProof, ZkLoginError> {
            std::future::pending().await
        }
    }

    /// Accepts only 16-byte inputs and keeps the last request it was sent.
    #[derive(Default)]
    struct NarrowRecorder {
        last: Mutex<Option<AdaptedProofRequest>>,
    }

    #[async_trait]
    impl ProvingBackend for NarrowRecorder {
        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        fn input_width(&self) -> InputWidth {
            InputWidth::Truncated16
        }

        async fn invoke(
            &self,
            request: &AdaptedProofRequest,
            _timeout: Duration,
        ) -> Result<ZkProof, ZkLoginError> {
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(MockBackend::fixed_proof())
        }
    }

    fn jwt(iss: &str, nonce: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&json!({
                "iss": iss,
                "sub": "110463452167303598383",
                "aud": AUDIENCE,
                "nonce": nonce,
                "email": "user@example.com",
            }))
            .unwrap(),
        );
        format!("{header}.{payload}.c2ln")
    }

    struct Fixture {
        orchestrator: ProofOrchestrator,
        store: Arc<InMemoryKeyStore>,
        public_key: EphemeralPublicKey,
    }

    fn fixture(registry: BackendRegistry) -> Fixture {
        let store = Arc::new(InMemoryKeyStore::with_clock(Arc::new(ManualClock::new(NOW))));
        let key_pair = EphemeralKeyPair::from_seed([5u8; 32], NOW + 600);
        let public_key = *key_pair.public_key();
        store.put("session-1", key_pair);
        let orchestrator =
            ProofOrchestrator::new(registry, NoncePolicyTable::default(), store.clone());
        Fixture {
            orchestrator,
            store,
            public_key,
        }
    }

    fn mock_registry() -> BackendRegistry {
        BackendRegistry::new(BackendKind::Mock)
            .with_backend(Arc::new(MockBackend), Duration::from_secs(5))
    }

    fn request(public_key: &EphemeralPublicKey, iss: &str, policy: NonceBindingPolicy) -> ProofRequest {
        let randomness = [9u8; 32];
        let expected = nonce::expected_nonce(public_key, 42, &randomness).unwrap();
        ProofRequest {
            jwt: jwt(iss, &policy.transform(&expected)),
            extended_ephemeral_public_key: Some(public_key.to_extended_base64()),
            max_epoch: Some(42u64.into()),
            randomness: Some(STANDARD.encode(randomness)),
            salt: Some(STANDARD.encode([1u8; 32])),
            key_claim_name: None,
            audience: Some(AUDIENCE.to_string()),
            backend: None,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn test_success_reports_backend_and_address() {
        let f = fixture(mock_registry());
        let result = f
            .orchestrator
            .generate_proof(&request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw))
            .await;

        assert_eq!(result.status(), ProofStatus::Success);
        assert_eq!(result.backend_used, Some(BackendKind::Mock));
        assert_eq!(
            result.address.as_deref(),
            Some(address::derive(&[1u8; 32], "110463452167303598383", AUDIENCE).as_str())
        );
    }

    #[tokio::test]
    async fn test_session_key_is_used_and_checked() {
        let f = fixture(mock_registry());

        let mut by_session = request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw);
        by_session.extended_ephemeral_public_key = None;
        by_session.session_id = Some("session-1".to_string());
        assert_eq!(
            f.orchestrator.generate_proof(&by_session).await.status(),
            ProofStatus::Success
        );

        let mut unknown = by_session.clone();
        unknown.session_id = Some("nope".to_string());
        assert!(matches!(
            f.orchestrator.generate_proof(&unknown).await.error(),
            Some(ZkLoginError::SessionNotFound)
        ));

        let mut mismatched = by_session.clone();
        mismatched.extended_ephemeral_public_key =
            Some(EphemeralPublicKey::from_bytes([8u8; 32]).to_extended_base64());
        assert!(matches!(
            f.orchestrator.generate_proof(&mismatched).await.error(),
            Some(ZkLoginError::KeyMismatch)
        ));
    }

    #[tokio::test]
    async fn test_nonce_mismatch_never_reaches_the_backend() {
        let remote = Arc::new(FailingRemote::default());
        let registry = BackendRegistry::new(BackendKind::Remote)
            .with_backend(remote.clone(), Duration::from_secs(5));
        let f = fixture(registry);

        // Apple hashes the nonce, so a raw nonce is a mismatch.
        let request = request(&f.public_key, "https://appleid.apple.com", NonceBindingPolicy::Raw);
        let result = f.orchestrator.generate_proof(&request).await;

        assert!(matches!(
            result.error(),
            Some(ZkLoginError::NonceMismatch {
                policy: NonceBindingPolicy::Sha256Hashed,
                ..
            })
        ));
        assert!(result.address.is_none());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_retried_nor_replaced() {
        let remote = Arc::new(FailingRemote::default());
        let registry = BackendRegistry::new(BackendKind::Remote)
            .with_backend(remote.clone(), Duration::from_secs(5))
            .with_backend(Arc::new(MockBackend), Duration::from_secs(5));
        let f = fixture(registry);

        let result = f
            .orchestrator
            .generate_proof(&request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw))
            .await;

        assert_eq!(result.status(), ProofStatus::Failure);
        assert_eq!(result.backend_used, Some(BackendKind::Remote));
        assert!(result.address.is_some());
        assert_eq!(
            result.error().and_then(ZkLoginError::detail).as_deref(),
            Some("prover overloaded")
        );
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out() {
        let registry = BackendRegistry::new(BackendKind::Local)
            .with_backend(Arc::new(Stalled), Duration::from_millis(50));
        let f = fixture(registry);

        let result = f
            .orchestrator
            .generate_proof(&request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw))
            .await;
        assert!(matches!(
            result.error(),
            Some(ZkLoginError::BackendTimeout { timeout_ms: 50 })
        ));
        assert_eq!(result.backend_used, Some(BackendKind::Local));
    }

    #[tokio::test]
    async fn test_audience_must_match_token() {
        let f = fixture(mock_registry());
        let mut request = request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw);
        request.audience = Some("someone-else".to_string());

        assert!(matches!(
            f.orchestrator.generate_proof(&request).await.error(),
            Some(ZkLoginError::InvalidInput { attribute, .. }) if attribute == "audience"
        ));
    }

    #[tokio::test]
    async fn test_custom_key_claim() {
        let f = fixture(mock_registry());
        let mut request = request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw);
        request.key_claim_name = Some("email".to_string());

        let result = f.orchestrator.generate_proof(&request).await;
        assert_eq!(
            result.address.as_deref(),
            Some(address::derive(&[1u8; 32], "user@example.com", AUDIENCE).as_str())
        );

        request.key_claim_name = Some("phone_number".to_string());
        assert!(matches!(
            f.orchestrator.generate_proof(&request).await.error(),
            Some(ZkLoginError::MissingClaim(claim)) if claim == "phone_number"
        ));
    }

    #[tokio::test]
    async fn test_unknown_selector_is_unsupported() {
        let f = fixture(mock_registry());
        let mut request = request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw);
        request.backend = Some("remote".to_string());

        let result = f.orchestrator.generate_proof(&request).await;
        assert!(matches!(
            result.error(),
            Some(ZkLoginError::UnsupportedBackend(_))
        ));
        assert!(result.backend_used.is_none());
    }

    #[test]
    fn test_compute_nonce_matches_session_key() {
        let f = fixture(mock_registry());
        let nonce_request = NonceRequest {
            extended_ephemeral_public_key: None,
            session_id: Some("session-1".to_string()),
            max_epoch: Some(42u64.into()),
            randomness: Some(STANDARD.encode([9u8; 32])),
            backend: None,
        };
        assert_eq!(
            f.orchestrator.compute_nonce(&nonce_request).unwrap(),
            nonce::expected_nonce(&f.public_key, 42, &[9u8; 32]).unwrap()
        );
    }

    #[test]
    fn test_derive_address_helper() {
        let f = fixture(mock_registry());
        let address = f
            .orchestrator
            .derive_address(&AddressRequest {
                jwt: jwt(GOOGLE, "n"),
                salt: Some(STANDARD.encode([1u8; 32])),
                key_claim_name: None,
                backend: None,
            })
            .unwrap();
        assert_eq!(
            address,
            address::derive(&[1u8; 32], "110463452167303598383", AUDIENCE)
        );
    }

    #[tokio::test]
    async fn test_narrow_backend_receives_the_randomness_the_nonce_binds() {
        let recorder = Arc::new(NarrowRecorder::default());
        let registry = BackendRegistry::new(BackendKind::Remote)
            .with_backend(recorder.clone(), Duration::from_secs(5));
        let f = fixture(registry);

        let token_nonce = f
            .orchestrator
            .compute_nonce(&NonceRequest {
                extended_ephemeral_public_key: Some(f.public_key.to_extended_base64()),
                session_id: None,
                max_epoch: Some(42u64.into()),
                randomness: Some(STANDARD.encode([9u8; 32])),
                backend: Some("remote".to_string()),
            })
            .unwrap();
        let mut request = request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw);
        request.jwt = jwt(GOOGLE, &token_nonce);

        let result = f.orchestrator.generate_proof(&request).await;
        assert_eq!(result.status(), ProofStatus::Success);

        let sent = recorder.last.lock().unwrap().clone().unwrap();
        let sent_randomness: [u8; 32] = crate::field::parse_coordinate(&sent.jwt_randomness)
            .unwrap()
            .to_be_bytes();
        assert_eq!(
            nonce::expected_nonce(&f.public_key, 42, &sent_randomness).unwrap(),
            token_nonce
        );

        let sent_salt: [u8; 32] = crate::field::parse_coordinate(&sent.salt)
            .unwrap()
            .to_be_bytes();
        assert_eq!(
            result.address.as_deref(),
            Some(address::derive(&sent_salt, "110463452167303598383", AUDIENCE).as_str())
        );
    }

    #[tokio::test]
    async fn test_narrow_backend_rejects_nonce_over_full_randomness() {
        let recorder = Arc::new(NarrowRecorder::default());
        let registry = BackendRegistry::new(BackendKind::Remote)
            .with_backend(recorder.clone(), Duration::from_secs(5));
        let f = fixture(registry);

        let result = f
            .orchestrator
            .generate_proof(&request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw))
            .await;
        assert!(matches!(
            result.error(),
            Some(ZkLoginError::NonceMismatch { .. })
        ));
        assert!(recorder.last.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audience_comparison_ignores_surrounding_whitespace() {
        let f = fixture(mock_registry());
        let expected = nonce::expected_nonce(&f.public_key, 42, &[9u8; 32]).unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&json!({
                "iss": GOOGLE,
                "sub": "110463452167303598383",
                "aud": format!(" {AUDIENCE} "),
                "nonce": expected,
            }))
            .unwrap(),
        );
        let mut request = request(&f.public_key, GOOGLE, NonceBindingPolicy::Raw);
        request.jwt = format!("{header}.{payload}.c2ln");
        request.audience = Some(format!("{AUDIENCE}\n"));

        assert_eq!(
            f.orchestrator.generate_proof(&request).await.status(),
            ProofStatus::Success
        );
    }

    #[test]
    fn test_session_lifecycle() {
        let f = fixture(mock_registry());
        let issued = f.orchestrator.issue_session(Some(Duration::from_secs(30)));
        assert_eq!(issued.expires_at, NOW + 30);
        assert_eq!(f.store.len(), 2);

        assert!(f.orchestrator.end_session(&issued.session_id));
        assert!(!f.orchestrator.end_session(&issued.session_id));
        assert_eq!(f.orchestrator.sweep_expired_sessions(), 0);
    }
}
