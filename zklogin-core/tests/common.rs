//! Common test utilities shared across integration tests.

#![allow(dead_code, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use serde_json::{json, Value};
use zklogin_core::{
    key_store::ManualClock, nonce, BackendKind, BackendRegistry, EphemeralKeyPair, EphemeralKeyStore,
    EphemeralPublicKey, InMemoryKeyStore, NonceBindingPolicy, NoncePolicyTable,
    ProofOrchestrator, ProofRequest, ProvingBackend,
};

pub const NOW: u64 = 1_700_000_000;
pub const SUBJECT: &str = "110463452167303598383";
pub const GOOGLE_AUDIENCE: &str = "25769832374-famecqrhe2gkebt5fvqms2263046lj96.apps.googleusercontent.com";
pub const APPLE_AUDIENCE: &str = "nl.digkas.wallet.client";
pub const SALT: [u8; 32] = [0x5a; 32];
pub const RANDOMNESS: [u8; 32] = [0x3c; 32];
pub const MAX_EPOCH: u64 = 235;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Builds an unsigned compact JWT from a payload.
pub fn jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"test","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// A token for `issuer` whose nonce binds `public_key` under `policy`.
pub fn bound_jwt(
    issuer: &str,
    audience: &str,
    public_key: &EphemeralPublicKey,
    policy: NonceBindingPolicy,
) -> String {
    let expected = nonce::expected_nonce(public_key, MAX_EPOCH, &RANDOMNESS).unwrap();
    jwt(&json!({
        "iss": issuer,
        "sub": SUBJECT,
        "aud": audience,
        "nonce": policy.transform(&expected),
        "iat": NOW,
        "exp": NOW + 3600,
    }))
}

pub fn proof_request(jwt: String, public_key: &EphemeralPublicKey, audience: &str) -> ProofRequest {
    ProofRequest {
        jwt,
        extended_ephemeral_public_key: Some(public_key.to_extended_base64()),
        max_epoch: Some(MAX_EPOCH.into()),
        randomness: Some(STANDARD.encode(RANDOMNESS)),
        salt: Some(STANDARD.encode(SALT)),
        key_claim_name: None,
        audience: Some(audience.to_string()),
        backend: None,
        session_id: None,
    }
}

pub struct Harness {
    pub orchestrator: ProofOrchestrator,
    pub store: Arc<InMemoryKeyStore>,
    pub clock: Arc<ManualClock>,
    pub session_key: EphemeralPublicKey,
}

pub const SESSION_ID: &str = "integration-session";

pub fn harness(registry: BackendRegistry) -> Harness {
    let clock = Arc::new(ManualClock::new(NOW));
    let store = Arc::new(InMemoryKeyStore::with_clock(clock.clone()));
    let key_pair = EphemeralKeyPair::generate(NOW + 600);
    let session_key = *key_pair.public_key();
    store.put(SESSION_ID, key_pair);

    Harness {
        orchestrator: ProofOrchestrator::new(registry, NoncePolicyTable::default(), store.clone()),
        store,
        clock,
        session_key,
    }
}

pub fn registry_with(backend: Arc<dyn ProvingBackend>, default: BackendKind) -> BackendRegistry {
    BackendRegistry::new(default).with_backend(backend, Duration::from_secs(5))
}
