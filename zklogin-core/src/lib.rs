#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
//! Core zkLogin primitives.
//!
//! Turns an OAuth identity token plus an ephemeral key into a request a Groth16 prover can
//! answer: claim extraction, nonce binding, ephemeral key sessions, address derivation, and a
//! proof orchestrator that dispatches to a local, remote or mock proving backend.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};

mod error;
pub use error::*;

pub mod address;
pub mod backend;
pub mod claims;
pub mod config;
pub mod field;
pub mod key_store;
pub mod keys;
pub mod nonce;
pub mod orchestrator;
pub mod proof;
pub mod request;

pub use backend::{BackendKind, BackendRegistry, InputWidth, ProvingBackend};
pub use claims::IdentityToken;
pub use config::{BackendDescriptor, BackendTarget, ConfigError, ProverConfig};
pub use key_store::{EphemeralKeyStore, InMemoryKeyStore, IssuedKey};
pub use keys::{EphemeralKeyPair, EphemeralPublicKey};
pub use nonce::{NonceBindingPolicy, NoncePolicyTable};
pub use orchestrator::ProofOrchestrator;
pub use proof::{ProofOutcome, ProofPoints, ProofResult, ProofStatus, ZkProof};
pub use request::{AddressRequest, NonceRequest, ProofRequest};

/// Standard base64 that tolerates both padded and unpadded input, for key material and secrets.
pub(crate) const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
