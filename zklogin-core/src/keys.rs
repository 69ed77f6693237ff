//! Ephemeral Ed25519 keys bound into zkLogin nonces.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::SigningKey;
use secrecy::{ExposeSecret, SecretBox};

use crate::{error::ZkLoginError, BASE64_LENIENT};

/// Length of a raw Ed25519 public key.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Scheme flag prepended to Ed25519 public keys in their extended form.
pub const ED25519_FLAG: u8 = 0x00;

/// The public half of an ephemeral keypair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EphemeralPublicKey([u8; PUBLIC_KEY_LENGTH]);

impl EphemeralPublicKey {
    /// Wraps raw Ed25519 public key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Decodes a base64 public key, accepting either the 32 raw key bytes or the 33-byte
    /// extended form (`0x00` scheme flag followed by the key).
    ///
    /// # Errors
    /// - `ZkLoginError::InvalidInput` if the value is not base64 or carries an unknown scheme flag.
    /// - `ZkLoginError::InvalidFieldLength` if the decoded length is neither 32 nor 33 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, ZkLoginError> {
        let bytes = BASE64_LENIENT.decode(encoded.trim()).map_err(|err| {
            ZkLoginError::invalid_input("extendedEphemeralPublicKey", err.to_string())
        })?;

        let key_bytes = match bytes.len() {
            PUBLIC_KEY_LENGTH => &bytes[..],
            33 if bytes[0] == ED25519_FLAG => &bytes[1..],
            33 => {
                return Err(ZkLoginError::invalid_input(
                    "extendedEphemeralPublicKey",
                    format!("unsupported key scheme flag {:#04x}", bytes[0]),
                ))
            }
            actual => {
                return Err(ZkLoginError::InvalidFieldLength {
                    field: "extendedEphemeralPublicKey",
                    expected: PUBLIC_KEY_LENGTH,
                    actual,
                })
            }
        };

        let mut key = [0u8; PUBLIC_KEY_LENGTH];
        key.copy_from_slice(key_bytes);
        Ok(Self(key))
    }

    /// The raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// The extended form: scheme flag followed by the key bytes.
    #[must_use]
    pub fn to_extended_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH + 1] {
        let mut out = [0u8; PUBLIC_KEY_LENGTH + 1];
        out[0] = ED25519_FLAG;
        out[1..].copy_from_slice(&self.0);
        out
    }

    /// Base64 of the extended form, as proving services expect it.
    #[must_use]
    pub fn to_extended_base64(&self) -> String {
        STANDARD.encode(self.to_extended_bytes())
    }

    /// Base64 of the raw key bytes.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for EphemeralPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EphemeralPublicKey({})", self.to_base64())
    }
}

/// A short-lived Ed25519 keypair held by the ephemeral key store.
///
/// # Security
/// - The secret seed sits in a `SecretBox` and is zeroized on drop.
/// - `Debug` never prints the seed.
/// - The type is not `Serialize`, so it cannot leak into a response body.
pub struct EphemeralKeyPair {
    public_key: EphemeralPublicKey,
    secret_seed: SecretBox<[u8; 32]>,
    expiry_epoch_seconds: u64,
}

impl EphemeralKeyPair {
    /// Generates a fresh keypair from the OS CSPRNG.
    #[must_use]
    pub fn generate(expiry_epoch_seconds: u64) -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_signing_key(&signing_key, expiry_epoch_seconds)
    }

    /// Rebuilds a keypair from a 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32], expiry_epoch_seconds: u64) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        Self::from_signing_key(&signing_key, expiry_epoch_seconds)
    }

    fn from_signing_key(signing_key: &SigningKey, expiry_epoch_seconds: u64) -> Self {
        Self {
            public_key: EphemeralPublicKey(signing_key.verifying_key().to_bytes()),
            secret_seed: SecretBox::new(Box::new(signing_key.to_bytes())),
            expiry_epoch_seconds,
        }
    }

    /// The public half.
    #[must_use]
    pub const fn public_key(&self) -> &EphemeralPublicKey {
        &self.public_key
    }

    /// Expiry, in seconds since the Unix epoch.
    #[must_use]
    pub const fn expiry_epoch_seconds(&self) -> u64 {
        self.expiry_epoch_seconds
    }

    /// Whether the keypair has expired at `now` (seconds since the Unix epoch).
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        self.expiry_epoch_seconds < now
    }

    /// Rebuilds the signing key for the duration of `f`.
    pub fn with_signing_key<T>(&self, f: impl FnOnce(&SigningKey) -> T) -> T {
        let signing_key = SigningKey::from_bytes(self.secret_seed.expose_secret());
        f(&signing_key)
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_seed", &"[REDACTED]")
            .field("expiry_epoch_seconds", &self.expiry_epoch_seconds)
            .finish()
    }
}
