//! Proof envelope types and normalization of backend proof payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{backend::BackendKind, error::ZkLoginError, field::parse_coordinate};

/// Groth16 proof points in affine form, as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPoints {
    /// G1 point `a`.
    pub a: [String; 2],
    /// G2 point `b`.
    pub b: [[String; 2]; 2],
    /// G1 point `c`.
    pub c: [String; 2],
}

impl ProofPoints {
    /// Normalizes a proof object from a backend.
    ///
    /// Accepts `{a, b, c}` as well as snarkjs' `{pi_a, pi_b, pi_c}`. Projective coordinates with the
    /// trailing `"1"` (G1) or `["1", "0"]` (G2) are reduced to affine; any other arity is rejected.
    ///
    /// # Errors
    /// Returns `ZkLoginError::MalformedProofResult` when a point is missing, has the wrong arity, or
    /// holds a coordinate that is not a decimal field element.
    pub fn from_value(value: &Value) -> Result<Self, ZkLoginError> {
        let a = g1_point(point(value, "a", "pi_a")?, "a")?;
        let b = g2_point(point(value, "b", "pi_b")?)?;
        let c = g1_point(point(value, "c", "pi_c")?, "c")?;
        Ok(Self { a, b, c })
    }
}

fn point<'a>(value: &'a Value, name: &str, alias: &str) -> Result<&'a Value, ZkLoginError> {
    value
        .get(name)
        .or_else(|| value.get(alias))
        .ok_or_else(|| ZkLoginError::MalformedProofResult(format!("missing proof point `{name}`")))
}

fn coordinates(value: &Value, name: &str) -> Result<Vec<String>, ZkLoginError> {
    let items = value.as_array().ok_or_else(|| {
        ZkLoginError::MalformedProofResult(format!("proof point `{name}` is not an array"))
    })?;
    items
        .iter()
        .map(|item| {
            let coordinate = match item {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => {
                    return Err(ZkLoginError::MalformedProofResult(format!(
                        "proof point `{name}` holds a non-scalar coordinate"
                    )))
                }
            };
            parse_coordinate(&coordinate)?;
            Ok(coordinate)
        })
        .collect()
}

fn g1_point(value: &Value, name: &str) -> Result<[String; 2], ZkLoginError> {
    let mut coords = coordinates(value, name)?;
    if coords.len() == 3 && coords[2] == "1" {
        coords.truncate(2);
    }
    let arity = coords.len();
    <[String; 2]>::try_from(coords).map_err(|_| {
        ZkLoginError::MalformedProofResult(format!(
            "proof point `{name}` has {arity} coordinates, expected 2"
        ))
    })
}

fn g2_point(value: &Value) -> Result<[[String; 2]; 2], ZkLoginError> {
    let rows = value.as_array().ok_or_else(|| {
        ZkLoginError::MalformedProofResult("proof point `b` is not an array".to_string())
    })?;

    let mut rows: Vec<[String; 2]> = rows
        .iter()
        .map(|row| g1_point(row, "b"))
        .collect::<Result<_, _>>()?;
    if rows.len() == 3 && rows[2] == ["1".to_string(), "0".to_string()] {
        rows.truncate(2);
    }
    let arity = rows.len();
    <[[String; 2]; 2]>::try_from(rows).map_err(|_| {
        ZkLoginError::MalformedProofResult(format!(
            "proof point `b` has {arity} rows, expected 2"
        ))
    })
}

/// A proof returned by a backend, plus the optional helper fields some provers attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkProof {
    /// The Groth16 proof points.
    pub proof_points: ProofPoints,
    /// Location of the `iss` claim inside the base64 payload, as reported by the prover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss_base64_details: Option<Value>,
    /// The token header segment, as reported by the prover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_base64: Option<String>,
}

impl ZkProof {
    /// Normalizes a backend response body. Both `{proofPoints: {...}}` and a bare `{a, b, c}`
    /// object are accepted.
    ///
    /// # Errors
    /// Returns `ZkLoginError::MalformedProofResult` if the points are absent or malformed.
    pub fn from_response(value: &Value) -> Result<Self, ZkLoginError> {
        let points = value.get("proofPoints").unwrap_or(value);
        Ok(Self {
            proof_points: ProofPoints::from_value(points)?,
            iss_base64_details: value.get("issBase64Details").cloned(),
            header_base64: value
                .get("headerBase64")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Terminal status of a proof request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    /// A proof was produced.
    Success,
    /// The request failed; see the attached error.
    Failure,
}

/// Either a proof or the error that prevented one.
#[derive(Debug)]
pub enum ProofOutcome {
    /// The backend produced a structurally valid proof.
    Success(ZkProof),
    /// Validation or the backend failed.
    Failure(ZkLoginError),
}

/// The uniform envelope returned by the orchestrator for every request.
#[derive(Debug)]
pub struct ProofResult {
    /// The backend that served (or would have served) the request. `None` if the request failed
    /// before a backend was selected.
    pub backend_used: Option<BackendKind>,
    /// The derived address, available as soon as the request validated.
    pub address: Option<String>,
    /// The proof or the failure.
    pub outcome: ProofOutcome,
}

impl ProofResult {
    pub(crate) fn succeeded(backend: BackendKind, address: String, proof: ZkProof) -> Self {
        Self {
            backend_used: Some(backend),
            address: Some(address),
            outcome: ProofOutcome::Success(proof),
        }
    }

    pub(crate) fn failed(
        backend_used: Option<BackendKind>,
        address: Option<String>,
        error: ZkLoginError,
    ) -> Self {
        Self {
            backend_used,
            address,
            outcome: ProofOutcome::Failure(error),
        }
    }

    /// Success or failure.
    #[must_use]
    pub const fn status(&self) -> ProofStatus {
        match self.outcome {
            ProofOutcome::Success(_) => ProofStatus::Success,
            ProofOutcome::Failure(_) => ProofStatus::Failure,
        }
    }

    /// The proof, on success.
    #[must_use]
    pub const fn proof(&self) -> Option<&ZkProof> {
        match &self.outcome {
            ProofOutcome::Success(proof) => Some(proof),
            ProofOutcome::Failure(_) => None,
        }
    }

    /// The error, on failure.
    #[must_use]
    pub const fn error(&self) -> Option<&ZkLoginError> {
        match &self.outcome {
            ProofOutcome::Success(_) => None,
            ProofOutcome::Failure(error) => Some(error),
        }
    }
}
