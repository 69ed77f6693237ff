use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{AdaptedProofRequest, BackendKind, ProvingBackend};
use crate::{
    error::ZkLoginError,
    proof::{ProofPoints, ZkProof},
};

/// Returns a fixed, structurally valid proof that no verifier will accept.
///
/// Only registered when the deployment explicitly enables mocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBackend;

impl MockBackend {
    /// The proof every call returns.
    #[must_use]
    pub fn fixed_proof() -> ZkProof {
        let s = |value: &str| value.to_string();
        ZkProof {
            proof_points: ProofPoints {
                a: [
                    s("8446713745218463227617669208049722366217302470153347596347449431519765637596"),
                    s("3417440106812163577427536932385497934395286328126209627530946212306519390779"),
                ],
                b: [
                    [
                        s("10857046999023057135944570762232829481370756359578518086990519993285655852781"),
                        s("11559732032986387107991004021392285783925812861821192530917403151452391805634"),
                    ],
                    [
                        s("8495653923123431417604973247489272438418190587263600148770280649306958101930"),
                        s("4082367875863433681332203403145435568316851327593401208105741076214120093531"),
                    ],
                ],
                c: [
                    s("14346097542396919399474468497095962960468768698543271290932466519765063462034"),
                    s("1840155838009880716585316399346449219542934282458633426002766563698447254093"),
                ],
            },
            iss_base64_details: None,
            header_base64: None,
        }
    }
}

#[async_trait]
impl ProvingBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    async fn invoke(
        &self,
        _request: &AdaptedProofRequest,
        _timeout: Duration,
    ) -> Result<ZkProof, ZkLoginError> {
        warn!("serving a mock proof");
        Ok(Self::fixed_proof())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::parse_coordinate;

    #[test]
    fn test_fixed_proof_is_structurally_valid() {
        let proof = MockBackend::fixed_proof();
        let points = &proof.proof_points;
        for coordinate in points.a.iter().chain(points.b.iter().flatten()).chain(points.c.iter()) {
            assert!(parse_coordinate(coordinate).is_ok());
        }

        let value = serde_json::to_value(points).unwrap();
        assert_eq!(ProofPoints::from_value(&value).unwrap(), *points);
    }
}
