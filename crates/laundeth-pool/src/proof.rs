//! proof bundles and the verifier capability
//!
//! the pool never looks inside proof material. it parses the public
//! inputs into the statement it has to enforce (root, nullifier) and hands
//! proof + inputs + key to a [`ProofVerifier`], which answers yes or no.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{PoolError, Result};
use crate::types::{FieldElement, Nullifier, Root, HASH_WORDS};
use crate::DEV_PROOF_DOMAIN;

/// public input layout, fixed per circuit version
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// segment A = root words, segment B = nullifier-hash words
    #[default]
    V1,
}

impl ProtocolVersion {
    pub fn segment_a_len(&self) -> usize {
        match self {
            ProtocolVersion::V1 => HASH_WORDS,
        }
    }

    pub fn segment_b_len(&self) -> usize {
        match self {
            ProtocolVersion::V1 => HASH_WORDS,
        }
    }
}

/// opaque verification key bytes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey(pub Vec<u8>);

impl VerificationKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// the public input vector, split in its two segments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub segment_a: Vec<FieldElement>,
    pub segment_b: Vec<FieldElement>,
}

/// what a v1 proof claims
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimedStatement {
    pub root: Root,
    pub nullifier: Nullifier,
}

impl PublicInputs {
    /// split a flat input vector at the version's segment boundary
    ///
    /// lengths are not checked here; [`PublicInputs::parse`] does that
    pub fn from_flat(mut inputs: Vec<FieldElement>, version: ProtocolVersion) -> Self {
        let split = version.segment_a_len().min(inputs.len());
        let segment_b = inputs.split_off(split);
        Self {
            segment_a: inputs,
            segment_b,
        }
    }

    /// inputs a prover would emit for a root and nullifier
    pub fn for_statement(version: ProtocolVersion, root: &Root, nullifier: &Nullifier) -> Self {
        match version {
            ProtocolVersion::V1 => Self {
                segment_a: root.to_words().iter().map(|w| FieldElement::from_u32(*w)).collect(),
                segment_b: nullifier
                    .to_words()
                    .iter()
                    .map(|w| FieldElement::from_u32(*w))
                    .collect(),
            },
        }
    }

    pub fn flatten(&self) -> Vec<FieldElement> {
        self.segment_a
            .iter()
            .chain(self.segment_b.iter())
            .copied()
            .collect()
    }

    /// check the shape and extract the claimed root and nullifier
    pub fn parse(&self, version: ProtocolVersion) -> Result<ClaimedStatement> {
        if self.segment_a.len() != version.segment_a_len() {
            return Err(PoolError::MalformedProof(format!(
                "segment A has {} elements, expected {}",
                self.segment_a.len(),
                version.segment_a_len()
            )));
        }
        if self.segment_b.len() != version.segment_b_len() {
            return Err(PoolError::MalformedProof(format!(
                "segment B has {} elements, expected {}",
                self.segment_b.len(),
                version.segment_b_len()
            )));
        }

        match version {
            ProtocolVersion::V1 => Ok(ClaimedStatement {
                root: Root::from_words(&segment_words(&self.segment_a, "A")?),
                nullifier: Nullifier::from_words(&segment_words(&self.segment_b, "B")?),
            }),
        }
    }
}

fn segment_words(segment: &[FieldElement], name: &str) -> Result<[u32; HASH_WORDS]> {
    let mut words = [0u32; HASH_WORDS];
    for (i, (word, element)) in words.iter_mut().zip(segment).enumerate() {
        *word = element.to_u32().ok_or_else(|| {
            PoolError::MalformedProof(format!("segment {} element {} exceeds u32", name, i))
        })?;
    }
    Ok(words)
}

/// proof material plus the public inputs it was produced for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    pub proof: Vec<u8>,
    pub inputs: PublicInputs,
}

impl ProofBundle {
    pub fn new(proof: Vec<u8>, inputs: PublicInputs) -> Self {
        Self { proof, inputs }
    }

    /// read a zokrates `proof.json`
    ///
    /// the `inputs` array becomes the public inputs; everything else is kept
    /// verbatim as the opaque proof material
    pub fn from_zokrates_json(json: &str, version: ProtocolVersion) -> Result<Self> {
        let mut doc: Value = serde_json::from_str(json)
            .map_err(|e| PoolError::MalformedProof(format!("proof json: {}", e)))?;

        let object = doc
            .as_object_mut()
            .ok_or_else(|| PoolError::MalformedProof("proof json is not an object".into()))?;
        let raw_inputs = object
            .remove("inputs")
            .ok_or_else(|| PoolError::MalformedProof("proof json has no inputs".into()))?;
        if !object.contains_key("proof") {
            return Err(PoolError::MalformedProof("proof json has no proof".into()));
        }

        let raw_inputs = raw_inputs
            .as_array()
            .ok_or_else(|| PoolError::MalformedProof("inputs is not an array".into()))?;
        let mut flat = Vec::with_capacity(raw_inputs.len());
        for value in raw_inputs {
            let s = value
                .as_str()
                .ok_or_else(|| PoolError::MalformedProof("input is not a string".into()))?;
            let element = s
                .parse::<FieldElement>()
                .map_err(|e| PoolError::MalformedProof(format!("input {}: {}", s, e)))?;
            flat.push(element);
        }

        let proof = serde_json::to_vec(&doc)
            .map_err(|e| PoolError::Serialization(format!("proof json: {}", e)))?;

        Ok(Self {
            proof,
            inputs: PublicInputs::from_flat(flat, version),
        })
    }

    /// rebuild a zokrates `proof.json` from the material and *these* inputs
    pub fn to_zokrates_json(&self) -> Result<String> {
        let mut doc: Value = serde_json::from_slice(&self.proof)
            .map_err(|e| PoolError::MalformedProof(format!("proof material: {}", e)))?;
        let object = doc
            .as_object_mut()
            .ok_or_else(|| PoolError::MalformedProof("proof material is not an object".into()))?;

        let inputs = self
            .inputs
            .flatten()
            .iter()
            .map(|fe| Value::String(fe.to_hex()))
            .collect();
        object.insert("inputs".into(), Value::Array(inputs));

        serde_json::to_string_pretty(&doc)
            .map_err(|e| PoolError::Serialization(format!("proof json: {}", e)))
    }
}

/// external proof engine, verification side only
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// `Ok(false)` is a rejected proof; `Err` is an engine failure
    async fn verify(
        &self,
        inputs: &PublicInputs,
        proof: &[u8],
        vk: &VerificationKey,
    ) -> Result<bool>;
}

#[async_trait]
impl<V: ProofVerifier + ?Sized> ProofVerifier for Arc<V> {
    async fn verify(
        &self,
        inputs: &PublicInputs,
        proof: &[u8],
        vk: &VerificationKey,
    ) -> Result<bool> {
        (**self).verify(inputs, proof, vk).await
    }
}

/// deterministic development engine
///
/// a "proof" is `sha256(domain || vk || inputs)`. it binds the material to
/// the exact inputs and key but proves nothing and hides nothing; use it for
/// local runs and tests only.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestVerifier;

impl DigestVerifier {
    pub fn prove(inputs: &PublicInputs, vk: &VerificationKey) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(DEV_PROOF_DOMAIN);
        hasher.update((vk.0.len() as u64).to_le_bytes());
        hasher.update(&vk.0);
        hasher.update((inputs.segment_a.len() as u64).to_le_bytes());
        for element in inputs.flatten() {
            hasher.update(element.0);
        }
        hasher.finalize().to_vec()
    }
}

#[async_trait]
impl ProofVerifier for DigestVerifier {
    async fn verify(
        &self,
        inputs: &PublicInputs,
        proof: &[u8],
        vk: &VerificationKey,
    ) -> Result<bool> {
        Ok(Self::prove(inputs, vk) == proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement() -> (Root, Nullifier) {
        let mut root = [0u8; 32];
        root[0] = 0xab;
        root[31] = 0x01;
        (Root(root), Nullifier([0x5a; 32]))
    }

    #[test]
    fn test_parse_v1_statement() {
        let (root, nf) = statement();
        let inputs = PublicInputs::for_statement(ProtocolVersion::V1, &root, &nf);
        assert_eq!(inputs.segment_a.len(), 8);
        assert_eq!(inputs.segment_b.len(), 8);

        let claimed = inputs.parse(ProtocolVersion::V1).unwrap();
        assert_eq!(claimed.root, root);
        assert_eq!(claimed.nullifier, nf);
    }

    #[test]
    fn test_short_segment_is_malformed() {
        let (root, nf) = statement();
        let mut flat = PublicInputs::for_statement(ProtocolVersion::V1, &root, &nf).flatten();
        flat.truncate(12);

        let inputs = PublicInputs::from_flat(flat, ProtocolVersion::V1);
        assert_eq!(inputs.segment_a.len(), 8);
        assert_eq!(inputs.segment_b.len(), 4);
        assert!(matches!(
            inputs.parse(ProtocolVersion::V1),
            Err(PoolError::MalformedProof(_))
        ));
    }

    #[test]
    fn test_oversized_element_is_malformed() {
        let (root, nf) = statement();
        let mut inputs = PublicInputs::for_statement(ProtocolVersion::V1, &root, &nf);
        inputs.segment_b[3] = "0x0100000000".parse().unwrap();
        assert!(matches!(
            inputs.parse(ProtocolVersion::V1),
            Err(PoolError::MalformedProof(_))
        ));
    }

    #[test]
    fn test_zokrates_json_roundtrip_keeps_material() {
        let (root, nf) = statement();
        let inputs = PublicInputs::for_statement(ProtocolVersion::V1, &root, &nf);
        let hex_inputs: Vec<String> = inputs.flatten().iter().map(|fe| fe.to_hex()).collect();
        let json = serde_json::json!({
            "scheme": "g16",
            "curve": "bn128",
            "proof": {
                "a": ["0x01", "0x02"],
                "b": [["0x03", "0x04"], ["0x05", "0x06"]],
                "c": ["0x07", "0x08"]
            },
            "inputs": hex_inputs,
        })
        .to_string();

        let bundle = ProofBundle::from_zokrates_json(&json, ProtocolVersion::V1).unwrap();
        assert_eq!(bundle.inputs, inputs);

        let material: Value = serde_json::from_slice(&bundle.proof).unwrap();
        assert!(material.get("inputs").is_none());
        assert_eq!(material["scheme"], "g16");

        let rebuilt: Value = serde_json::from_str(&bundle.to_zokrates_json().unwrap()).unwrap();
        assert_eq!(rebuilt["inputs"].as_array().unwrap().len(), 16);
        assert_eq!(rebuilt["proof"]["c"][1], "0x08");
    }

    #[test]
    fn test_zokrates_json_without_proof_rejected() {
        let json = r#"{"inputs": []}"#;
        assert!(ProofBundle::from_zokrates_json(json, ProtocolVersion::V1).is_err());
    }

    #[tokio::test]
    async fn test_digest_verifier_binds_inputs_and_key() {
        let (root, nf) = statement();
        let vk = VerificationKey(b"vk".to_vec());
        let inputs = PublicInputs::for_statement(ProtocolVersion::V1, &root, &nf);
        let proof = DigestVerifier::prove(&inputs, &vk);

        assert!(DigestVerifier.verify(&inputs, &proof, &vk).await.unwrap());

        let other = PublicInputs::for_statement(ProtocolVersion::V1, &root, &Nullifier([1; 32]));
        assert!(!DigestVerifier.verify(&other, &proof, &vk).await.unwrap());

        let other_vk = VerificationKey(b"other".to_vec());
        assert!(!DigestVerifier.verify(&inputs, &proof, &other_vk).await.unwrap());
    }
}
