//! zokrates cli as the proof engine
//!
//! each verification gets a scratch directory holding `proof.json` rebuilt
//! from the bundle's material and *the inputs the pool parsed*, plus the
//! verification key. the pool never trusts inputs it did not check.

use std::path::PathBuf;

use async_trait::async_trait;
use laundeth_pool::{PoolError, ProofBundle, ProofVerifier, PublicInputs, Result, VerificationKey};
use tokio::process::Command;
use tracing::debug;

const PROOF_FILE: &str = "proof.json";
const VK_FILE: &str = "verification.key";

pub struct ZokratesVerifier {
    binary: PathBuf,
}

impl ZokratesVerifier {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ProofVerifier for ZokratesVerifier {
    async fn verify(&self, inputs: &PublicInputs, proof: &[u8], vk: &VerificationKey) -> Result<bool> {
        let scratch = tempfile::tempdir().map_err(engine_err)?;
        let proof_path = scratch.path().join(PROOF_FILE);
        let vk_path = scratch.path().join(VK_FILE);

        let bundle = ProofBundle::new(proof.to_vec(), inputs.clone());
        tokio::fs::write(&proof_path, bundle.to_zokrates_json()?)
            .await
            .map_err(engine_err)?;
        tokio::fs::write(&vk_path, vk.as_bytes()).await.map_err(engine_err)?;

        debug!(binary = %self.binary.display(), "running zokrates verify");
        let output = Command::new(&self.binary)
            .arg("verify")
            .arg("-j")
            .arg(&proof_path)
            .arg("-v")
            .arg(&vk_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(engine_err)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        verdict(output.status.success(), &stdout, &stderr)
    }
}

/// read the verdict off zokrates' output
fn verdict(success: bool, stdout: &str, stderr: &str) -> Result<bool> {
    if stdout.contains("PASSED") {
        return Ok(true);
    }
    if stdout.contains("FAILED") || stderr.contains("FAILED") {
        return Ok(false);
    }
    if success {
        return Err(PoolError::EngineFailure(format!(
            "zokrates gave no verdict: {}",
            stdout.trim()
        )));
    }
    Err(PoolError::EngineFailure(format!("zokrates failed: {}", stderr.trim())))
}

fn engine_err(err: std::io::Error) -> PoolError {
    PoolError::EngineFailure(format!("zokrates io: {}", err))
}
