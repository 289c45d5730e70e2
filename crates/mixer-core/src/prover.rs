//! withdrawal proofs
//!
//! Proving is delegated to an external circuit prover. The coordinator only
//! assembles the witness and the public arguments, and runs the prover on the
//! blocking pool.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use mixer_merkle::{Hash, MerkleProof};
use num_bigint::BigUint;
use serde_json::{json, Value};
use tracing::debug;

use crate::abi::{self, Address};
use crate::error::{MixerError, Result};
use crate::note::Deposit;

/// witness and public inputs for one withdrawal
#[derive(Clone)]
pub struct ProofInput {
    pub root: Hash,
    pub nullifier_hash: Hash,
    pub recipient: Address,
    pub relayer: Address,
    pub fee: BigUint,
    pub refund: BigUint,
    pub nullifier: BigUint,
    pub secret: BigUint,
    pub path_elements: Vec<Hash>,
    pub path_indices: Vec<u8>,
}

impl ProofInput {
    pub fn new(
        deposit: &Deposit,
        merkle: &MerkleProof,
        recipient: Address,
        relayer: Address,
        fee: BigUint,
        refund: BigUint,
    ) -> Self {
        Self {
            root: merkle.root,
            nullifier_hash: deposit.nullifier_hash,
            recipient,
            relayer,
            fee,
            refund,
            nullifier: BigUint::from_bytes_le(&deposit.nullifier),
            secret: BigUint::from_bytes_le(&deposit.secret),
            path_elements: merkle.path_elements.clone(),
            path_indices: merkle.path_indices.clone(),
        }
    }

    /// circuit input object, every value a decimal string
    pub fn to_json(&self) -> Value {
        json!({
            "root": dec(&self.root),
            "nullifierHash": dec(&self.nullifier_hash),
            "recipient": dec(&self.recipient),
            "relayer": dec(&self.relayer),
            "fee": self.fee.to_string(),
            "refund": self.refund.to_string(),
            "nullifier": self.nullifier.to_string(),
            "secret": self.secret.to_string(),
            "pathElements": self.path_elements.iter().map(|e| dec(e)).collect::<Vec<_>>(),
            "pathIndices": self.path_indices,
        })
    }

    /// `[root, nullifierHash, recipient, relayer, fee, refund]` as contract arguments
    pub fn args(&self) -> [String; 6] {
        [
            abi::word_hex(&self.root),
            abi::word_hex(&self.nullifier_hash),
            format!("0x{}", hex::encode(self.recipient)),
            format!("0x{}", hex::encode(self.relayer)),
            abi::to_hex_padded(&self.fee, 32),
            abi::to_hex_padded(&self.refund, 32),
        ]
    }
}

fn dec(bytes: &[u8]) -> String {
    BigUint::from_bytes_be(bytes).to_string()
}

impl std::fmt::Debug for ProofInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofInput")
            .field("root", &abi::word_hex(&self.root))
            .field("fee", &self.fee)
            .field("refund", &self.refund)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalProof {
    /// 0x-prefixed proof bytes
    pub proof: String,
    pub args: [String; 6],
}

/// cpu-bound and blocking; never called on an async worker
pub trait Prover: Send + Sync {
    fn prove(&self, input: &ProofInput) -> Result<String>;
}

/// runs an external prover: circuit input json on stdin, `{"proof": "0x.."}` on stdout
pub struct CommandProver {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandProver {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Prover for CommandProver {
    fn prove(&self, input: &ProofInput) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MixerError::Prover(format!("cannot start {}: {}", self.program.display(), e)))?;

        let payload = serde_json::to_vec(&input.to_json())?;
        child
            .stdin
            .take()
            .ok_or_else(|| MixerError::Prover("prover stdin unavailable".into()))?
            .write_all(&payload)?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(MixerError::Prover(format!(
                "prover exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_prover_output(&output.stdout)
    }
}

fn parse_prover_output(stdout: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    let proof = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map
            .get("proof")
            .and_then(|p| p.as_str())
            .map(str::to_string)
            .ok_or_else(|| MixerError::Prover("prover output has no proof".into()))?,
        Ok(Value::String(s)) => s,
        _ => text.to_string(),
    };

    let body = abi::strip_0x(&proof);
    if body.is_empty() || body.len() % 2 != 0 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MixerError::Prover("prover output is not a hex proof".into()));
    }
    Ok(format!("0x{}", body))
}

/// one merkle proof, proved twice: once for a fee estimate, once for the real fee
pub struct WithdrawalProofPlan {
    prover: Arc<dyn Prover>,
    deposit: Deposit,
    merkle: MerkleProof,
    recipient: Address,
    relayer: Address,
    refund: BigUint,
}

impl WithdrawalProofPlan {
    pub fn new(
        prover: Arc<dyn Prover>,
        deposit: Deposit,
        merkle: MerkleProof,
        recipient: Address,
        relayer: Address,
        refund: BigUint,
    ) -> Self {
        Self {
            prover,
            deposit,
            merkle,
            recipient,
            relayer,
            refund,
        }
    }

    pub fn merkle(&self) -> &MerkleProof {
        &self.merkle
    }

    /// proof whose calldata has the final shape, priced with `fee_hint`
    pub async fn estimate(&self, fee_hint: &BigUint) -> Result<WithdrawalProof> {
        debug!("estimate proof with fee {}", fee_hint);
        self.prove(fee_hint.clone()).await
    }

    pub async fn finalize(&self, fee: &BigUint) -> Result<WithdrawalProof> {
        debug!("final proof with fee {}", fee);
        self.prove(fee.clone()).await
    }

    async fn prove(&self, fee: BigUint) -> Result<WithdrawalProof> {
        let input = ProofInput::new(
            &self.deposit,
            &self.merkle,
            self.recipient,
            self.relayer,
            fee,
            self.refund.clone(),
        );
        let args = input.args();
        let prover = self.prover.clone();
        let proof = tokio::task::spawn_blocking(move || prover.prove(&input))
            .await
            .map_err(|e| MixerError::Prover(format!("prover task failed: {}", e)))??;
        Ok(WithdrawalProof { proof, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoFee {
        calls: AtomicUsize,
    }

    impl Prover for EchoFee {
        fn prove(&self, input: &ProofInput) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("0x{:02x}", input.fee.to_u32_digits().first().copied().unwrap_or(0)))
        }
    }

    fn merkle() -> MerkleProof {
        MerkleProof {
            root: [0x11; 32],
            leaf_index: 2,
            path_elements: vec![[0x22; 32], [0x33; 32]],
            path_indices: vec![0, 1],
        }
    }

    #[test]
    fn test_args_layout() {
        let deposit = Deposit::new([1; 31], [2; 31]).unwrap();
        let input = ProofInput::new(
            &deposit,
            &merkle(),
            [0xaa; 20],
            [0xbb; 20],
            BigUint::from(255u32),
            BigUint::from(0u32),
        );
        let args = input.args();
        assert_eq!(args[0], format!("0x{}", "11".repeat(32)));
        assert_eq!(args[1], deposit.nullifier_hex());
        assert_eq!(args[2], format!("0x{}", "aa".repeat(20)));
        assert_eq!(args[3], format!("0x{}", "bb".repeat(20)));
        assert_eq!(args[4], format!("0x{}ff", "0".repeat(62)));
        assert_eq!(args[5], format!("0x{}", "0".repeat(64)));
    }

    #[test]
    fn test_circuit_json_uses_decimals() {
        let deposit = Deposit::new([1; 31], [2; 31]).unwrap();
        let input = ProofInput::new(&deposit, &merkle(), [0; 20], [0; 20], BigUint::from(7u8), BigUint::from(0u8));
        let v = input.to_json();
        assert_eq!(v["fee"], "7");
        assert_eq!(v["relayer"], "0");
        assert_eq!(v["pathIndices"], json!([0, 1]));
        assert_eq!(v["pathElements"].as_array().unwrap().len(), 2);
        assert_eq!(v["nullifier"], BigUint::from_bytes_le(&[1; 31]).to_string());
    }

    #[test]
    fn test_parse_prover_output() {
        assert_eq!(parse_prover_output(b"{\"proof\": \"0xabcd\"}\n").unwrap(), "0xabcd");
        assert_eq!(parse_prover_output(b"abcd").unwrap(), "0xabcd");
        assert!(parse_prover_output(b"{\"other\": 1}").is_err());
        assert!(parse_prover_output(b"0xabc").is_err());
    }

    #[tokio::test]
    async fn test_plan_reuses_merkle_proof() {
        let prover = Arc::new(EchoFee {
            calls: AtomicUsize::new(0),
        });
        let deposit = Deposit::new([1; 31], [2; 31]).unwrap();
        let plan = WithdrawalProofPlan::new(
            prover.clone(),
            deposit,
            merkle(),
            [0xaa; 20],
            [0xbb; 20],
            BigUint::from(0u8),
        );

        let estimate = plan.estimate(&BigUint::from(1u8)).await.unwrap();
        let last = plan.finalize(&BigUint::from(2u8)).await.unwrap();

        assert_eq!(estimate.proof, "0x01");
        assert_eq!(last.proof, "0x02");
        assert_eq!(estimate.args[0], last.args[0]);
        assert_ne!(estimate.args[4], last.args[4]);
        assert_eq!(prover.calls.load(Ordering::SeqCst), 2);
    }
}
