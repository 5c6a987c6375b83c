use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::utils::encoding::hex_bytes;

/// A prover ticket plus, once the prover has returned, the proof itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    /// Identifier assigned by the external prover.
    pub proof_id: u64,
    pub process_id: u64,
    /// Empty until the prover returns.
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    /// Empty until the prover returns.
    #[serde(with = "hex_bytes")]
    pub public_inputs: Vec<u8>,
    pub inserted_datetime: DateTime<Utc>,
    pub proof_added_datetime: Option<DateTime<Utc>>,
}

impl ProofRecord {
    pub fn is_complete(&self) -> bool {
        !self.proof.is_empty() && !self.public_inputs.is_empty()
    }
}
