use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::utils::encoding::hex_bytes;

/// Status of a voting process, persisted as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProcessStatus {
    /// Voting phase, the process accepts votes.
    On,
    /// Results-publishing phase reached, no new votes; the proof can be
    /// generated.
    Frozen,
    /// The zkProof is being generated by the prover.
    ProofGenerating,
    /// The zkProof is available.
    ProofGenerated,
}

impl From<ProcessStatus> for u8 {
    fn from(s: ProcessStatus) -> u8 {
        match s {
            ProcessStatus::On => 0,
            ProcessStatus::Frozen => 1,
            ProcessStatus::ProofGenerating => 2,
            ProcessStatus::ProofGenerated => 3,
        }
    }
}

impl TryFrom<u8> for ProcessStatus {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ProcessStatus::On),
            1 => Ok(ProcessStatus::Frozen),
            2 => Ok(ProcessStatus::ProofGenerating),
            3 => Ok(ProcessStatus::ProofGenerated),
            other => Err(format!("unknown process status {}", other)),
        }
    }
}

impl ProcessStatus {
    /// The status machine only moves forward:
    /// On -> Frozen -> ProofGenerating -> ProofGenerated.
    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        matches!(
            (self, next),
            (ProcessStatus::On, ProcessStatus::Frozen)
                | (ProcessStatus::Frozen, ProcessStatus::ProofGenerating)
                | (ProcessStatus::ProofGenerating, ProcessStatus::ProofGenerated)
        )
    }
}

/// A voting process created by the smart contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Assigned by the smart contract, unique per chain.
    pub id: u64,
    /// Census root the votes are validated against; stored little-endian.
    #[serde(with = "hex_bytes")]
    pub census_root: Vec<u8>,
    pub census_size: u64,
    /// Block at which the process was created.
    pub eth_block_num: u64,
    /// Block at which voting freezes and results publishing starts.
    pub res_pub_start_block: u64,
    /// Length in blocks of the results publishing window.
    pub res_pub_window: u64,
    /// Minimum participation threshold, % over census size.
    pub min_participation: u8,
    /// Minimum supporting votes threshold, % over processed votes.
    pub min_positive_votes: u8,
    #[serde(rename = "type")]
    pub typ: u8,
    pub inserted_datetime: DateTime<Utc>,
    pub status: ProcessStatus,
}

/// Singleton row tracking the chain being synced and the checkpoint block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub chain_id: u64,
    pub last_sync_block: u64,
}
