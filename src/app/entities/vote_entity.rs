use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::app::utils::encoding::{biguint_dec, hex_bytes};

/// Inclusion proof of a public key in a census tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CensusProof {
    /// Leaf index assigned when the key was added to the census.
    pub index: u64,
    /// Compressed BabyJubJub public key, 32 bytes.
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Voting weight bound to the key; part of the leaf preimage.
    #[serde(default, with = "biguint_dec")]
    pub weight: BigUint,
    #[serde(with = "hex_bytes")]
    pub merkle_proof: Vec<u8>,
}

/// The signed ballot sent by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotePackage {
    /// Compressed EdDSA signature, 64 bytes.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub census_proof: CensusProof,
    /// Vote value bytes, interpreted as a field element in {0, 1}.
    #[serde(with = "hex_bytes")]
    pub vote: Vec<u8>,
}
