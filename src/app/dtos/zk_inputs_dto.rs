//! Circuit input bundle sent to the prover. Every field element is
//! serialized as a decimal string, matching what the circuit tooling
//! expects.

use num_bigint::BigUint;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::app::errors::{NodeError, Result};
use crate::app::merkle::unpack_siblings;

fn ser_biguint<S: Serializer>(v: &BigUint, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

fn ser_vec_biguint<S: Serializer>(v: &[BigUint], s: S) -> std::result::Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(v.len()))?;
    for e in v {
        seq.serialize_element(&e.to_string())?;
    }
    seq.end()
}

fn ser_mat_biguint<S: Serializer>(v: &[Vec<BigUint>], s: S) -> std::result::Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(v.len()))?;
    for row in v {
        let row: Vec<String> = row.iter().map(|e| e.to_string()).collect();
        seq.serialize_element(&row)?;
    }
    seq.end()
}

/// Circuit shape parameters; not part of the serialized inputs.
#[derive(Debug, Clone, Copy)]
pub struct ZkCircuitMeta {
    pub n_max_votes: usize,
    pub n_levels: usize,
}

#[derive(Debug, Serialize)]
pub struct ZkInputs {
    #[serde(skip)]
    pub meta: ZkCircuitMeta,

    // public inputs
    #[serde(rename = "chainID", serialize_with = "ser_biguint")]
    pub chain_id: BigUint,
    #[serde(rename = "processID", serialize_with = "ser_biguint")]
    pub process_id: BigUint,
    #[serde(rename = "censusRoot", serialize_with = "ser_biguint")]
    pub census_root: BigUint,
    #[serde(rename = "receiptsRoot", serialize_with = "ser_biguint")]
    pub receipts_root: BigUint,
    #[serde(rename = "nVotes", serialize_with = "ser_biguint")]
    pub n_votes: BigUint,
    #[serde(rename = "result", serialize_with = "ser_biguint")]
    pub result: BigUint,
    #[serde(rename = "withReceipts", serialize_with = "ser_biguint")]
    pub with_receipts: BigUint,

    // private inputs, zero-padded to n_max_votes
    #[serde(rename = "vote", serialize_with = "ser_vec_biguint")]
    pub vote: Vec<BigUint>,
    #[serde(rename = "index", serialize_with = "ser_vec_biguint")]
    pub index: Vec<BigUint>,
    #[serde(rename = "pkX", serialize_with = "ser_vec_biguint")]
    pub pk_x: Vec<BigUint>,
    #[serde(rename = "pkY", serialize_with = "ser_vec_biguint")]
    pub pk_y: Vec<BigUint>,
    #[serde(rename = "s", serialize_with = "ser_vec_biguint")]
    pub s: Vec<BigUint>,
    #[serde(rename = "r8x", serialize_with = "ser_vec_biguint")]
    pub r8x: Vec<BigUint>,
    #[serde(rename = "r8y", serialize_with = "ser_vec_biguint")]
    pub r8y: Vec<BigUint>,
    #[serde(rename = "siblings", serialize_with = "ser_mat_biguint")]
    pub siblings: Vec<Vec<BigUint>>,
    #[serde(rename = "receiptsSiblings", serialize_with = "ser_mat_biguint")]
    pub receipts_siblings: Vec<Vec<BigUint>>,
}

fn zeroes(n: usize) -> Vec<BigUint> {
    vec![BigUint::default(); n]
}

impl ZkInputs {
    /// Zero-initialized inputs for the given circuit shape.
    pub fn new(n_max_votes: usize, n_levels: usize) -> ZkInputs {
        ZkInputs {
            meta: ZkCircuitMeta {
                n_max_votes,
                n_levels,
            },
            chain_id: BigUint::default(),
            process_id: BigUint::default(),
            census_root: BigUint::default(),
            receipts_root: BigUint::default(),
            n_votes: BigUint::default(),
            result: BigUint::default(),
            with_receipts: BigUint::default(),
            vote: zeroes(n_max_votes),
            index: zeroes(n_max_votes),
            pk_x: zeroes(n_max_votes),
            pk_y: zeroes(n_max_votes),
            s: zeroes(n_max_votes),
            r8x: zeroes(n_max_votes),
            r8y: zeroes(n_max_votes),
            siblings: vec![zeroes(n_levels); n_max_votes],
            receipts_siblings: vec![zeroes(n_levels); n_max_votes],
        }
    }
}

/// Unpacks a compressed Merkle proof into the fixed-length siblings row the
/// circuit consumes: field elements, zero-padded to exactly `n_levels`.
pub fn merkle_proof_to_circuit(packed: &[u8], n_levels: usize) -> Result<Vec<BigUint>> {
    let siblings = unpack_siblings(packed)?;
    if siblings.len() > n_levels {
        return Err(NodeError::CapacityExceeded(format!(
            "max nLevels: {}, number of siblings: {}",
            n_levels,
            siblings.len()
        )));
    }
    let mut out: Vec<BigUint> = siblings
        .iter()
        .map(|s| BigUint::from_bytes_le(s))
        .collect();
    out.resize(n_levels, BigUint::default());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::merkle::pack_siblings;

    #[test]
    fn test_serializes_decimal_strings() {
        let mut z = ZkInputs::new(2, 3);
        z.chain_id = BigUint::from(3u8);
        z.n_votes = BigUint::from(1u8);
        z.vote[0] = BigUint::from(1u8);

        let json: serde_json::Value = serde_json::to_value(&z).unwrap();
        assert_eq!(json["chainID"], "3");
        assert_eq!(json["nVotes"], "1");
        assert_eq!(json["withReceipts"], "0");
        assert_eq!(json["vote"], serde_json::json!(["1", "0"]));
        assert_eq!(
            json["siblings"],
            serde_json::json!([["0", "0", "0"], ["0", "0", "0"]])
        );
        // meta never leaves the node
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let mut z = ZkInputs::new(4, 2);
        z.process_id = BigUint::from(123u8);
        let a = serde_json::to_vec(&z).unwrap();
        let b = serde_json::to_vec(&z).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_merkle_proof_to_circuit_pads() {
        let s = [5u8; 32];
        let packed = pack_siblings(&[s]);
        let row = merkle_proof_to_circuit(&packed, 4).unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row[0], BigUint::from_bytes_le(&s));
        assert_eq!(row[1], BigUint::default());
    }

    #[test]
    fn test_merkle_proof_too_deep() {
        let siblings = vec![[1u8; 32]; 5];
        let packed = pack_siblings(&siblings);
        assert!(matches!(
            merkle_proof_to_circuit(&packed, 4),
            Err(NodeError::CapacityExceeded(_))
        ));
    }
}
