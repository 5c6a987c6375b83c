use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::app::errors::{NodeError, Result};
use crate::app::utils::babyjubjub::Point;
use crate::app::utils::encoding::hex_bytes;
use crate::app::utils::poseidon;

/// Body of POST /census and POST /census/:id. Public keys travel as
/// 32-byte compressed hex, weights as decimal strings.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewCensusReq {
    #[validate(length(min = 1))]
    pub public_keys: Vec<String>,
    pub weights: Vec<String>,
}

impl NewCensusReq {
    /// Decodes and validates the request into curve points and in-field
    /// weights.
    pub fn parse(&self) -> Result<Vec<(Point, BigUint)>> {
        if self.public_keys.len() != self.weights.len() {
            return Err(NodeError::InvalidInput(format!(
                "got {} publicKeys but {} weights",
                self.public_keys.len(),
                self.weights.len()
            )));
        }
        let modulus = poseidon::fr_modulus();
        let mut out = Vec::with_capacity(self.public_keys.len());
        for (pk_hex, weight_str) in self.public_keys.iter().zip(self.weights.iter()) {
            let pk = parse_public_key(pk_hex)?;
            let weight = BigUint::parse_bytes(weight_str.as_bytes(), 10).ok_or_else(|| {
                NodeError::InvalidInput(format!("invalid weight: {}", weight_str))
            })?;
            if weight >= modulus {
                return Err(NodeError::InvalidInput(format!(
                    "weight does not fit in the field: {}",
                    weight_str
                )));
            }
            out.push((pk, weight));
        }
        Ok(out)
    }
}

/// Decodes a hex compressed BabyJubJub public key.
pub fn parse_public_key(h: &str) -> Result<Point> {
    let bytes = hex::decode(h.trim_start_matches("0x"))?;
    let comp: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| NodeError::InvalidInput(format!("unexpected pubKey length: {}", b.len())))?;
    Point::decompress(&comp)
}

/// Response of GET /census/:id. The root appears once the census is
/// closed, in the little-endian storage form.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CensusInfo {
    pub size: u64,
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
}

/// Response of GET /census/:id/merkleproof/:pubkey. The public key is not
/// echoed back, the caller already knows it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CensusProofRes {
    pub index: u64,
    #[serde(with = "hex_bytes")]
    pub merkle_proof: Vec<u8>,
}

/// Response of POST /census.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCensusRes {
    pub census_id: u64,
}
