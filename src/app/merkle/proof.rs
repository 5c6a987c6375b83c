//! Packed Merkle proof format and stateless verification.
//!
//! Layout: `full_len (2B LE) || bitmap_len (2B LE) || bitmap || siblings`,
//! where the bitmap marks non-empty siblings (little-endian bit order,
//! root-to-leaf) and only non-empty siblings are serialized.

use crate::app::errors::{NodeError, Result};
use crate::app::merkle::tree::{internal_hash, key_bit, key_to_32, leaf_hash, EMPTY_HASH};
use crate::app::utils::poseidon::HASH_LEN;

pub fn pack_siblings(siblings: &[[u8; 32]]) -> Vec<u8> {
    let bitmap_len = (siblings.len() + 7) / 8;
    let mut bitmap = vec![0u8; bitmap_len];
    let mut non_empty: Vec<u8> = Vec::new();
    for (i, s) in siblings.iter().enumerate() {
        if *s != EMPTY_HASH {
            bitmap[i / 8] |= 1 << (i % 8);
            non_empty.extend_from_slice(s);
        }
    }

    let full_len = 4 + bitmap_len + non_empty.len();
    let mut out = Vec::with_capacity(full_len);
    out.extend_from_slice(&(full_len as u16).to_le_bytes());
    out.extend_from_slice(&(bitmap_len as u16).to_le_bytes());
    out.extend_from_slice(&bitmap);
    out.extend_from_slice(&non_empty);
    out
}

/// Expands a packed proof back into the ordered sibling list. Trailing
/// empty-marked bits after the last serialized sibling are dropped; the
/// deepest sibling of a proof is never empty.
pub fn unpack_siblings(packed: &[u8]) -> Result<Vec<[u8; 32]>> {
    if packed.len() < 4 {
        return Err(NodeError::InvalidInput("merkleproof too short".to_string()));
    }
    let full_len = u16::from_le_bytes([packed[0], packed[1]]) as usize;
    let bitmap_len = u16::from_le_bytes([packed[2], packed[3]]) as usize;
    if full_len != packed.len() || packed.len() < 4 + bitmap_len {
        return Err(NodeError::InvalidInput(
            "malformed merkleproof length".to_string(),
        ));
    }
    let bitmap = &packed[4..4 + bitmap_len];
    let sibling_bytes = &packed[4 + bitmap_len..];
    if sibling_bytes.len() % HASH_LEN != 0 {
        return Err(NodeError::InvalidInput(
            "malformed merkleproof siblings".to_string(),
        ));
    }

    let mut siblings = Vec::new();
    let mut consumed = 0usize;
    for i in 0..bitmap_len * 8 {
        if consumed >= sibling_bytes.len() {
            break;
        }
        if (bitmap[i / 8] >> (i % 8)) & 1 == 1 {
            let mut s = [0u8; 32];
            s.copy_from_slice(&sibling_bytes[consumed..consumed + HASH_LEN]);
            siblings.push(s);
            consumed += HASH_LEN;
        } else {
            siblings.push(EMPTY_HASH);
        }
    }
    Ok(siblings)
}

/// Verifies a packed existence proof for `value` at `key` against `root`.
pub fn check_proof(root: &[u8; 32], packed: &[u8], key: &[u8], value: &[u8; 32]) -> Result<bool> {
    let siblings = unpack_siblings(packed)?;
    if siblings.len() > 256 {
        return Err(NodeError::InvalidInput("merkleproof too deep".to_string()));
    }
    let key32 = key_to_32(key);

    let mut cur = leaf_hash(&key32, value);
    for i in (0..siblings.len()).rev() {
        cur = if key_bit(&key32, i) {
            internal_hash(&siblings[i], &cur)
        } else {
            internal_hash(&cur, &siblings[i])
        };
    }
    Ok(cur == *root)
}
