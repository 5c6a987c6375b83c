//! A single census: one sparse Merkle tree of weighted public keys with an
//! incrementally assigned leaf index space and a one-way closed flag.

use std::sync::Arc;

use num_bigint::BigUint;

use crate::app::dtos::census_dto::CensusInfo;
use crate::app::errors::{NodeError, Result};
use crate::app::merkle::MerkleTree;
use crate::app::storage::{KvStore, WriteTx};
use crate::app::utils::babyjubjub::Point;
use crate::app::utils::poseidon;

/// Depth of every census tree.
pub const MAX_LEVELS: usize = 64;
/// Leaf key length in bytes.
pub const MAX_KEY_LEN: usize = (MAX_LEVELS + 7) / 8;

const KEY_NEXT_INDEX: &[u8] = b"nextIndex";
const KEY_CLOSED: &[u8] = b"censusClosed";
const KEY_ERRMSG: &[u8] = b"errmsg";
// member bindings live under their own prefix so a compressed key can
// never collide with a tree node record
const PUBKEY_PREFIX: u8 = b'p';

/// Tree key of a leaf index.
pub fn index_to_key(index: u64) -> [u8; MAX_KEY_LEN] {
    index.to_le_bytes()
}

/// Leaf value placed in the tree for a member.
pub fn leaf_value(pk: &Point, weight: &BigUint) -> [u8; 32] {
    poseidon::hash_to_bytes(&[pk.x, pk.y, poseidon::biguint_to_fr(weight)])
}

fn pubkey_binding_key(pk: &Point) -> Vec<u8> {
    let mut k = Vec::with_capacity(33);
    k.push(PUBKEY_PREFIX);
    k.extend_from_slice(&pk.compress());
    k
}

pub struct Census {
    kv: Arc<dyn KvStore>,
    tree: MerkleTree,
}

impl Census {
    /// Opens the census over the given store, initializing its persisted
    /// state on first use. Re-opening reads the existing state, including
    /// the closed flag.
    pub fn new(kv: Arc<dyn KvStore>) -> Result<Census> {
        let tree = MerkleTree::new(kv.clone(), MAX_LEVELS);
        let census = Census { kv, tree };

        let mut tx = WriteTx::new(census.kv.as_ref());
        if tx.get(KEY_NEXT_INDEX)?.is_none() {
            tx.set(KEY_NEXT_INDEX.to_vec(), 0u64.to_le_bytes().to_vec());
            tx.set(KEY_CLOSED.to_vec(), vec![0]);
            tx.set(KEY_ERRMSG.to_vec(), Vec::new());
            tx.commit()?;
        }
        Ok(census)
    }

    fn next_index_tx(&self, tx: &WriteTx<'_>) -> Result<u64> {
        let b = tx
            .get(KEY_NEXT_INDEX)?
            .ok_or_else(|| NodeError::Storage("missing nextIndex".to_string()))?;
        let arr: [u8; 8] = b
            .try_into()
            .map_err(|_| NodeError::Corruption("malformed nextIndex".to_string()))?;
        Ok(u64::from_le_bytes(arr))
    }

    /// Number of public keys added so far.
    pub fn size(&self) -> Result<u64> {
        let tx = WriteTx::new(self.kv.as_ref());
        self.next_index_tx(&tx)
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(matches!(self.kv.get(KEY_CLOSED)?, Some(b) if b == [1]))
    }

    /// Closes the census; once closed it never becomes editable again.
    pub fn close(&self) -> Result<()> {
        if self.is_closed()? {
            return Err(NodeError::CensusAlreadyClosed);
        }
        self.kv.put(KEY_CLOSED.to_vec(), vec![1])
    }

    /// The census root, defined only once the census is closed.
    pub fn root(&self) -> Result<[u8; 32]> {
        if !self.is_closed()? {
            return Err(NodeError::CensusNotClosed);
        }
        self.tree.root()
    }

    /// Adds a batch of weighted public keys, assigning consecutive leaf
    /// indexes. The whole batch commits atomically: either every key is
    /// added and `nextIndex` advances by the batch length, or nothing
    /// changes.
    pub fn add_public_keys(&self, keys: &[(Point, BigUint)]) -> Result<()> {
        if self.is_closed()? {
            return Err(NodeError::CensusClosed);
        }
        let modulus = poseidon::fr_modulus();
        for (_, weight) in keys {
            if *weight >= modulus {
                return Err(NodeError::InvalidInput(
                    "weight does not fit in the field".to_string(),
                ));
            }
        }

        let mut tx = WriteTx::new(self.kv.as_ref());
        let next_index = self.next_index_tx(&tx)?;
        next_index
            .checked_add(keys.len() as u64)
            .ok_or_else(|| {
                NodeError::CapacityExceeded(format!(
                    "max number of leaves reached, current index: {}, trying to add {} keys",
                    next_index,
                    keys.len()
                ))
            })?;

        let mut tree_keys = Vec::with_capacity(keys.len());
        let mut tree_values = Vec::with_capacity(keys.len());
        for (i, (pk, weight)) in keys.iter().enumerate() {
            let index = next_index + i as u64;

            let mut binding = Vec::with_capacity(8 + 32);
            binding.extend_from_slice(&index.to_le_bytes());
            binding.extend_from_slice(&weight.to_bytes_le());
            tx.set(pubkey_binding_key(pk), binding);

            tree_keys.push(index_to_key(index).to_vec());
            tree_values.push(leaf_value(pk, weight));
        }

        let invalids = self.tree.add_batch(&mut tx, &tree_keys, &tree_values)?;
        if !invalids.is_empty() {
            return Err(NodeError::InvalidInput(format!(
                "can not add {} public keys, first invalid (index {}): {}",
                invalids.len(),
                invalids[0].index,
                invalids[0].reason
            )));
        }

        tx.set(
            KEY_NEXT_INDEX.to_vec(),
            (next_index + keys.len() as u64).to_le_bytes().to_vec(),
        );
        tx.commit()
    }

    /// Returns the assigned index and the packed Merkle proof for the
    /// given public key. Only available once the census is closed, so the
    /// proof refers to the final root.
    pub fn get_proof(&self, pk: &Point) -> Result<(u64, Vec<u8>)> {
        if !self.is_closed()? {
            return Err(NodeError::CensusNotClosed);
        }

        let binding = self
            .kv
            .get(&pubkey_binding_key(pk))?
            .ok_or(NodeError::UnknownPublicKey)?;
        if binding.len() < 8 {
            return Err(NodeError::Corruption("malformed pubKey binding".to_string()));
        }
        let index = u64::from_le_bytes(
            binding[..8]
                .try_into()
                .map_err(|_| NodeError::Corruption("malformed pubKey binding".to_string()))?,
        );
        let weight = BigUint::from_bytes_le(&binding[8..]);

        let (stored_leaf, packed) = self.tree.gen_proof(&index_to_key(index))?;
        if stored_leaf != leaf_value(pk, &weight) {
            return Err(NodeError::Corruption(format!(
                "leaf value does not match the public key (index {})",
                index
            )));
        }
        Ok((index, packed))
    }

    /// Error memo written by the asynchronous batch-add path.
    pub fn set_err_msg(&self, msg: &str) -> Result<()> {
        self.kv.put(KEY_ERRMSG.to_vec(), msg.as_bytes().to_vec())
    }

    pub fn get_err_msg(&self) -> Result<String> {
        let b = self.kv.get(KEY_ERRMSG)?.unwrap_or_default();
        String::from_utf8(b).map_err(|_| NodeError::Corruption("malformed errmsg".to_string()))
    }

    pub fn info(&self) -> Result<CensusInfo> {
        let closed = self.is_closed()?;
        let root = if closed {
            Some(hex::encode(self.tree.root()?))
        } else {
            None
        };
        let err_msg = self.get_err_msg()?;
        Ok(CensusInfo {
            size: self.size()?,
            closed,
            root,
            err_msg: if err_msg.is_empty() { None } else { Some(err_msg) },
        })
    }
}
