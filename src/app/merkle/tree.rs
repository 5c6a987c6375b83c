//! Sparse Merkle tree over Poseidon. Leaves hash as
//! `Poseidon(key, value, 1)` and internal nodes as `Poseidon(left, right)`;
//! an empty subtree is all-zero bytes. The path of a key is its bits taken
//! little-endian first, and a leaf is pushed down when a new key shares its
//! path prefix.

use std::sync::Arc;

use halo2_base::halo2_proofs::halo2curves::bn256::Fr;

use crate::app::errors::{NodeError, Result};
use crate::app::merkle::proof::pack_siblings;
use crate::app::storage::{KvStore, WriteTx};
use crate::app::utils::poseidon;

/// Hash of an empty subtree.
pub const EMPTY_HASH: [u8; 32] = [0u8; 32];

const ROOT_KEY: &[u8] = b"treeRoot";
const NODE_PREFIX: u8 = b't';

const NODE_TYPE_INTERNAL: u8 = 0;
const NODE_TYPE_LEAF: u8 = 1;

/// A leaf the tree refused during a batch insertion.
#[derive(Debug)]
pub struct Invalid {
    pub index: usize,
    pub reason: String,
}

enum Node {
    Internal([u8; 32], [u8; 32]),
    Leaf([u8; 32], [u8; 32]),
}

pub struct MerkleTree {
    kv: Arc<dyn KvStore>,
    max_levels: usize,
}

pub(crate) fn leaf_hash(key32: &[u8; 32], value: &[u8; 32]) -> [u8; 32] {
    poseidon::hash_to_bytes(&[
        poseidon::fr_from_le_bytes(key32),
        poseidon::fr_from_le_bytes(value),
        Fr::from(1u64),
    ])
}

pub(crate) fn internal_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    poseidon::hash_to_bytes(&[
        poseidon::fr_from_le_bytes(left),
        poseidon::fr_from_le_bytes(right),
    ])
}

pub(crate) fn key_to_32(key: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..key.len()].copy_from_slice(key);
    out
}

/// Bit `i` of the key, little-endian first; selects right when set.
pub(crate) fn key_bit(key32: &[u8; 32], i: usize) -> bool {
    (key32[i / 8] >> (i % 8)) & 1 == 1
}

impl MerkleTree {
    pub fn new(kv: Arc<dyn KvStore>, max_levels: usize) -> MerkleTree {
        MerkleTree { kv, max_levels }
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    pub fn root(&self) -> Result<[u8; 32]> {
        match self.kv.get(ROOT_KEY)? {
            Some(b) => as_hash(&b),
            None => Ok(EMPTY_HASH),
        }
    }

    fn root_tx(&self, tx: &WriteTx<'_>) -> Result<[u8; 32]> {
        match tx.get(ROOT_KEY)? {
            Some(b) => as_hash(&b),
            None => Ok(EMPTY_HASH),
        }
    }

    fn node_key(hash: &[u8; 32]) -> Vec<u8> {
        let mut k = Vec::with_capacity(33);
        k.push(NODE_PREFIX);
        k.extend_from_slice(hash);
        k
    }

    fn read_node(&self, tx: &WriteTx<'_>, hash: &[u8; 32]) -> Result<Node> {
        let raw = tx.get(&Self::node_key(hash))?.ok_or_else(|| {
            NodeError::Corruption(format!("missing tree node {}", hex::encode(hash)))
        })?;
        if raw.len() != 65 {
            return Err(NodeError::Corruption("malformed tree node".to_string()));
        }
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a.copy_from_slice(&raw[1..33]);
        b.copy_from_slice(&raw[33..65]);
        match raw[0] {
            NODE_TYPE_INTERNAL => Ok(Node::Internal(a, b)),
            NODE_TYPE_LEAF => Ok(Node::Leaf(a, b)),
            t => Err(NodeError::Corruption(format!("unknown tree node type {}", t))),
        }
    }

    fn write_leaf(&self, tx: &mut WriteTx<'_>, key32: &[u8; 32], value: &[u8; 32]) -> [u8; 32] {
        let h = leaf_hash(key32, value);
        let mut raw = Vec::with_capacity(65);
        raw.push(NODE_TYPE_LEAF);
        raw.extend_from_slice(key32);
        raw.extend_from_slice(value);
        tx.set(Self::node_key(&h), raw);
        h
    }

    fn write_internal(&self, tx: &mut WriteTx<'_>, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        let h = internal_hash(left, right);
        let mut raw = Vec::with_capacity(65);
        raw.push(NODE_TYPE_INTERNAL);
        raw.extend_from_slice(left);
        raw.extend_from_slice(right);
        tx.set(Self::node_key(&h), raw);
        h
    }

    /// Inserts one leaf inside the given transaction.
    pub fn add_with_tx(&self, tx: &mut WriteTx<'_>, key: &[u8], value: &[u8; 32]) -> Result<()> {
        if key.len() > (self.max_levels + 7) / 8 {
            return Err(NodeError::InvalidInput(format!(
                "key length {} out of range for {} levels",
                key.len(),
                self.max_levels
            )));
        }
        let key32 = key_to_32(key);

        let mut siblings: Vec<[u8; 32]> = Vec::new();
        let mut cur = self.root_tx(tx)?;
        let mut depth = 0usize;

        let new_subroot = loop {
            if cur == EMPTY_HASH {
                break self.write_leaf(tx, &key32, value);
            }
            match self.read_node(tx, &cur)? {
                Node::Internal(l, r) => {
                    if depth >= self.max_levels {
                        return Err(NodeError::CapacityExceeded(format!(
                            "max levels ({}) reached",
                            self.max_levels
                        )));
                    }
                    if key_bit(&key32, depth) {
                        siblings.push(l);
                        cur = r;
                    } else {
                        siblings.push(r);
                        cur = l;
                    }
                    depth += 1;
                }
                Node::Leaf(other_key, _) => {
                    if other_key == key32 {
                        return Err(NodeError::InvalidInput(
                            "key already exists in the tree".to_string(),
                        ));
                    }
                    break self.push_down(tx, depth, &key32, value, &other_key, &cur)?;
                }
            }
        };

        // rebuild the hashes along the descent path
        let mut cur_hash = new_subroot;
        for i in (0..siblings.len()).rev() {
            cur_hash = if key_bit(&key32, i) {
                self.write_internal(tx, &siblings[i], &cur_hash)
            } else {
                self.write_internal(tx, &cur_hash, &siblings[i])
            };
        }
        tx.set(ROOT_KEY.to_vec(), cur_hash.to_vec());
        Ok(())
    }

    // Replaces an occupied slot by a chain of internal nodes down to the
    // first bit where the two keys diverge, with both leaves below it.
    fn push_down(
        &self,
        tx: &mut WriteTx<'_>,
        depth: usize,
        key32: &[u8; 32],
        value: &[u8; 32],
        old_key32: &[u8; 32],
        old_leaf_hash: &[u8; 32],
    ) -> Result<[u8; 32]> {
        let mut d = depth;
        while d < self.max_levels && key_bit(key32, d) == key_bit(old_key32, d) {
            d += 1;
        }
        if d >= self.max_levels {
            return Err(NodeError::CapacityExceeded(format!(
                "max levels ({}) reached",
                self.max_levels
            )));
        }

        let new_leaf = self.write_leaf(tx, key32, value);
        let mut cur = if key_bit(key32, d) {
            self.write_internal(tx, old_leaf_hash, &new_leaf)
        } else {
            self.write_internal(tx, &new_leaf, old_leaf_hash)
        };
        for dd in (depth..d).rev() {
            cur = if key_bit(key32, dd) {
                self.write_internal(tx, &EMPTY_HASH, &cur)
            } else {
                self.write_internal(tx, &cur, &EMPTY_HASH)
            };
        }
        Ok(cur)
    }

    /// Inserts a batch of leaves inside one transaction, collecting the
    /// leaves the tree refuses instead of aborting on them.
    pub fn add_batch(
        &self,
        tx: &mut WriteTx<'_>,
        keys: &[Vec<u8>],
        values: &[[u8; 32]],
    ) -> Result<Vec<Invalid>> {
        if keys.len() != values.len() {
            return Err(NodeError::InvalidInput(
                "keys and values length mismatch".to_string(),
            ));
        }
        let mut invalids = Vec::new();
        for (i, (k, v)) in keys.iter().zip(values.iter()).enumerate() {
            match self.add_with_tx(tx, k, v) {
                Ok(()) => {}
                Err(e @ (NodeError::InvalidInput(_) | NodeError::CapacityExceeded(_))) => {
                    invalids.push(Invalid {
                        index: i,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(invalids)
    }

    /// Generates the packed existence proof for the given key. Returns the
    /// stored leaf value along with the packed siblings.
    pub fn gen_proof(&self, key: &[u8]) -> Result<([u8; 32], Vec<u8>)> {
        let key32 = key_to_32(key);
        let tx = WriteTx::new(self.kv.as_ref());

        let mut siblings: Vec<[u8; 32]> = Vec::new();
        let mut cur = self.root_tx(&tx)?;
        let mut depth = 0usize;
        loop {
            if cur == EMPTY_HASH {
                return Err(NodeError::InvalidInput(
                    "key does not exist in the tree".to_string(),
                ));
            }
            match self.read_node(&tx, &cur)? {
                Node::Internal(l, r) => {
                    if depth >= self.max_levels {
                        return Err(NodeError::Corruption(
                            "tree deeper than max levels".to_string(),
                        ));
                    }
                    if key_bit(&key32, depth) {
                        siblings.push(l);
                        cur = r;
                    } else {
                        siblings.push(r);
                        cur = l;
                    }
                    depth += 1;
                }
                Node::Leaf(leaf_key, leaf_value) => {
                    if leaf_key != key32 {
                        return Err(NodeError::InvalidInput(
                            "key does not exist in the tree".to_string(),
                        ));
                    }
                    return Ok((leaf_value, pack_siblings(&siblings)));
                }
            }
        }
    }
}

fn as_hash(b: &[u8]) -> Result<[u8; 32]> {
    if b.len() != 32 {
        return Err(NodeError::Corruption("malformed tree root".to_string()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(b);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::merkle::proof::check_proof;
    use crate::app::storage::MemKv;

    fn new_tree(levels: usize) -> MerkleTree {
        MerkleTree::new(Arc::new(MemKv::new()), levels)
    }

    fn leaf_value(i: u64) -> [u8; 32] {
        poseidon::hash_to_bytes(&[Fr::from(i)])
    }

    #[test]
    fn test_empty_root() {
        let tree = new_tree(64);
        assert_eq!(tree.root().unwrap(), EMPTY_HASH);
    }

    #[test]
    fn test_add_and_prove() {
        let tree = new_tree(64);
        let mut tx = WriteTx::new(tree.kv.as_ref());
        let keys: Vec<Vec<u8>> = (0u64..50).map(|i| i.to_le_bytes().to_vec()).collect();
        let values: Vec<[u8; 32]> = (0u64..50).map(leaf_value).collect();
        let invalids = tree.add_batch(&mut tx, &keys, &values).unwrap();
        assert!(invalids.is_empty());
        tx.commit().unwrap();

        let root = tree.root().unwrap();
        assert_ne!(root, EMPTY_HASH);

        for i in 0..50u64 {
            let (value, packed) = tree.gen_proof(&i.to_le_bytes()).unwrap();
            assert_eq!(value, leaf_value(i));
            assert!(check_proof(&root, &packed, &i.to_le_bytes(), &value).unwrap());
        }
    }

    #[test]
    fn test_proof_tampering_fails() {
        let tree = new_tree(64);
        let mut tx = WriteTx::new(tree.kv.as_ref());
        let keys: Vec<Vec<u8>> = (0u64..10).map(|i| i.to_le_bytes().to_vec()).collect();
        let values: Vec<[u8; 32]> = (0u64..10).map(leaf_value).collect();
        tree.add_batch(&mut tx, &keys, &values).unwrap();
        tx.commit().unwrap();

        let root = tree.root().unwrap();
        let (value, packed) = tree.gen_proof(&3u64.to_le_bytes()).unwrap();

        // wrong index
        assert!(!check_proof(&root, &packed, &4u64.to_le_bytes(), &value).unwrap());
        // wrong value
        assert!(!check_proof(&root, &packed, &3u64.to_le_bytes(), &leaf_value(99)).unwrap());
        // wrong root
        let mut bad_root = root;
        bad_root[0] ^= 1;
        assert!(!check_proof(&bad_root, &packed, &3u64.to_le_bytes(), &value).unwrap());
        // corrupted proof bytes
        let mut bad_proof = packed.clone();
        let last = bad_proof.len() - 1;
        bad_proof[last] ^= 1;
        assert!(!check_proof(&root, &bad_proof, &3u64.to_le_bytes(), &value).unwrap());
    }

    #[test]
    fn test_root_stability_same_insertion_order() {
        let build = || {
            let tree = new_tree(64);
            let mut tx = WriteTx::new(tree.kv.as_ref());
            let keys: Vec<Vec<u8>> = (0u64..20).map(|i| i.to_le_bytes().to_vec()).collect();
            let values: Vec<[u8; 32]> = (0u64..20).map(leaf_value).collect();
            tree.add_batch(&mut tx, &keys, &values).unwrap();
            tx.commit().unwrap();
            tree.root().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_duplicate_key_refused() {
        let tree = new_tree(64);
        let mut tx = WriteTx::new(tree.kv.as_ref());
        tree.add_with_tx(&mut tx, &0u64.to_le_bytes(), &leaf_value(0))
            .unwrap();
        let err = tree
            .add_with_tx(&mut tx, &0u64.to_le_bytes(), &leaf_value(1))
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput(_)));
    }

    #[test]
    fn test_shallow_tree_capacity() {
        // depth 2 holds at most 4 distinct paths; the 5th insertion has to
        // collide with an existing prefix
        let tree = new_tree(2);
        let mut tx = WriteTx::new(tree.kv.as_ref());
        let keys: Vec<Vec<u8>> = (0u8..5).map(|i| vec![i]).collect();
        let values: Vec<[u8; 32]> = (0u64..5).map(leaf_value).collect();
        let invalids = tree.add_batch(&mut tx, &keys, &values).unwrap();
        assert_eq!(invalids.len(), 1);
    }

    #[test]
    fn test_missing_key_proof_fails() {
        let tree = new_tree(64);
        let mut tx = WriteTx::new(tree.kv.as_ref());
        tree.add_with_tx(&mut tx, &1u64.to_le_bytes(), &leaf_value(1))
            .unwrap();
        tx.commit().unwrap();
        assert!(tree.gen_proof(&2u64.to_le_bytes()).is_err());
    }
}
