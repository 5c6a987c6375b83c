use std::collections::HashMap;

use parking_lot::RwLock;

use crate::app::errors::{NodeError, Result};

/// A single operation inside an atomic write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Minimal key-value store contract: point reads plus atomic multi-key
/// writes. Each census owns its own store so iteration and recovery stay
/// local to the tenant.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Applies all operations atomically: either every op is visible after
    /// this returns Ok, or none is.
    fn write(&self, ops: Vec<WriteOp>) -> Result<()>;
}

/// Staged write transaction over a [`KvStore`]. Reads see the staged
/// writes (read-your-writes), and nothing touches the underlying store
/// until `commit`. Dropping the transaction discards it.
pub struct WriteTx<'a> {
    kv: &'a dyn KvStore,
    staged: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> WriteTx<'a> {
    pub fn new(kv: &'a dyn KvStore) -> Self {
        WriteTx {
            kv,
            staged: HashMap::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        self.kv.get(key)
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.staged.insert(key, None);
    }

    pub fn commit(self) -> Result<()> {
        let ops = self
            .staged
            .into_iter()
            .map(|(k, v)| match v {
                Some(v) => WriteOp::Put(k, v),
                None => WriteOp::Delete(k),
            })
            .collect();
        self.kv.write(ops)
    }
}

/// In-memory store, used for the ephemeral receipts trees and in tests.
#[derive(Default)]
pub struct MemKv {
    map: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut map = self.map.write();
        for op in ops {
            match op {
                WriteOp::Put(k, v) => {
                    map.insert(k, v);
                }
                WriteOp::Delete(k) => {
                    map.remove(&k);
                }
            }
        }
        Ok(())
    }
}

impl dyn KvStore {
    /// Convenience for single-key writes that still go through the atomic
    /// write path.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.write(vec![WriteOp::Put(key, value)])
    }

    /// Reads a key that is required to be present.
    pub fn get_required(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.get(key)?
            .ok_or_else(|| NodeError::Storage(format!("missing key {}", hex::encode(key))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_tx_read_your_writes() {
        let kv = MemKv::new();
        let mut tx = WriteTx::new(&kv);
        tx.set(b"a".to_vec(), b"1".to_vec());
        assert_eq!(tx.get(b"a").unwrap(), Some(b"1".to_vec()));
        // nothing visible outside the tx before commit
        assert_eq!(kv.get(b"a").unwrap(), None);
        tx.commit().unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_write_tx_discard() {
        let kv = MemKv::new();
        {
            let mut tx = WriteTx::new(&kv);
            tx.set(b"a".to_vec(), b"1".to_vec());
            // dropped without commit
        }
        assert_eq!(kv.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_write_tx_delete() {
        let kv = MemKv::new();
        kv.write(vec![WriteOp::Put(b"a".to_vec(), b"1".to_vec())])
            .unwrap();
        let mut tx = WriteTx::new(&kv);
        tx.delete(b"a".to_vec());
        assert_eq!(tx.get(b"a").unwrap(), None);
        tx.commit().unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
    }
}
