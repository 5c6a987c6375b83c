use std::path::Path;

use rocksdb::{Options, WriteBatch, DB};

use crate::app::errors::Result;
use crate::app::storage::kv::{KvStore, WriteOp};

/// RocksDB-backed [`KvStore`]. One database directory per census; writes
/// go through a `WriteBatch` so a batch commits atomically or not at all.
pub struct RocksKv {
    db: DB,
}

impl RocksKv {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(RocksKv { db })
    }
}

impl KvStore for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn write(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                WriteOp::Put(k, v) => batch.put(k, v),
                WriteOp::Delete(k) => batch.delete(k),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }
}
