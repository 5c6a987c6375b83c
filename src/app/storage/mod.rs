pub mod kv;
pub mod rocks;

pub use kv::{KvStore, MemKv, WriteOp, WriteTx};
pub use rocks::RocksKv;
