use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::app::entities::process_entity::Meta;
use crate::app::errors::{NodeError, Result};
use crate::app::repository::ProcessStore;

impl ProcessStore {
    /// Initializes the singleton meta row on first run; on later runs it
    /// verifies the configured chain matches the one already synced.
    pub fn init_meta(&self, chain_id: u64, start_block: u64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(id, chainID, lastSyncBlockNum, lastUpdate)
             VALUES (1, ?1, ?2, ?3)",
            params![chain_id, start_block, Utc::now()],
        )?;
        drop(conn);

        let meta = self.get_meta()?;
        if meta.chain_id != chain_id {
            return Err(NodeError::InvalidInput(format!(
                "chainID mismatch: db has {}, configured {}",
                meta.chain_id, chain_id
            )));
        }
        Ok(())
    }

    pub fn get_meta(&self) -> Result<Meta> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT chainID, lastSyncBlockNum FROM meta WHERE id = 1",
            [],
            |row| {
                Ok(Meta {
                    chain_id: row.get(0)?,
                    last_sync_block: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| NodeError::Storage("meta row not initialized".to_string()))
    }

    pub fn last_sync_block(&self) -> Result<u64> {
        Ok(self.get_meta()?.last_sync_block)
    }

    /// The checkpoint only moves forward; it must be advanced only after
    /// all events of the block have been applied.
    pub fn update_last_sync_block(&self, block: u64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE meta SET lastSyncBlockNum = ?1, lastUpdate = ?2
             WHERE id = 1 AND lastSyncBlockNum <= ?1",
            params![block, Utc::now()],
        )?;
        Ok(())
    }
}
