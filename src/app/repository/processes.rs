use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::app::entities::process_entity::{Process, ProcessStatus};
use crate::app::errors::{NodeError, Result};
use crate::app::repository::ProcessStore;

fn row_to_process(row: &Row<'_>) -> rusqlite::Result<Process> {
    let status_raw: u8 = row.get("status")?;
    let status = ProcessStatus::try_from(status_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, e.into())
    })?;
    Ok(Process {
        id: row.get("id")?,
        census_root: row.get("censusRoot")?,
        census_size: row.get("censusSize")?,
        eth_block_num: row.get("ethBlockNum")?,
        res_pub_start_block: row.get("resPubStartBlock")?,
        res_pub_window: row.get("resPubWindow")?,
        min_participation: row.get("minParticipation")?,
        min_positive_votes: row.get("minPositiveVotes")?,
        typ: row.get("type")?,
        inserted_datetime: row.get("insertedDatetime")?,
        status,
    })
}

const SELECT_PROCESS: &str = "SELECT id, status, censusRoot, censusSize, ethBlockNum, \
     resPubStartBlock, resPubWindow, minParticipation, minPositiveVotes, type, \
     insertedDatetime FROM processes";

impl ProcessStore {
    /// Stores a new process as it comes from the smart contract, with
    /// status On. Re-storing an already known id is a no-op, so replaying
    /// event logs after a restart is safe.
    #[allow(clippy::too_many_arguments)]
    pub fn store_process(
        &self,
        id: u64,
        census_root: &[u8],
        census_size: u64,
        eth_block_num: u64,
        res_pub_start_block: u64,
        res_pub_window: u64,
        min_participation: u8,
        min_positive_votes: u8,
        typ: u8,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO processes(
                id, status, censusRoot, censusSize, ethBlockNum,
                resPubStartBlock, resPubWindow, minParticipation,
                minPositiveVotes, type, insertedDatetime
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                u8::from(ProcessStatus::On),
                census_root,
                census_size,
                eth_block_num,
                res_pub_start_block,
                res_pub_window,
                min_participation,
                min_positive_votes,
                typ,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn read_process_by_id(&self, id: u64) -> Result<Process> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE id = ?1", SELECT_PROCESS);
        conn.query_row(&sql, params![id], row_to_process)
            .optional()?
            .ok_or(NodeError::UnknownProcess(id))
    }

    pub fn read_processes(&self) -> Result<Vec<Process>> {
        let conn = self.conn()?;
        let sql = format!("{} ORDER BY ethBlockNum ASC", SELECT_PROCESS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_process)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn read_processes_by_status(&self, status: ProcessStatus) -> Result<Vec<Process>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE status = ?1 ORDER BY ethBlockNum ASC", SELECT_PROCESS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![u8::from(status)], row_to_process)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_process_status(&self, id: u64) -> Result<ProcessStatus> {
        let conn = self.conn()?;
        let raw: Option<u8> = conn
            .query_row(
                "SELECT status FROM processes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or(NodeError::UnknownProcess(id))?;
        ProcessStatus::try_from(raw).map_err(NodeError::Corruption)
    }

    /// Guarded status transition; the process status only moves forward.
    pub fn update_process_status(&self, id: u64, next: ProcessStatus) -> Result<()> {
        let current = self.get_process_status(id)?;
        if !current.can_transition_to(next) {
            return Err(NodeError::IllegalStatusTransition(
                current.into(),
                next.into(),
            ));
        }
        let conn = self.conn()?;
        conn.execute(
            "UPDATE processes SET status = ?1 WHERE id = ?2",
            params![u8::from(next), id],
        )?;
        Ok(())
    }

    /// Freezes every On process whose results-publishing phase has been
    /// reached at the given head block. Returns the number of rows moved.
    pub fn freeze_processes(&self, head: u64) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE processes SET status = ?1 WHERE status = ?2 AND resPubStartBlock <= ?3",
            params![
                u8::from(ProcessStatus::Frozen),
                u8::from(ProcessStatus::On),
                head
            ],
        )?;
        Ok(n)
    }
}
