use chrono::Utc;
use rusqlite::{params, ErrorCode, OptionalExtension, Row};

use crate::app::entities::proof_entity::ProofRecord;
use crate::app::errors::{NodeError, Result};
use crate::app::repository::ProcessStore;

fn row_to_proof(row: &Row<'_>) -> rusqlite::Result<ProofRecord> {
    Ok(ProofRecord {
        proof_id: row.get("proofID")?,
        process_id: row.get("processID")?,
        proof: row.get("proof")?,
        public_inputs: row.get("publicInputs")?,
        inserted_datetime: row.get("insertedDatetime")?,
        proof_added_datetime: row.get("proofAddedDatetime")?,
    })
}

const SELECT_PROOF: &str = "SELECT proofID, proof, publicInputs, insertedDatetime, \
     proofAddedDatetime, processID FROM proofs";

impl ProcessStore {
    /// Records the ticket returned by the prover; proof bytes stay empty
    /// until the prover finishes, which also marks the dispatch in-flight.
    pub fn store_proof_id(&self, process_id: u64, proof_id: u64) -> Result<()> {
        let conn = self.conn()?;
        let res = conn.execute(
            "INSERT INTO proofs(
                proofID, proof, publicInputs, insertedDatetime,
                proofAddedDatetime, processID
            ) VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![proof_id, Vec::<u8>::new(), Vec::<u8>::new(), Utc::now(), process_id],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == ErrorCode::ConstraintViolation
                    && msg.as_deref().unwrap_or_default().contains("FOREIGN KEY") =>
            {
                Err(NodeError::UnknownProcess(process_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fills in the proof and public inputs once the prover returns them.
    pub fn add_proof_to_proof_id(
        &self,
        process_id: u64,
        proof_id: u64,
        proof: &[u8],
        public_inputs: &[u8],
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE proofs SET proof = ?1, publicInputs = ?2, proofAddedDatetime = ?3
             WHERE processID = ?4 AND proofID = ?5",
            params![proof, public_inputs, Utc::now(), process_id, proof_id],
        )?;
        Ok(())
    }

    /// Latest proof record for a process: completed records first (newest
    /// addition), pending ones last.
    pub fn get_proof_by_process_id(&self, process_id: u64) -> Result<ProofRecord> {
        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE processID = ?1 ORDER BY proofAddedDatetime DESC LIMIT 1",
            SELECT_PROOF
        );
        conn.query_row(&sql, params![process_id], row_to_proof)
            .optional()?
            .ok_or(NodeError::ProofNotFound(process_id))
    }

    pub fn get_proofs_by_process_id(&self, process_id: u64) -> Result<Vec<ProofRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE processID = ?1 ORDER BY proofAddedDatetime DESC",
            SELECT_PROOF
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![process_id], row_to_proof)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::repository::test_helpers::test_store;

    #[test]
    fn test_proof_lifecycle() {
        let (store, _dir) = test_store();
        store
            .store_process(1, &[0u8; 32], 10, 5, 100, 10, 0, 50, 1)
            .unwrap();

        assert!(matches!(
            store.get_proof_by_process_id(1),
            Err(NodeError::ProofNotFound(1))
        ));

        store.store_proof_id(1, 42).unwrap();
        let rec = store.get_proof_by_process_id(1).unwrap();
        assert_eq!(rec.proof_id, 42);
        assert!(!rec.is_complete());
        assert!(rec.proof_added_datetime.is_none());

        store
            .add_proof_to_proof_id(1, 42, b"proof-bytes", b"public-bytes")
            .unwrap();
        let rec = store.get_proof_by_process_id(1).unwrap();
        assert!(rec.is_complete());
        assert_eq!(rec.proof, b"proof-bytes");
        assert_eq!(rec.public_inputs, b"public-bytes");
        assert!(rec.proof_added_datetime.is_some());
    }

    #[test]
    fn test_latest_proof_completed_first() {
        let (store, _dir) = test_store();
        store
            .store_process(1, &[0u8; 32], 10, 5, 100, 10, 0, 50, 1)
            .unwrap();
        store.store_proof_id(1, 1).unwrap();
        store.store_proof_id(1, 2).unwrap();
        store.add_proof_to_proof_id(1, 2, b"p", b"i").unwrap();

        // the completed record wins over the pending one
        let rec = store.get_proof_by_process_id(1).unwrap();
        assert_eq!(rec.proof_id, 2);

        let all = store.get_proofs_by_process_id(1).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].proof_id, 2);
    }

    #[test]
    fn test_proof_for_missing_process_rejected() {
        let (store, _dir) = test_store();
        assert!(matches!(
            store.store_proof_id(9, 1),
            Err(NodeError::UnknownProcess(9))
        ));
    }
}
