use chrono::Utc;
use num_bigint::BigUint;
use rusqlite::{params, ErrorCode};

use crate::app::entities::vote_entity::{CensusProof, VotePackage};
use crate::app::errors::{NodeError, Result};
use crate::app::repository::ProcessStore;

impl ProcessStore {
    /// Persists an admitted vote package. The (processID, indx) and
    /// (processID, publicKey) constraints turn double votes into
    /// [`NodeError::DuplicateVote`].
    pub fn store_vote_package(&self, process_id: u64, vote: &VotePackage) -> Result<()> {
        let conn = self.conn()?;
        let res = conn.execute(
            "INSERT INTO votepackages(
                processID, indx, publicKey, weight, merkleproof, signature,
                vote, insertedDatetime
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                process_id,
                vote.census_proof.index,
                vote.census_proof.public_key,
                vote.census_proof.weight.to_bytes_le(),
                vote.census_proof.merkle_proof,
                vote.signature,
                vote.vote,
                Utc::now(),
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                let msg = msg.unwrap_or_default();
                if msg.contains("FOREIGN KEY") {
                    Err(NodeError::UnknownProcess(process_id))
                } else {
                    Err(NodeError::DuplicateVote)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns all stored vote packages for the process, ordered by leaf
    /// index ascending; this is the order the circuit inputs are built in.
    pub fn read_vote_packages_by_process_id(&self, process_id: u64) -> Result<Vec<VotePackage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT indx, publicKey, weight, merkleproof, signature, vote
             FROM votepackages WHERE processID = ?1 ORDER BY indx ASC",
        )?;
        let rows = stmt.query_map(params![process_id], |row| {
            let weight_bytes: Vec<u8> = row.get("weight")?;
            Ok(VotePackage {
                signature: row.get("signature")?,
                census_proof: CensusProof {
                    index: row.get("indx")?,
                    public_key: row.get("publicKey")?,
                    weight: BigUint::from_bytes_le(&weight_bytes),
                    merkle_proof: row.get("merkleproof")?,
                },
                vote: row.get("vote")?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
