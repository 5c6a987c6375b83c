pub mod meta;
pub mod processes;
pub mod proofs;
pub mod votepackages;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::app::errors::Result;

/// SQLite-backed store for processes, vote packages, proof records and the
/// sync checkpoint. Cloning shares the connection pool.
#[derive(Clone)]
pub struct ProcessStore {
    pool: Pool<SqliteConnectionManager>,
}

impl ProcessStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.busy_timeout(std::time::Duration::from_secs(5))?;
            c.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::new(manager)?;
        let store = ProcessStore { pool };
        store.migrate()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Creates the tables if they are not present yet.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS processes(
                id INTEGER NOT NULL PRIMARY KEY UNIQUE,
                status INTEGER NOT NULL,
                censusRoot BLOB NOT NULL,
                censusSize INTEGER NOT NULL,
                ethBlockNum INTEGER NOT NULL,
                resPubStartBlock INTEGER NOT NULL,
                resPubWindow INTEGER NOT NULL,
                minParticipation INTEGER NOT NULL,
                minPositiveVotes INTEGER NOT NULL,
                type INTEGER NOT NULL,
                insertedDatetime DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS votepackages(
                processID INTEGER NOT NULL,
                indx INTEGER NOT NULL,
                publicKey BLOB NOT NULL,
                weight BLOB NOT NULL,
                merkleproof BLOB NOT NULL,
                signature BLOB NOT NULL,
                vote BLOB NOT NULL,
                insertedDatetime DATETIME NOT NULL,
                PRIMARY KEY (processID, indx),
                UNIQUE (processID, publicKey),
                FOREIGN KEY(processID) REFERENCES processes(id)
            );

            CREATE TABLE IF NOT EXISTS proofs(
                proofID INTEGER NOT NULL PRIMARY KEY UNIQUE,
                proof BLOB NOT NULL,
                publicInputs BLOB NOT NULL,
                insertedDatetime DATETIME NOT NULL,
                proofAddedDatetime DATETIME,
                processID INTEGER NOT NULL,
                FOREIGN KEY(processID) REFERENCES processes(id)
            );

            CREATE TABLE IF NOT EXISTS meta(
                id INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
                chainID INTEGER NOT NULL,
                lastSyncBlockNum INTEGER NOT NULL,
                lastUpdate DATETIME NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}
