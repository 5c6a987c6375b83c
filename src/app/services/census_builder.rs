//! Multi-census registry: allocates census identifiers, keeps one KV
//! sub-store per census on disk and lazily loads censuses on first use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};

use crate::app::dtos::census_dto::CensusInfo;
use crate::app::errors::{NodeError, Result};
use crate::app::services::census::Census;
use crate::app::storage::{KvStore, RocksKv};
use crate::app::utils::babyjubjub::Point;

const KEY_NEXT_CENSUS_ID: &[u8] = b"nextCensusID";

pub struct CensusBuilder {
    base_dir: PathBuf,
    registry: Arc<dyn KvStore>,
    // loaded censuses; mutations on one census serialize on its mutex
    censuses: RwLock<HashMap<u64, Arc<Mutex<Census>>>>,
}

impl CensusBuilder {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<CensusBuilder> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(base_dir.join("census"))
            .map_err(|e| NodeError::Storage(e.to_string()))?;

        let registry: Arc<dyn KvStore> = Arc::new(RocksKv::open(base_dir.join("registry"))?);
        if registry.get(KEY_NEXT_CENSUS_ID)?.is_none() {
            registry.put(KEY_NEXT_CENSUS_ID.to_vec(), 0u64.to_le_bytes().to_vec())?;
        }

        Ok(CensusBuilder {
            base_dir,
            registry,
            censuses: RwLock::new(HashMap::new()),
        })
    }

    fn census_path(&self, census_id: u64) -> PathBuf {
        self.base_dir.join("census").join(census_id.to_string())
    }

    fn next_census_id(&self) -> Result<u64> {
        let b = self.registry.get_required(KEY_NEXT_CENSUS_ID)?;
        let arr: [u8; 8] = b
            .try_into()
            .map_err(|_| NodeError::Corruption("malformed nextCensusID".to_string()))?;
        Ok(u64::from_le_bytes(arr))
    }

    /// Creates a new empty census and returns its id.
    pub fn new_census(&self) -> Result<u64> {
        // the registry write lock makes id allocation + creation atomic
        // with respect to concurrent creations and loads
        let mut censuses = self.censuses.write();

        let census_id = self.next_census_id()?;
        let path = self.census_path(census_id);
        if path.exists() {
            return Err(NodeError::Storage(format!(
                "census sub-store already exists at {}",
                path.display()
            )));
        }

        let kv: Arc<dyn KvStore> = Arc::new(RocksKv::open(&path)?);
        let census = Census::new(kv)?;
        censuses.insert(census_id, Arc::new(Mutex::new(census)));

        self.registry.put(
            KEY_NEXT_CENSUS_ID.to_vec(),
            (census_id + 1).to_le_bytes().to_vec(),
        )?;

        log::debug!("[censusID={}] new census created", census_id);
        Ok(census_id)
    }

    /// Returns the census, loading it from disk on first use. A single
    /// loader wins the write lock and publishes the entry; the others find
    /// it on the re-check.
    fn load_if_absent(&self, census_id: u64) -> Result<Arc<Mutex<Census>>> {
        if let Some(c) = self.censuses.read().get(&census_id) {
            return Ok(c.clone());
        }

        let mut censuses = self.censuses.write();
        if let Some(c) = censuses.get(&census_id) {
            return Ok(c.clone());
        }

        let path = self.census_path(census_id);
        if !path.exists() {
            return Err(NodeError::UnknownCensus(census_id));
        }
        let kv: Arc<dyn KvStore> = Arc::new(RocksKv::open(&path)?);
        let census = Arc::new(Mutex::new(Census::new(kv)?));
        censuses.insert(census_id, census.clone());
        Ok(census)
    }

    pub fn add_public_keys(&self, census_id: u64, keys: &[(Point, BigUint)]) -> Result<()> {
        let census = self.load_if_absent(census_id)?;
        let census = census.lock();
        census.add_public_keys(keys)?;
        log::debug!("[censusID={}] {} publicKeys added", census_id, keys.len());
        Ok(())
    }

    /// Batch add meant to run on a background task: a terminal error is
    /// written to the census err-memo for the caller to poll, never
    /// propagated.
    pub fn add_public_keys_and_store_error(&self, census_id: u64, keys: &[(Point, BigUint)]) {
        if let Err(e) = self.add_public_keys(census_id, keys) {
            log::debug!("[censusID={}] error adding keys: {}", census_id, e);
            if let Err(e2) = self.set_err_msg(census_id, &e.to_string()) {
                log::error!(
                    "could not store error for censusID={}: {} (original error: {})",
                    census_id,
                    e2,
                    e
                );
            }
        }
    }

    pub fn set_err_msg(&self, census_id: u64, msg: &str) -> Result<()> {
        let census = self.load_if_absent(census_id)?;
        let census = census.lock();
        census.set_err_msg(msg)
    }

    pub fn close_census(&self, census_id: u64) -> Result<()> {
        let census = self.load_if_absent(census_id)?;
        let census = census.lock();
        census.close()
    }

    pub fn census_root(&self, census_id: u64) -> Result<[u8; 32]> {
        let census = self.load_if_absent(census_id)?;
        let census = census.lock();
        census.root()
    }

    pub fn census_info(&self, census_id: u64) -> Result<CensusInfo> {
        let census = self.load_if_absent(census_id)?;
        let census = census.lock();
        census.info()
    }

    pub fn get_proof(&self, census_id: u64, pk: &Point) -> Result<(u64, Vec<u8>)> {
        let census = self.load_if_absent(census_id)?;
        let census = census.lock();
        census.get_proof(pk)
    }
}
