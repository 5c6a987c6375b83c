//! Materializes contract event logs into the process store and drives the
//! freeze transition as the chain head advances.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::app::errors::{NodeError, Result};
use crate::app::repository::ProcessStore;
use crate::app::services::eth_client::{ChainClient, EventLog};

// payload sizes of the recognized contract events, in 32-byte words
const NEW_PROCESS_EVENT_LEN: usize = 320;
const RESULT_PUBLISHED_EVENT_LEN: usize = 160;
const PROCESS_CLOSED_EVENT_LEN: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProcessEvent {
    pub creator: [u8; 20],
    pub process_id: u64,
    pub tx_hash: [u8; 32],
    /// Big-endian on the wire, stored little-endian.
    pub census_root: [u8; 32],
    pub census_size: u64,
    pub res_pub_start_block: u64,
    pub res_pub_window: u64,
    pub min_participation: u8,
    pub min_positive_votes: u8,
    pub typ: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPublishedEvent {
    pub publisher: [u8; 20],
    pub process_id: u64,
    pub receipts_root: [u8; 32],
    pub result: u64,
    pub n_votes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessClosedEvent {
    pub caller: [u8; 20],
    pub process_id: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    NewProcess(NewProcessEvent),
    ResultPublished(ResultPublishedEvent),
    ProcessClosed(ProcessClosedEvent),
}

// Every field sits right-aligned in its own 32-byte word.
fn word(data: &[u8], i: usize) -> &[u8] {
    &data[i * 32..(i + 1) * 32]
}

fn word_u64(data: &[u8], i: usize) -> u64 {
    let w = word(data, i);
    let mut b = [0u8; 8];
    b.copy_from_slice(&w[24..32]);
    u64::from_be_bytes(b)
}

fn word_u8(data: &[u8], i: usize) -> u8 {
    word(data, i)[31]
}

fn word_bytes32(data: &[u8], i: usize) -> [u8; 32] {
    let mut b = [0u8; 32];
    b.copy_from_slice(word(data, i));
    b
}

fn word_address(data: &[u8], i: usize) -> [u8; 20] {
    let mut b = [0u8; 20];
    b.copy_from_slice(&word(data, i)[12..32]);
    b
}

impl TryFrom<&[u8]> for ContractEvent {
    type Error = NodeError;

    fn try_from(data: &[u8]) -> Result<ContractEvent> {
        match data.len() {
            NEW_PROCESS_EVENT_LEN => {
                let mut census_root = word_bytes32(data, 3);
                census_root.reverse();
                Ok(ContractEvent::NewProcess(NewProcessEvent {
                    creator: word_address(data, 0),
                    process_id: word_u64(data, 1),
                    tx_hash: word_bytes32(data, 2),
                    census_root,
                    census_size: word_u64(data, 4),
                    res_pub_start_block: word_u64(data, 5),
                    res_pub_window: word_u64(data, 6),
                    min_participation: word_u8(data, 7),
                    min_positive_votes: word_u8(data, 8),
                    typ: word_u8(data, 9),
                }))
            }
            RESULT_PUBLISHED_EVENT_LEN => {
                let mut receipts_root = word_bytes32(data, 2);
                receipts_root.reverse();
                Ok(ContractEvent::ResultPublished(ResultPublishedEvent {
                    publisher: word_address(data, 0),
                    process_id: word_u64(data, 1),
                    receipts_root,
                    result: word_u64(data, 3),
                    n_votes: word_u64(data, 4),
                }))
            }
            PROCESS_CLOSED_EVENT_LEN => Ok(ContractEvent::ProcessClosed(ProcessClosedEvent {
                caller: word_address(data, 0),
                process_id: word_u64(data, 1),
                success: word_u8(data, 2) != 0,
            })),
            other => Err(NodeError::InvalidInput(format!(
                "unrecognized event log length: {}",
                other
            ))),
        }
    }
}

pub struct Synchronizer {
    client: Arc<dyn ChainClient>,
    db: ProcessStore,
    poll_interval: Duration,
}

impl Synchronizer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        db: ProcessStore,
        poll_interval: Duration,
    ) -> Synchronizer {
        Synchronizer {
            client,
            db,
            poll_interval,
        }
    }

    /// One sync step: fetch the logs between the checkpoint and the head,
    /// apply them block by block, then freeze every process whose
    /// results-publishing phase has been reached. The checkpoint is only
    /// advanced past a block once all its events are applied, so a crash
    /// replays the incomplete block; storage writes are idempotent on the
    /// process id.
    pub async fn sync_once(&self) -> Result<u64> {
        let head = self.client.block_number().await?;
        let last = self.db.last_sync_block()?;

        if head > last {
            let logs = self.client.logs(last + 1, head).await?;

            let mut blocks: BTreeMap<u64, Vec<&EventLog>> = BTreeMap::new();
            for log in &logs {
                blocks.entry(log.block_number).or_default().push(log);
            }
            for (block_number, block_logs) in blocks {
                for log in block_logs {
                    self.apply_log(log)?;
                }
                self.db.update_last_sync_block(block_number)?;
            }
            self.db.update_last_sync_block(head)?;
        }

        let frozen = self.db.freeze_processes(head)?;
        if frozen > 0 {
            log::info!("{} processes frozen at block {}", frozen, head);
        }
        Ok(head)
    }

    /// Applies one event log. A malformed payload is logged and skipped;
    /// storage failures propagate so the block is retried.
    fn apply_log(&self, log: &EventLog) -> Result<()> {
        let event = match ContractEvent::try_from(log.data.as_slice()) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("skipping event log at block {}: {}", log.block_number, e);
                return Ok(());
            }
        };
        match event {
            ContractEvent::NewProcess(e) => {
                self.db.store_process(
                    e.process_id,
                    &e.census_root,
                    e.census_size,
                    log.block_number,
                    e.res_pub_start_block,
                    e.res_pub_window,
                    e.min_participation,
                    e.min_positive_votes,
                    e.typ,
                )?;
                log::info!(
                    "new process {} stored (resPubStartBlock={})",
                    e.process_id,
                    e.res_pub_start_block
                );
            }
            ContractEvent::ResultPublished(e) => {
                log::info!(
                    "result published for process {}: result={} nVotes={}",
                    e.process_id,
                    e.result,
                    e.n_votes
                );
            }
            ContractEvent::ProcessClosed(e) => {
                log::info!(
                    "process {} closed, success={}",
                    e.process_id,
                    e.success
                );
            }
        }
        Ok(())
    }

    /// Catch-up once, then poll for new heads and logs until the task is
    /// dropped. Errors are logged and retried on the next tick.
    pub async fn start(self: Arc<Self>) {
        log::info!("synchronizer started");
        loop {
            match self.sync_once().await {
                Ok(head) => log::debug!("synced up to block {}", head),
                Err(e) => log::warn!("sync error, will retry: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
