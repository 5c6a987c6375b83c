use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Node-wide error type. Variants are grouped by how the caller is expected
/// to react: bad input, missing entity, violated precondition, conflict,
/// failed cryptographic check, capacity limits, transient I/O and
/// unrecoverable corruption.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("censusID={0} does not exist")]
    UnknownCensus(u64),

    #[error("processID={0} does not exist in the db")]
    UnknownProcess(u64),

    #[error("publicKey does not exist in the census")]
    UnknownPublicKey,

    #[error("census closed, can not add more keys")]
    CensusClosed,

    #[error("census not closed yet")]
    CensusNotClosed,

    #[error("census already closed")]
    CensusAlreadyClosed,

    #[error("process {0} is not accepting votes (voting closed at block {1})")]
    ProcessNotOpen(u64, u64),

    #[error("process {0} can not generate the proof yet (results publishing starts at block {1})")]
    NotReadyToProve(u64, u64),

    #[error("vote already exists for this process")]
    DuplicateVote,

    #[error("signature verification failed")]
    BadSignature,

    #[error("merkleproof verification failed")]
    BadMerkleProof,

    #[error("proof does not exist for processID={0}")]
    ProofNotFound(u64),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("illegal process status transition: {0} -> {1}")]
    IllegalStatusTransition(u8, u8),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("sql pool error: {0}")]
    SqlPool(#[from] r2d2::Error),

    #[error("chain rpc error: {0}")]
    ChainRpc(String),

    #[error("prover error: {0}")]
    Prover(String),

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl From<rocksdb::Error> for NodeError {
    fn from(e: rocksdb::Error) -> Self {
        NodeError::Storage(e.to_string())
    }
}

impl From<hex::FromHexError> for NodeError {
    fn from(e: hex::FromHexError) -> Self {
        NodeError::InvalidInput(e.to_string())
    }
}

impl ResponseError for NodeError {
    // every error surfaces to the API caller as 400 {"message": ...}
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        log::warn!("HTTP API bad request: {}", self);
        HttpResponse::BadRequest().json(json!({ "message": self.to_string() }))
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
