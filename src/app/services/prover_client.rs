//! HTTP client for the external prover server.

use std::time::Duration;

use serde::Deserialize;

use crate::app::dtos::zk_inputs_dto::ZkInputs;
use crate::app::errors::{NodeError, Result};

#[derive(Clone)]
pub struct ProverClient {
    url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct GenProofRes {
    id: u64,
}

#[derive(Deserialize)]
struct ErrorMsg {
    message: String,
}

impl ProverClient {
    pub fn new(url: &str, timeout: Duration) -> Result<ProverClient> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Prover(e.to_string()))?;
        Ok(ProverClient {
            url: url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn error_from_response(resp: reqwest::Response) -> NodeError {
        let status = resp.status();
        match resp.json::<ErrorMsg>().await {
            Ok(err) => NodeError::Prover(err.message),
            Err(_) => NodeError::Prover(format!("prover returned status {}", status)),
        }
    }

    /// Sends the circuit inputs to the prover, which answers with the id to
    /// retrieve the proof with later.
    pub async fn gen_proof(&self, zki: &ZkInputs) -> Result<u64> {
        let resp = self
            .http
            .post(format!("{}/proof", self.url))
            .json(zki)
            .send()
            .await
            .map_err(|e| NodeError::Prover(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let res: GenProofRes = resp
            .json()
            .await
            .map_err(|e| NodeError::Prover(e.to_string()))?;
        Ok(res.id)
    }

    /// Raw proof bytes for a previously requested proof id.
    pub async fn get_proof(&self, proof_id: u64) -> Result<Vec<u8>> {
        self.get_bytes(format!("{}/proof/{}", self.url, proof_id))
            .await
    }

    /// Raw public-inputs bytes for a previously requested proof id.
    pub async fn get_public_inputs(&self, proof_id: u64) -> Result<Vec<u8>> {
        self.get_bytes(format!("{}/proof/{}/public", self.url, proof_id))
            .await
    }

    async fn get_bytes(&self, url: String) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| NodeError::Prover(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| NodeError::Prover(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
