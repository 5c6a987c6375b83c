//! Vote admission, aggregation into circuit inputs and proof
//! orchestration against the external prover.

use std::sync::Arc;
use std::time::Duration;

use halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use num_bigint::BigUint;
use num_traits::One;

use crate::app::dtos::zk_inputs_dto::{merkle_proof_to_circuit, ZkInputs};
use crate::app::entities::process_entity::{Process, ProcessStatus};
use crate::app::entities::proof_entity::ProofRecord;
use crate::app::entities::vote_entity::VotePackage;
use crate::app::errors::{NodeError, Result};
use crate::app::merkle::{check_proof, MerkleTree};
use crate::app::repository::ProcessStore;
use crate::app::services::census;
use crate::app::services::prover_client::ProverClient;
use crate::app::storage::{KvStore, MemKv, WriteTx};
use crate::app::utils::babyjubjub::{self, Point, Signature};
use crate::app::utils::poseidon;

pub struct VotesAggregator {
    db: ProcessStore,
    prover: ProverClient,
    chain_id: u64,
    n_max_votes: usize,
    n_levels: usize,
}

fn decompress_vote_keys(vote: &VotePackage) -> Result<(Point, Signature)> {
    let pk_bytes: [u8; 32] = vote
        .census_proof
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| {
            NodeError::InvalidInput(format!(
                "unexpected publicKey length: {}",
                vote.census_proof.public_key.len()
            ))
        })?;
    let pk = Point::decompress(&pk_bytes)?;

    let sig_bytes: [u8; 64] = vote.signature.as_slice().try_into().map_err(|_| {
        NodeError::InvalidInput(format!(
            "unexpected signature length: {}",
            vote.signature.len()
        ))
    })?;
    let sig = Signature::decompress(&sig_bytes)?;
    Ok((pk, sig))
}

/// The message a voter signs: Poseidon over the chain id, the process id
/// and the vote value, binding the ballot to this process on this chain.
pub fn hash_vote(chain_id: u64, process_id: u64, vote: &[u8]) -> Fr {
    poseidon::hash(&[
        Fr::from(chain_id),
        Fr::from(process_id),
        poseidon::fr_from_le_bytes(vote),
    ])
}

impl VotesAggregator {
    pub fn new(
        db: ProcessStore,
        prover: ProverClient,
        chain_id: u64,
        n_max_votes: usize,
        n_levels: usize,
    ) -> VotesAggregator {
        VotesAggregator {
            db,
            prover,
            chain_id,
            n_max_votes,
            n_levels,
        }
    }

    pub fn process_info(&self, process_id: u64) -> Result<Process> {
        self.db.read_process_by_id(process_id)
    }

    /// Admits one vote: the process must still be in the voting phase, the
    /// vote value binary, the signature valid for this chain and process,
    /// and the Merkle proof valid against the process census root. Double
    /// votes surface as [`NodeError::DuplicateVote`] from the store.
    pub fn add_vote(&self, process_id: u64, vote: &VotePackage) -> Result<()> {
        let process = self.db.read_process_by_id(process_id)?;
        if process.status != ProcessStatus::On {
            return Err(NodeError::ProcessNotOpen(
                process_id,
                process.res_pub_start_block,
            ));
        }

        let vote_fe = poseidon::fr_from_le_bytes(&vote.vote);
        if poseidon::fr_to_biguint(&vote_fe) > BigUint::one() {
            return Err(NodeError::InvalidInput(
                "vote value out of range, only binary votes accepted".to_string(),
            ));
        }

        let (pk, sig) = decompress_vote_keys(vote)?;
        let msg = hash_vote(self.chain_id, process_id, &vote.vote);
        if !babyjubjub::verify(&pk, &sig, msg) {
            return Err(NodeError::BadSignature);
        }

        let root: [u8; 32] = process
            .census_root
            .as_slice()
            .try_into()
            .map_err(|_| NodeError::Corruption("malformed stored censusRoot".to_string()))?;
        let leaf = census::leaf_value(&pk, &vote.census_proof.weight);
        let key = census::index_to_key(vote.census_proof.index);
        if !check_proof(&root, &vote.census_proof.merkle_proof, &key, &leaf)? {
            return Err(NodeError::BadMerkleProof);
        }

        self.db.store_vote_package(process_id, vote)?;
        log::debug!(
            "[processID={}] vote admitted, index={}",
            process_id,
            vote.census_proof.index
        );
        Ok(())
    }

    /// Aggregates every admitted vote, ordered by census index, into the
    /// circuit input bundle for the given circuit shape. Deterministic for
    /// a fixed vote set.
    pub fn generate_zk_inputs(
        &self,
        process_id: u64,
        n_max_votes: usize,
        n_levels: usize,
    ) -> Result<ZkInputs> {
        let process = self.db.read_process_by_id(process_id)?;
        let votes = self.db.read_vote_packages_by_process_id(process_id)?;
        if votes.len() > n_max_votes {
            return Err(NodeError::CapacityExceeded(format!(
                "{} votes do not fit in a circuit of {} max votes",
                votes.len(),
                n_max_votes
            )));
        }

        let mut z = ZkInputs::new(n_max_votes, n_levels);
        z.chain_id = BigUint::from(self.chain_id);
        z.process_id = BigUint::from(process_id);
        z.census_root = BigUint::from_bytes_le(&process.census_root);
        z.n_votes = BigUint::from(votes.len());
        z.with_receipts = BigUint::one();

        // the receipts tree lives in a scratch store, discarded afterwards
        let receipts_kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
        let receipts_tree = MerkleTree::new(receipts_kv.clone(), n_levels);
        let receipts_key_len = (n_levels + 7) / 8;

        let mut result = Fr::from(0u64);
        let mut receipt_keys: Vec<Vec<u8>> = Vec::with_capacity(votes.len());
        {
            let mut tx = WriteTx::new(receipts_kv.as_ref());
            for (i, vote) in votes.iter().enumerate() {
                let vote_fe = poseidon::fr_from_le_bytes(&vote.vote);
                if poseidon::fr_to_biguint(&vote_fe) > BigUint::one() {
                    return Err(NodeError::InvalidInput(format!(
                        "invalid vote value at index {}",
                        vote.census_proof.index
                    )));
                }
                let (pk, sig) = decompress_vote_keys(vote)?;
                let weight_fe = poseidon::biguint_to_fr(&vote.census_proof.weight);
                result += vote_fe * weight_fe;

                z.vote[i] = poseidon::fr_to_biguint(&vote_fe);
                z.index[i] = BigUint::from(vote.census_proof.index);
                z.pk_x[i] = poseidon::fr_to_biguint(&pk.x);
                z.pk_y[i] = poseidon::fr_to_biguint(&pk.y);
                z.s[i] = sig.s.clone();
                z.r8x[i] = poseidon::fr_to_biguint(&sig.r_b8.x);
                z.r8y[i] = poseidon::fr_to_biguint(&sig.r_b8.y);
                z.siblings[i] =
                    merkle_proof_to_circuit(&vote.census_proof.merkle_proof, n_levels)?;

                if n_levels < 64 && vote.census_proof.index >= 1u64 << n_levels {
                    return Err(NodeError::CapacityExceeded(format!(
                        "vote index {} does not fit in a receipts tree of {} levels",
                        vote.census_proof.index, n_levels
                    )));
                }
                let rkey = vote.census_proof.index.to_le_bytes()[..receipts_key_len].to_vec();
                receipts_tree.add_with_tx(
                    &mut tx,
                    &rkey,
                    &census::leaf_value(&pk, &vote.census_proof.weight),
                )?;
                receipt_keys.push(rkey);
            }
            tx.commit()?;
        }

        z.result = poseidon::fr_to_biguint(&result);
        z.receipts_root = BigUint::from_bytes_le(&receipts_tree.root()?);
        for (i, rkey) in receipt_keys.iter().enumerate() {
            let (_, packed) = receipts_tree.gen_proof(rkey)?;
            z.receipts_siblings[i] = merkle_proof_to_circuit(&packed, n_levels)?;
        }
        Ok(z)
    }

    /// Kicks off proof generation for a frozen process. Idempotent: an
    /// existing proof record, complete or still in flight, short-circuits
    /// so the single-threaded prover never sees overlapping dispatches for
    /// one process.
    pub async fn generate_proof(&self, process_id: u64) -> Result<()> {
        let process = self.db.read_process_by_id(process_id)?;
        let last_sync = self.db.last_sync_block()?;
        if last_sync < process.res_pub_start_block {
            return Err(NodeError::NotReadyToProve(
                process_id,
                process.res_pub_start_block,
            ));
        }

        match self.db.get_proof_by_process_id(process_id) {
            Ok(_) => return Ok(()),
            Err(NodeError::ProofNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let zki = self.generate_zk_inputs(process_id, self.n_max_votes, self.n_levels)?;
        let proof_id = self.prover.gen_proof(&zki).await?;
        self.db.store_proof_id(process_id, proof_id)?;

        // the freeze sweep may not have caught this process yet
        if self.db.get_process_status(process_id)? == ProcessStatus::On {
            self.db
                .update_process_status(process_id, ProcessStatus::Frozen)?;
        }
        self.db
            .update_process_status(process_id, ProcessStatus::ProofGenerating)?;
        log::info!(
            "[processID={}] proof generation started, proofID={}",
            process_id,
            proof_id
        );
        Ok(())
    }

    /// Returns the proof for a process, polling the prover the first time
    /// and serving from local storage afterwards.
    pub async fn get_proof(&self, process_id: u64) -> Result<ProofRecord> {
        let record = self.db.get_proof_by_process_id(process_id)?;
        if record.is_complete() {
            return Ok(record);
        }

        let proof = self.prover.get_proof(record.proof_id).await?;
        let public_inputs = self.prover.get_public_inputs(record.proof_id).await?;
        if proof.is_empty() || public_inputs.is_empty() {
            return Err(NodeError::Prover("proof not generated yet".to_string()));
        }

        self.db
            .add_proof_to_proof_id(process_id, record.proof_id, &proof, &public_inputs)?;
        if self.db.get_process_status(process_id)? == ProcessStatus::ProofGenerating {
            self.db
                .update_process_status(process_id, ProcessStatus::ProofGenerated)?;
        }
        self.db.get_proof_by_process_id(process_id)
    }

    /// Background sweep: periodically looks for frozen processes and kicks
    /// off their proof generation. A single sweeper runs per node.
    pub async fn sync_processes_loop(self: Arc<Self>, interval: Duration) {
        log::info!("votes aggregator process sweeper started");
        loop {
            match self.db.read_processes_by_status(ProcessStatus::Frozen) {
                Ok(processes) => {
                    for p in processes {
                        if let Err(e) = self.generate_proof(p.id).await {
                            log::warn!("[processID={}] proof generation failed: {}", p.id, e);
                        }
                    }
                }
                Err(e) => log::warn!("process sweep failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::repository::test_helpers::test_store;
    use crate::app::services::census::Census;
    use crate::app::utils::babyjubjub::PrivateKey;
    use rand::RngCore;

    const CHAIN_ID: u64 = 3;
    const PROCESS_ID: u64 = 123;
    const RES_PUB_START_BLOCK: u64 = 1000;

    struct Fixture {
        aggregator: VotesAggregator,
        store: ProcessStore,
        keys: Vec<PrivateKey>,
        census: Census,
        _dir: tempfile::TempDir,
    }

    fn setup(n_keys: usize) -> Fixture {
        let (store, dir) = test_store();
        store.init_meta(CHAIN_ID, 0).unwrap();

        let census = Census::new(Arc::new(MemKv::new())).unwrap();
        let mut rng = rand::thread_rng();
        let keys: Vec<PrivateKey> = (0..n_keys)
            .map(|_| {
                let mut seed = [0u8; 32];
                rng.fill_bytes(&mut seed);
                PrivateKey::from_seed(&seed)
            })
            .collect();
        let members: Vec<(Point, BigUint)> = keys
            .iter()
            .map(|k| (k.public(), BigUint::one()))
            .collect();
        census.add_public_keys(&members).unwrap();
        census.close().unwrap();

        let root = census.root().unwrap();
        store
            .store_process(
                PROCESS_ID,
                &root,
                n_keys as u64,
                1,
                RES_PUB_START_BLOCK,
                10,
                10,
                60,
                1,
            )
            .unwrap();

        let prover = ProverClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let aggregator = VotesAggregator::new(store.clone(), prover, CHAIN_ID, 32, 5);
        Fixture {
            aggregator,
            store,
            keys,
            census,
            _dir: dir,
        }
    }

    fn make_vote(fixture: &Fixture, key_idx: usize, value: u8) -> VotePackage {
        make_vote_for_process(fixture, key_idx, value, PROCESS_ID)
    }

    fn make_vote_for_process(
        fixture: &Fixture,
        key_idx: usize,
        value: u8,
        process_id: u64,
    ) -> VotePackage {
        let sk = &fixture.keys[key_idx];
        let pk = sk.public();
        let vote_bytes = vec![value];
        let sig = sk.sign(hash_vote(CHAIN_ID, process_id, &vote_bytes));
        let (index, merkle_proof) = fixture.census.get_proof(&pk).unwrap();
        VotePackage {
            signature: sig.compress().to_vec(),
            census_proof: crate::app::entities::vote_entity::CensusProof {
                index,
                public_key: pk.compress().to_vec(),
                weight: BigUint::one(),
                merkle_proof,
            },
            vote: vote_bytes,
        }
    }

    #[test]
    fn test_add_vote_and_aggregate() {
        let f = setup(20);

        // 12 positive and 7 negative votes
        for i in 0..19 {
            let value = if i < 12 { 1 } else { 0 };
            f.aggregator.add_vote(PROCESS_ID, &make_vote(&f, i, value)).unwrap();
        }

        let z = f
            .aggregator
            .generate_zk_inputs(PROCESS_ID, 32, 5)
            .unwrap();
        assert_eq!(z.n_votes, BigUint::from(19u8));
        assert_eq!(z.result, BigUint::from(12u8));
        assert_eq!(z.chain_id, BigUint::from(CHAIN_ID));
        assert_eq!(z.process_id, BigUint::from(PROCESS_ID));
        assert_eq!(z.with_receipts, BigUint::one());
        assert_ne!(z.receipts_root, BigUint::default());

        // 19 filled slots followed by zero padding
        let non_zero_pk: usize = z.pk_x.iter().filter(|x| **x != BigUint::default()).count();
        assert_eq!(non_zero_pk, 19);
        assert_eq!(z.vote.len(), 32);
        for i in 19..32 {
            assert_eq!(z.vote[i], BigUint::default());
            assert_eq!(z.pk_x[i], BigUint::default());
        }
        // votes are ordered by census index
        for i in 0..19 {
            assert_eq!(z.index[i], BigUint::from(i));
        }
    }

    #[test]
    fn test_aggregation_deterministic() {
        let f = setup(6);
        for i in 0..6 {
            f.aggregator.add_vote(PROCESS_ID, &make_vote(&f, i, 1)).unwrap();
        }
        let a = serde_json::to_vec(&f.aggregator.generate_zk_inputs(PROCESS_ID, 8, 4).unwrap())
            .unwrap();
        let b = serde_json::to_vec(&f.aggregator.generate_zk_inputs(PROCESS_ID, 8, 4).unwrap())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_vote_for_frozen_process_rejected() {
        let f = setup(3);
        f.aggregator.add_vote(PROCESS_ID, &make_vote(&f, 0, 1)).unwrap();

        f.store.freeze_processes(RES_PUB_START_BLOCK).unwrap();
        assert!(matches!(
            f.aggregator.add_vote(PROCESS_ID, &make_vote(&f, 1, 1)),
            Err(NodeError::ProcessNotOpen(PROCESS_ID, RES_PUB_START_BLOCK))
        ));
    }

    #[test]
    fn test_vote_wrong_process_binding_rejected() {
        let f = setup(3);
        // signed for another process id: the signature does not bind
        let vote = make_vote_for_process(&f, 0, 1, 999);
        assert!(matches!(
            f.aggregator.add_vote(PROCESS_ID, &vote),
            Err(NodeError::BadSignature)
        ));
    }

    #[test]
    fn test_vote_bad_merkle_proof_rejected() {
        let f = setup(3);
        let mut vote = make_vote(&f, 0, 1);
        // claim a different index than the census assigned
        vote.census_proof.index = 2;
        assert!(matches!(
            f.aggregator.add_vote(PROCESS_ID, &vote),
            Err(NodeError::BadMerkleProof)
        ));
    }

    #[test]
    fn test_vote_out_of_range_value_rejected() {
        let f = setup(3);
        let mut vote = make_vote(&f, 0, 1);
        vote.vote = vec![2];
        assert!(matches!(
            f.aggregator.add_vote(PROCESS_ID, &vote),
            Err(NodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_double_vote_rejected() {
        let f = setup(3);
        f.aggregator.add_vote(PROCESS_ID, &make_vote(&f, 0, 1)).unwrap();
        assert!(matches!(
            f.aggregator.add_vote(PROCESS_ID, &make_vote(&f, 0, 0)),
            Err(NodeError::DuplicateVote)
        ));
    }

    #[test]
    fn test_vote_unknown_process_rejected() {
        let f = setup(3);
        let vote = make_vote(&f, 0, 1);
        assert!(matches!(
            f.aggregator.add_vote(777, &vote),
            Err(NodeError::UnknownProcess(777))
        ));
    }

    #[actix_web::test]
    async fn test_generate_proof_not_ready() {
        let f = setup(3);
        // last synced block is far before resPubStartBlock
        assert!(matches!(
            f.aggregator.generate_proof(PROCESS_ID).await,
            Err(NodeError::NotReadyToProve(PROCESS_ID, RES_PUB_START_BLOCK))
        ));
    }

    #[actix_web::test]
    async fn test_generate_proof_idempotent_with_record() {
        let f = setup(3);
        f.store.update_last_sync_block(RES_PUB_START_BLOCK).unwrap();
        f.store.freeze_processes(RES_PUB_START_BLOCK).unwrap();

        // an in-flight record suppresses re-dispatch, even with the prover
        // unreachable
        f.store.store_proof_id(PROCESS_ID, 42).unwrap();
        f.aggregator.generate_proof(PROCESS_ID).await.unwrap();

        // no proof bytes yet: get_proof polls the unreachable prover
        assert!(matches!(
            f.aggregator.get_proof(PROCESS_ID).await,
            Err(NodeError::Prover(_))
        ));
    }

    #[actix_web::test]
    async fn test_get_proof_not_found() {
        let f = setup(3);
        assert!(matches!(
            f.aggregator.get_proof(PROCESS_ID).await,
            Err(NodeError::ProofNotFound(PROCESS_ID))
        ));
    }
}
