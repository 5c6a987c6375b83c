#![allow(dead_code)]

use num_bigint::BigUint;
use rand::RngCore;

use ovote_node::app::entities::vote_entity::{CensusProof, VotePackage};
use ovote_node::app::services::census::Census;
use ovote_node::app::services::votes_aggregator::hash_vote;
use ovote_node::app::utils::babyjubjub::{Point, PrivateKey};

pub fn random_keys(n: usize) -> Vec<PrivateKey> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| {
            let mut seed = [0u8; 32];
            rng.fill_bytes(&mut seed);
            PrivateKey::from_seed(&seed)
        })
        .collect()
}

pub fn members_with_weight(keys: &[PrivateKey], weight: u64) -> Vec<(Point, BigUint)> {
    keys.iter()
        .map(|k| (k.public(), BigUint::from(weight)))
        .collect()
}

/// Builds a full vote package for a member of a closed census: signed
/// ballot plus the census inclusion proof.
pub fn build_vote(
    census: &Census,
    sk: &PrivateKey,
    chain_id: u64,
    process_id: u64,
    value: u8,
    weight: u64,
) -> VotePackage {
    let pk = sk.public();
    let vote_bytes = vec![value];
    let signature = sk.sign(hash_vote(chain_id, process_id, &vote_bytes));
    let (index, merkle_proof) = census.get_proof(&pk).unwrap();
    VotePackage {
        signature: signature.compress().to_vec(),
        census_proof: CensusProof {
            index,
            public_key: pk.compress().to_vec(),
            weight: BigUint::from(weight),
            merkle_proof,
        },
        vote: vote_bytes,
    }
}

fn put_word_u64(data: &mut [u8], word: usize, v: u64) {
    data[word * 32 + 24..word * 32 + 32].copy_from_slice(&v.to_be_bytes());
}

fn put_word_u8(data: &mut [u8], word: usize, v: u8) {
    data[word * 32 + 31] = v;
}

/// Serializes a NewProcess contract event payload the way the chain emits
/// it: ten 32-byte words, integers right-aligned big-endian, the census
/// root as a big-endian word.
#[allow(clippy::too_many_arguments)]
pub fn new_process_event_data(
    process_id: u64,
    census_root_le: &[u8; 32],
    census_size: u64,
    res_pub_start_block: u64,
    res_pub_window: u64,
    min_participation: u8,
    min_positive_votes: u8,
    typ: u8,
) -> Vec<u8> {
    let mut data = vec![0u8; 320];
    // word 0: creator address, arbitrary for tests
    data[12..32].copy_from_slice(&[0xaa; 20]);
    put_word_u64(&mut data, 1, process_id);
    // word 2: tx hash, left zeroed
    let mut root_be = *census_root_le;
    root_be.reverse();
    data[3 * 32..4 * 32].copy_from_slice(&root_be);
    put_word_u64(&mut data, 4, census_size);
    put_word_u64(&mut data, 5, res_pub_start_block);
    put_word_u64(&mut data, 6, res_pub_window);
    put_word_u8(&mut data, 7, min_participation);
    put_word_u8(&mut data, 8, min_positive_votes);
    put_word_u8(&mut data, 9, typ);
    data
}
