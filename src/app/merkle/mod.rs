pub mod proof;
pub mod tree;

pub use proof::{check_proof, pack_siblings, unpack_siblings};
pub use tree::{Invalid, MerkleTree, EMPTY_HASH};
