pub mod babyjubjub;
pub mod encoding;
pub mod poseidon;
