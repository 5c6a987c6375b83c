use halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use halo2_base::halo2_proofs::halo2curves::ff::PrimeField;
use halo2_base::utils::{biguint_to_fe, fe_to_biguint, ScalarField};
use num_bigint::BigUint;
use pse_poseidon::Poseidon;

/// Output length of the hash in bytes; also the node size of the Merkle
/// trees.
pub const HASH_LEN: usize = 32;

/// Poseidon over the BN254 scalar field, the only hash used in the node.
pub fn hash(inputs: &[Fr]) -> Fr {
    let mut hasher = Poseidon::<Fr, 3, 2>::new(8, 57);
    hasher.update(inputs);
    hasher.squeeze_and_reset()
}

pub fn hash_to_bytes(inputs: &[Fr]) -> [u8; 32] {
    fr_to_le_bytes(&hash(inputs))
}

/// Interprets little-endian bytes as a field element (reduced mod r).
pub fn fr_from_le_bytes(b: &[u8]) -> Fr {
    Fr::from_bytes_le(b)
}

pub fn fr_to_le_bytes(f: &Fr) -> [u8; 32] {
    let v = f.to_bytes_le();
    let mut out = [0u8; 32];
    out[..v.len()].copy_from_slice(&v);
    out
}

pub fn fr_to_biguint(f: &Fr) -> BigUint {
    fe_to_biguint(f)
}

pub fn biguint_to_fr(b: &BigUint) -> Fr {
    biguint_to_fe(b)
}

/// The BN254 scalar field modulus r.
pub fn fr_modulus() -> BigUint {
    let hex_str = Fr::MODULUS.trim_start_matches("0x");
    BigUint::parse_bytes(hex_str.as_bytes(), 16)
        .unwrap_or_else(|| panic!("unparseable field modulus {}", Fr::MODULUS))
}
