//! BabyJubJub twisted Edwards curve over the BN254 scalar field, with the
//! EdDSA-Poseidon signature scheme used for vote packages. Point and
//! signature compression follow the usual 32/64-byte little-endian forms.

use halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use halo2_base::halo2_proofs::halo2curves::ff::Field;
use num_bigint::BigUint;
use num_traits::Zero;

use crate::app::errors::{NodeError, Result};
use crate::app::utils::poseidon;

/// Compressed public key size in bytes.
pub const POINT_COMPRESSED_SIZE: usize = 32;
/// Compressed signature size in bytes.
pub const SIGNATURE_COMPRESSED_SIZE: usize = 64;

// ax^2 + y^2 = 1 + dx^2y^2
const PARAM_A: u64 = 168700;
const PARAM_D: u64 = 168696;

// generator of the prime-order subgroup (order SUBORDER, cofactor 8)
const BASE8_X: &str = "5299619240641551281634865583518297030282874472190772894086521144482721001553";
const BASE8_Y: &str =
    "16950150798460657717958625567821834550301663161624707787222815936182638968203";
const SUBORDER: &str =
    "2736030358979909402780800718157159386076813972158567259200215660948447373041";

fn parse_dec(s: &str) -> BigUint {
    BigUint::parse_bytes(s.as_bytes(), 10).unwrap_or_else(|| panic!("bad decimal constant"))
}

pub fn suborder() -> BigUint {
    parse_dec(SUBORDER)
}

fn coord_sign(x: &Fr) -> bool {
    poseidon::fr_to_biguint(x) > (poseidon::fr_modulus() >> 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub x: Fr,
    pub y: Fr,
}

impl Point {
    pub fn identity() -> Point {
        Point {
            x: Fr::from(0u64),
            y: Fr::from(1u64),
        }
    }

    pub fn base8() -> Point {
        Point {
            x: poseidon::biguint_to_fr(&parse_dec(BASE8_X)),
            y: poseidon::biguint_to_fr(&parse_dec(BASE8_Y)),
        }
    }

    pub fn add(&self, other: &Point) -> Point {
        let a = Fr::from(PARAM_A);
        let d = Fr::from(PARAM_D);
        let one = Fr::from(1u64);

        let x1x2 = self.x * other.x;
        let y1y2 = self.y * other.y;
        let dxy = d * x1x2 * y1y2;

        let x_num = self.x * other.y + self.y * other.x;
        let y_num = y1y2 - a * x1x2;

        let x_den_inv = Option::<Fr>::from((one + dxy).invert())
            .expect("twisted Edwards addition is complete on this curve");
        let y_den_inv = Option::<Fr>::from((one - dxy).invert())
            .expect("twisted Edwards addition is complete on this curve");

        Point {
            x: x_num * x_den_inv,
            y: y_num * y_den_inv,
        }
    }

    pub fn mul_scalar(&self, k: &BigUint) -> Point {
        let mut res = Point::identity();
        let mut acc = self.clone();
        for i in 0..k.bits() {
            if k.bit(i) {
                res = res.add(&acc);
            }
            acc = acc.add(&acc);
        }
        res
    }

    /// 32-byte form: y in little-endian with the sign of x in the top bit.
    pub fn compress(&self) -> [u8; POINT_COMPRESSED_SIZE] {
        let mut b = poseidon::fr_to_le_bytes(&self.y);
        if coord_sign(&self.x) {
            b[31] |= 0x80;
        }
        b
    }

    pub fn decompress(b: &[u8; POINT_COMPRESSED_SIZE]) -> Result<Point> {
        let sign = (b[31] & 0x80) != 0;
        let mut yb = *b;
        yb[31] &= 0x7f;

        let y_big = BigUint::from_bytes_le(&yb);
        if y_big >= poseidon::fr_modulus() {
            return Err(NodeError::InvalidInput(
                "point coordinate out of field".to_string(),
            ));
        }
        let y = poseidon::biguint_to_fr(&y_big);

        // ax^2 + y^2 = 1 + dx^2y^2  =>  x^2 = (1 - y^2) / (a - dy^2)
        let y2 = y * y;
        let num = Fr::from(1u64) - y2;
        let den = Fr::from(PARAM_A) - Fr::from(PARAM_D) * y2;
        let den_inv = Option::<Fr>::from(den.invert())
            .ok_or_else(|| NodeError::InvalidInput("invalid compressed point".to_string()))?;
        let x2 = num * den_inv;
        let mut x = Option::<Fr>::from(x2.sqrt())
            .ok_or_else(|| NodeError::InvalidInput("compressed point not on curve".to_string()))?;
        if coord_sign(&x) != sign {
            x = -x;
        }
        Ok(Point { x, y })
    }
}

pub struct PrivateKey {
    scalar: BigUint,
}

impl PrivateKey {
    /// Derives the signing scalar from 32 seed bytes.
    pub fn from_seed(seed: &[u8; 32]) -> PrivateKey {
        let mut scalar = BigUint::from_bytes_le(seed) % suborder();
        if scalar.is_zero() {
            scalar = BigUint::from(1u8);
        }
        PrivateKey { scalar }
    }

    pub fn public(&self) -> Point {
        Point::base8().mul_scalar(&self.scalar)
    }

    pub fn sign(&self, msg: Fr) -> Signature {
        let sub = suborder();
        // deterministic nonce bound to the key and the message
        let sk_fr = poseidon::biguint_to_fr(&self.scalar);
        let r = poseidon::fr_to_biguint(&poseidon::hash(&[sk_fr, msg])) % &sub;
        let r8 = Point::base8().mul_scalar(&r);

        let a = self.public();
        let hm = poseidon::hash(&[r8.x, r8.y, a.x, a.y, msg]);
        let s = (r + poseidon::fr_to_biguint(&hm) * &self.scalar) % sub;
        Signature { r_b8: r8, s }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub r_b8: Point,
    pub s: BigUint,
}

impl Signature {
    /// 64-byte form: compressed R8 followed by s in little-endian.
    pub fn compress(&self) -> [u8; SIGNATURE_COMPRESSED_SIZE] {
        let mut out = [0u8; SIGNATURE_COMPRESSED_SIZE];
        out[..32].copy_from_slice(&self.r_b8.compress());
        let s_bytes = self.s.to_bytes_le();
        out[32..32 + s_bytes.len()].copy_from_slice(&s_bytes);
        out
    }

    pub fn decompress(b: &[u8; SIGNATURE_COMPRESSED_SIZE]) -> Result<Signature> {
        let mut r8_bytes = [0u8; 32];
        r8_bytes.copy_from_slice(&b[..32]);
        let r_b8 = Point::decompress(&r8_bytes)?;
        let s = BigUint::from_bytes_le(&b[32..]);
        if s >= suborder() {
            return Err(NodeError::InvalidInput(
                "signature scalar out of range".to_string(),
            ));
        }
        Ok(Signature { r_b8, s })
    }
}

/// EdDSA-Poseidon verification, with the cofactor folded into both sides.
pub fn verify(pk: &Point, sig: &Signature, msg: Fr) -> bool {
    let hm = poseidon::hash(&[sig.r_b8.x, sig.r_b8.y, pk.x, pk.y, msg]);
    let eight = BigUint::from(8u8);

    let left = Point::base8().mul_scalar(&(&sig.s * &eight));
    let right = sig
        .r_b8
        .mul_scalar(&eight)
        .add(&pk.mul_scalar(&(poseidon::fr_to_biguint(&hm) * &eight)));
    left == right
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_key() -> PrivateKey {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        PrivateKey::from_seed(&seed)
    }

    #[test]
    fn test_base8_on_curve() {
        let p = Point::base8();
        let a = Fr::from(PARAM_A);
        let d = Fr::from(PARAM_D);
        let x2 = p.x * p.x;
        let y2 = p.y * p.y;
        assert_eq!(a * x2 + y2, Fr::from(1u64) + d * x2 * y2);
    }

    #[test]
    fn test_point_compress_roundtrip() {
        for _ in 0..8 {
            let p = random_key().public();
            let decompressed = Point::decompress(&p.compress()).unwrap();
            assert_eq!(decompressed, p);
        }
    }

    #[test]
    fn test_sign_verify() {
        let sk = random_key();
        let pk = sk.public();
        let msg = poseidon::hash(&[Fr::from(123u64)]);
        let sig = sk.sign(msg);
        assert!(verify(&pk, &sig, msg));

        let other_msg = poseidon::hash(&[Fr::from(124u64)]);
        assert!(!verify(&pk, &sig, other_msg));

        let other_pk = random_key().public();
        assert!(!verify(&other_pk, &sig, msg));
    }

    #[test]
    fn test_signature_compress_roundtrip() {
        let sk = random_key();
        let msg = poseidon::hash(&[Fr::from(55u64)]);
        let sig = sk.sign(msg);
        let decompressed = Signature::decompress(&sig.compress()).unwrap();
        assert_eq!(decompressed, sig);
        assert!(verify(&sk.public(), &decompressed, msg));
    }

    #[test]
    fn test_decompress_rejects_out_of_field() {
        let b = [0xffu8; 32];
        assert!(Point::decompress(&b).is_err());
    }
}
