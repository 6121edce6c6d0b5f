//! The SNARK scalar field and its canonical wire encoding.
//!
//! Field elements cross the library boundary as decimal strings (the format
//! the prover consumes), so this module carries a `serde_as` adapter for
//! that encoding alongside parsing and conversion helpers.

use std::str::FromStr;
use std::sync::LazyLock;

use ark_ff::{BigInteger, PrimeField, UniformRand};
use num_bigint::BigUint;
use rand::{CryptoRng, Rng};
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub use ark_bn254::Fr;

/// The BN254 scalar field modulus as a decimal string.
///
/// Every value handled by this workspace is a canonical representative in
/// `[0, p)`; the [`Fr`] type guarantees this by construction.
pub const SNARK_SCALAR_FIELD: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// The zero leaf of the message tree: `keccak256("Maci") mod p`.
///
/// A publicly recomputable constant, so nobody can claim a trapdoor in the
/// empty subtrees of the message tree.
pub static NOTHING_UP_MY_SLEEVE: LazyLock<Fr> = LazyLock::new(|| {
    let digest = Keccak256::digest(b"Maci");
    Fr::from_be_bytes_mod_order(&digest)
});

/// Errors raised when parsing wire-format field elements.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The string is not a decimal integer in `[0, p)`.
    #[error("not a canonical decimal field element: {0:?}")]
    NonCanonical(String),
}

/// Draw a uniform field element from a CSPRNG.
pub fn rand_field<R: Rng + CryptoRng>(rng: &mut R) -> Fr {
    Fr::rand(rng)
}

/// Render a field element in the decimal wire format.
#[must_use]
pub fn fr_to_dec(value: &Fr) -> String {
    let repr: BigUint = (*value).into();
    repr.to_string()
}

/// Parse a decimal-string field element.
///
/// Strict about canonicity: a value at or above the modulus is rejected
/// rather than reduced, so every field element has exactly one accepted
/// wire encoding.
///
/// # Errors
/// Returns [`FieldError::NonCanonical`] when the string is not a decimal
/// integer strictly below the modulus.
pub fn fr_from_dec(value: &str) -> Result<Fr, FieldError> {
    let parsed = BigUint::from_str(value)
        .map_err(|_| FieldError::NonCanonical(value.to_owned()))?;
    let modulus: BigUint = <Fr as PrimeField>::MODULUS.into();
    if parsed >= modulus {
        return Err(FieldError::NonCanonical(value.to_owned()));
    }
    Ok(Fr::from_le_bytes_mod_order(&parsed.to_bytes_le()))
}

/// Extract a field element as `u64`, when it fits.
///
/// Commands arrive as raw field elements; indices and nonces are only
/// meaningful when they are small integers, so the caller treats `None`
/// the same way as any other failed validity predicate.
#[must_use]
pub fn fr_to_u64(value: &Fr) -> Option<u64> {
    let limbs = value.into_bigint().0;
    let [low, rest @ ..] = limbs;
    rest.iter().all(|&limb| limb == 0).then_some(low)
}

/// The canonical 32-byte little-endian encoding of a field element.
#[must_use]
pub fn fr_to_le_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_le();
    let mut out = [0_u8; 32];
    for (slot, byte) in out.iter_mut().zip(bytes) {
        *slot = byte;
    }
    out
}

/// A `serde_as` adapter encoding field elements as decimal strings.
///
/// This is the prover-facing wire format for every field in the circuit
/// input structures and the on-chain message encoding.
pub struct DecimalStr;

impl serde_with::SerializeAs<Fr> for DecimalStr {
    fn serialize_as<S>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&fr_to_dec(value))
    }
}

impl<'de> serde_with::DeserializeAs<'de, Fr> for DecimalStr {
    fn deserialize_as<D>(deserializer: D) -> Result<Fr, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        fr_from_dec(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use ark_ff::Zero;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn modulus_constant_matches_field() {
        let modulus: BigUint = <Fr as PrimeField>::MODULUS.into();
        assert_eq!(modulus.to_string(), SNARK_SCALAR_FIELD);
    }

    #[test]
    fn decimal_roundtrip() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..16 {
            let value = rand_field(&mut rng);
            let parsed = fr_from_dec(&fr_to_dec(&value)).expect("roundtrip parse failed");
            assert_eq!(parsed, value);
        }
    }

    #[test]
    fn non_canonical_strings_rejected() {
        assert!(fr_from_dec("").is_err());
        assert!(fr_from_dec("0x12").is_err());
        assert!(fr_from_dec(SNARK_SCALAR_FIELD).is_err());
    }

    #[test]
    fn nothing_up_my_sleeve_is_canonical() {
        let value = *NOTHING_UP_MY_SLEEVE;
        assert!(!value.is_zero());
        assert_eq!(
            fr_from_dec(&fr_to_dec(&value)).expect("constant reparses"),
            value
        );
    }

    #[test]
    fn fr_to_u64_bounds() {
        assert_eq!(fr_to_u64(&Fr::from(0_u64)), Some(0));
        assert_eq!(fr_to_u64(&Fr::from(u64::MAX)), Some(u64::MAX));
        let big = Fr::from(u64::MAX) + Fr::from(1_u64);
        assert_eq!(fr_to_u64(&big), None);
    }
}
