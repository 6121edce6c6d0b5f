//! EdDSA over BabyJubJub with a Poseidon challenge.
//!
//! The challenge hash runs inside the proving circuits, so it is Poseidon
//! over `[R8.x, R8.y, A.x, A.y, msg]` rather than a byte-oriented hash.
//! The nonce is derived deterministically from the private-key expansion,
//! RFC 8032 style, so signing never consumes randomness.

#![allow(
    clippy::indexing_slicing,
    reason = "Slice bounds are fixed by the 64-byte key expansion"
)]

use ark_bn254::Fr;
use ark_ec::CurveGroup;
use ark_ed_on_bn254::{EdwardsAffine, Fr as JubScalar};
use ark_ff::PrimeField;

use crate::field::fr_to_le_bytes;
use crate::hashing::hash_fixed;
use crate::keys::{PrivKey, PubKey, base_point, field_from_scalar, scalar_from_field};

/// An EdDSA signature.
///
/// `s` is held as a base-field element so the signature embeds directly
/// into the ten-slot message plaintext; it is reduced into the subgroup
/// scalar field wherever it acts on a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// The nonce commitment `R8 = base * r`, as affine coordinates.
    pub r8: (Fr, Fr),
    /// The response scalar `s = r + H(R8, A, msg) * format(sk)`.
    pub s: Fr,
}

impl Signature {
    /// The canonical three-element vector form `[R8.x, R8.y, S]`.
    #[must_use]
    pub const fn to_field_elements(&self) -> [Fr; 3] {
        [self.r8.0, self.r8.1, self.s]
    }
}

/// Sign a single field element.
#[must_use]
pub fn sign(priv_key: &PrivKey, msg: Fr) -> Signature {
    let s_scalar = priv_key.formatted_scalar();
    let pub_point = (base_point() * s_scalar).into_affine();

    let expanded = priv_key.expand();
    let mut nonce_input = [0_u8; 64];
    nonce_input[..32].copy_from_slice(&expanded[32..]);
    nonce_input[32..].copy_from_slice(&fr_to_le_bytes(&msg));
    let nonce_digest = blake2b_simd::Params::new().hash_length(64).hash(&nonce_input);
    let r = JubScalar::from_le_bytes_mod_order(nonce_digest.as_bytes());

    let r8 = (base_point() * r).into_affine();
    let challenge = challenge_scalar(&r8, &pub_point, msg);
    let s = r + challenge * s_scalar;

    Signature {
        r8: (r8.x, r8.y),
        s: field_from_scalar(&s),
    }
}

/// Verify a signature. Returns `false` on any algebraic failure: `R8` or
/// the public key off the prime-order subgroup, a non-canonical `s`, or a
/// failed group equation.
#[must_use]
pub fn verify(pub_key: &PubKey, msg: Fr, signature: &Signature) -> bool {
    let Ok(pub_point) = pub_key.to_affine() else {
        return false;
    };
    let r8 = EdwardsAffine::new_unchecked(signature.r8.0, signature.r8.1);
    if !r8.is_on_curve() || !r8.is_in_correct_subgroup_assuming_on_curve() {
        return false;
    }
    // Reject s >= subgroup order; a reduced alias would verify as well.
    if signature.s.into_bigint() >= <JubScalar as PrimeField>::MODULUS {
        return false;
    }
    let s = scalar_from_field(&signature.s);
    let challenge = challenge_scalar(&r8, &pub_point, msg);

    base_point() * s == pub_point * challenge + r8
}

/// Poseidon challenge `H([R8.x, R8.y, A.x, A.y, msg])` reduced into the
/// scalar field.
fn challenge_scalar(r8: &EdwardsAffine, pub_point: &EdwardsAffine, msg: Fr) -> JubScalar {
    let challenge = hash_fixed(&[r8.x, r8.y, pub_point.x, pub_point.y, msg]);
    scalar_from_field(&challenge)
}

#[cfg(test)]
mod tests {
    use ark_ff::BigInteger;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::field::rand_field;
    use crate::keys::Keypair;

    use super::*;

    #[test]
    fn sign_and_verify() {
        let mut rng = StdRng::seed_from_u64(21);
        let keypair = Keypair::generate(&mut rng);
        let msg = rand_field(&mut rng);
        let signature = sign(&keypair.priv_key, msg);
        assert!(verify(&keypair.pub_key, msg, &signature));
    }

    #[test]
    fn tampered_message_fails() {
        let mut rng = StdRng::seed_from_u64(22);
        let keypair = Keypair::generate(&mut rng);
        let msg = rand_field(&mut rng);
        let signature = sign(&keypair.priv_key, msg);
        assert!(!verify(&keypair.pub_key, msg + Fr::from(1_u64), &signature));
    }

    #[test]
    fn tampered_response_fails() {
        let mut rng = StdRng::seed_from_u64(23);
        let keypair = Keypair::generate(&mut rng);
        let msg = rand_field(&mut rng);
        let mut signature = sign(&keypair.priv_key, msg);
        signature.s += Fr::from(1_u64);
        assert!(!verify(&keypair.pub_key, msg, &signature));
    }

    #[test]
    fn wrong_public_key_fails() {
        let mut rng = StdRng::seed_from_u64(24);
        let keypair = Keypair::generate(&mut rng);
        let other = Keypair::generate(&mut rng);
        let msg = rand_field(&mut rng);
        let signature = sign(&keypair.priv_key, msg);
        assert!(!verify(&other.pub_key, msg, &signature));
    }

    #[test]
    fn unreduced_response_scalar_rejected() {
        let mut rng = StdRng::seed_from_u64(25);
        let keypair = Keypair::generate(&mut rng);
        let msg = rand_field(&mut rng);
        let mut signature = sign(&keypair.priv_key, msg);

        // Add the subgroup order to s: same residue, non-canonical encoding.
        let order = Fr::from_le_bytes_mod_order(
            &<JubScalar as PrimeField>::MODULUS.to_bytes_le(),
        );
        signature.s += order;
        assert!(!verify(&keypair.pub_key, msg, &signature));
    }

    #[test]
    fn garbage_r8_fails_closed() {
        let mut rng = StdRng::seed_from_u64(26);
        let keypair = Keypair::generate(&mut rng);
        let msg = rand_field(&mut rng);
        let signature = Signature {
            r8: (rand_field(&mut rng), rand_field(&mut rng)),
            s: rand_field(&mut rng),
        };
        assert!(!verify(&keypair.pub_key, msg, &signature));
    }
}
