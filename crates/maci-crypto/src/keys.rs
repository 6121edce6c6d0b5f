//! BabyJubJub keypairs and ECDH shared keys.
//!
//! Private keys are field elements; before any curve operation they pass
//! through the pruned-buffer derivation (BLAKE2b expansion, cofactor
//! clamping, divide by 8) so the resulting scalar always lands in the
//! prime-order subgroup generated by [`base_point`].

#![allow(
    clippy::indexing_slicing,
    reason = "Byte-buffer loops are bounded by fixed array lengths"
)]

use std::fmt;
use std::sync::LazyLock;

use ark_bn254::Fr;
use ark_ec::CurveGroup;
use ark_ed_on_bn254::{EdwardsAffine, Fr as JubScalar};
use ark_ff::{BigInteger, PrimeField};
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use thiserror::Error;

use crate::field::{self, DecimalStr, fr_to_le_bytes};

/// Generator of the prime-order subgroup (the circom `Base8` point).
///
/// This is eight times the full-group generator; scalar multiples of it
/// can never carry a small-subgroup component.
static BASE8: LazyLock<EdwardsAffine> = LazyLock::new(|| {
    let x = field::fr_from_dec(
        "5299619240641551281634865583518297030282874472190772894086521144482721001553",
    )
    .expect("generator x coordinate is canonical");
    let y = field::fr_from_dec(
        "16950150798460657717958625567821834550301663161624707787222815936182638968203",
    )
    .expect("generator y coordinate is canonical");
    let point = EdwardsAffine::new_unchecked(x, y);
    assert!(point.is_on_curve(), "subgroup generator must lie on the curve");
    assert!(
        point.is_in_correct_subgroup_assuming_on_curve(),
        "subgroup generator must have prime order"
    );
    point
});

/// The prime-order subgroup generator used for all key material.
#[must_use]
pub fn base_point() -> EdwardsAffine {
    *BASE8
}

/// Errors raised when interpreting field elements as curve points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The coordinates are not a point on BabyJubJub, or the point lies
    /// outside the prime-order subgroup.
    #[error("coordinates do not describe a prime-order BabyJubJub point")]
    InvalidPoint,
}

/// A private key: a uniformly random element of the SNARK scalar field.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivKey(Fr);

impl PrivKey {
    /// Draw a fresh private key from a CSPRNG.
    pub fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self(field::rand_field(rng))
    }

    /// Wrap an existing field element as a private key.
    #[must_use]
    pub const fn from_field_element(value: Fr) -> Self {
        Self(value)
    }

    /// The raw field element behind this key.
    #[must_use]
    pub const fn as_field_element(&self) -> &Fr {
        &self.0
    }

    /// BLAKE2b-512 expansion of the key, shared by scalar derivation and
    /// the deterministic signing nonce.
    pub(crate) fn expand(&self) -> [u8; 64] {
        let digest = blake2b_simd::Params::new()
            .hash_length(64)
            .hash(&fr_to_le_bytes(&self.0));
        let mut out = [0_u8; 64];
        out.copy_from_slice(digest.as_bytes());
        out
    }

    /// The pruned-buffer scalar: clamp the low half of the expansion and
    /// divide out the cofactor.
    #[must_use]
    pub fn formatted_scalar(&self) -> JubScalar {
        let expanded = self.expand();
        let mut buf = [0_u8; 32];
        buf.copy_from_slice(&expanded[..32]);
        buf[0] &= 0xF8;
        buf[31] &= 0x7F;
        buf[31] |= 0x40;
        JubScalar::from_le_bytes_mod_order(&shift_right_3(&buf))
    }

    /// The formatted scalar carried into circuit inputs, as a base-field
    /// element.
    #[must_use]
    pub fn formatted_scalar_as_field(&self) -> Fr {
        field_from_scalar(&self.formatted_scalar())
    }
}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivKey(..)")
    }
}

/// A public key: an affine BabyJubJub point, stored as two field elements.
///
/// The struct itself places no constraint on the coordinates; state leaves
/// carry all-zero placeholder keys and decrypted garbage may produce
/// arbitrary values. [`PubKey::to_affine`] is the validity choke point.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKey {
    /// x coordinate.
    #[serde_as(as = "DecimalStr")]
    pub x: Fr,
    /// y coordinate.
    #[serde_as(as = "DecimalStr")]
    pub y: Fr,
}

impl PubKey {
    /// The all-zero placeholder key used in blank state leaves.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            x: Fr::from(0_u64),
            y: Fr::from(0_u64),
        }
    }

    /// Wrap an affine point.
    #[must_use]
    pub const fn from_affine(point: EdwardsAffine) -> Self {
        Self {
            x: point.x,
            y: point.y,
        }
    }

    /// Interpret the coordinates as a prime-order curve point.
    ///
    /// # Errors
    /// Returns [`KeyError::InvalidPoint`] when the coordinates are off the
    /// curve or outside the prime-order subgroup.
    pub fn to_affine(&self) -> Result<EdwardsAffine, KeyError> {
        let point = EdwardsAffine::new_unchecked(self.x, self.y);
        if point.is_on_curve() && point.is_in_correct_subgroup_assuming_on_curve() {
            Ok(point)
        } else {
            Err(KeyError::InvalidPoint)
        }
    }

    /// The canonical two-element vector form `[x, y]`.
    #[must_use]
    pub const fn to_field_elements(&self) -> [Fr; 2] {
        [self.x, self.y]
    }
}

/// A private key together with its derived public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    /// The private half.
    pub priv_key: PrivKey,
    /// The public half, always `base_point() * formatted_scalar(priv_key)`.
    pub pub_key: PubKey,
}

impl Keypair {
    /// Generate a fresh keypair from a CSPRNG.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self::from_priv_key(PrivKey::random(rng))
    }

    /// Derive the keypair for an existing private key.
    #[must_use]
    pub fn from_priv_key(priv_key: PrivKey) -> Self {
        let pub_key =
            PubKey::from_affine((base_point() * priv_key.formatted_scalar()).into_affine());
        Self { priv_key, pub_key }
    }
}

/// Derive the ECDH shared key: the x coordinate of `pk * format(sk)`.
///
/// Symmetric in the two parties because both formatted scalars act on the
/// same prime-order subgroup.
///
/// # Errors
/// Returns [`KeyError::InvalidPoint`] when `pub_key` is not a prime-order
/// curve point.
pub fn ecdh_shared_key(priv_key: &PrivKey, pub_key: &PubKey) -> Result<Fr, KeyError> {
    let point = pub_key.to_affine()?;
    Ok((point * priv_key.formatted_scalar()).into_affine().x)
}

/// Reduce a base-field element into the subgroup scalar field.
pub(crate) fn scalar_from_field(value: &Fr) -> JubScalar {
    JubScalar::from_le_bytes_mod_order(&fr_to_le_bytes(value))
}

/// Lift a subgroup scalar into the base field. Lossless: the subgroup
/// order is smaller than the field modulus.
pub(crate) fn field_from_scalar(value: &JubScalar) -> Fr {
    Fr::from_le_bytes_mod_order(&value.into_bigint().to_bytes_le())
}

/// Shift a 256-bit little-endian buffer right by three bits.
fn shift_right_3(bytes: &[u8; 32]) -> [u8; 32] {
    let mut out = [0_u8; 32];
    for i in 0..32 {
        let carry = if i + 1 < 32 { bytes[i + 1] << 5 } else { 0 };
        out[i] = (bytes[i] >> 3) | carry;
    }
    out
}
