//! Poseidon hashing over the SNARK scalar field.
//!
//! All commitments in the system (state leaves, messages, tree nodes, tally
//! results) are Poseidon hashes with the circom parameterization, so the
//! off-chain values agree with what the circuits recompute.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};

/// Widest input vector a single Poseidon permutation accepts.
pub const MAX_FIXED_WIDTH: usize = 12;

/// Hash a fixed-width input vector with one Poseidon permutation.
///
/// # Panics
/// Panics when `inputs` is empty or wider than [`MAX_FIXED_WIDTH`]. Every
/// caller in this workspace hashes a vector whose width is fixed by a type
/// or a validated tree depth, so a violation is a programming error.
#[must_use]
pub fn hash_fixed(inputs: &[Fr]) -> Fr {
    assert!(
        !inputs.is_empty() && inputs.len() <= MAX_FIXED_WIDTH,
        "poseidon arity {} outside supported range 1..={MAX_FIXED_WIDTH}",
        inputs.len()
    );
    let mut hasher =
        Poseidon::<Fr>::new_circom(inputs.len()).expect("arity validated against circom range");
    hasher.hash(inputs).expect("input width matches hasher arity")
}

/// Hash a single field element.
#[must_use]
pub fn hash_one(input: Fr) -> Fr {
    hash_fixed(&[input])
}

/// Hash an ordered pair, the Merkle tree node combiner.
#[must_use]
pub fn hash_left_right(left: Fr, right: Fr) -> Fr {
    hash_fixed(&[left, right])
}

/// Hash an input vector of any length.
///
/// Vectors up to [`MAX_FIXED_WIDTH`] wide take a single permutation.
/// Longer vectors are absorbed as a left fold: the first twelve elements
/// are hashed, then each further block of eleven is hashed together with
/// the running accumulator in slot zero. The fold is only reached by the
/// tally-results commitment, whose width is fixed per configuration, so
/// both sides of the prover agree on the schedule.
#[must_use]
pub fn hash_many(inputs: &[Fr]) -> Fr {
    if inputs.len() <= MAX_FIXED_WIDTH {
        return hash_fixed(inputs);
    }
    let (head, rest) = inputs.split_at(MAX_FIXED_WIDTH);
    let mut acc = hash_fixed(head);
    for block in rest.chunks(MAX_FIXED_WIDTH - 1) {
        let mut absorbed = Vec::with_capacity(block.len().saturating_add(1));
        absorbed.push(acc);
        absorbed.extend_from_slice(block);
        acc = hash_fixed(&absorbed);
    }
    acc
}
