//! Poseidon-keystream encryption of field-element vectors.
//!
//! The cipher adds a per-slot keystream element `H([key, iv + i])` to each
//! plaintext element. Decryption with any key always succeeds and always
//! yields a vector of the same length; a wrong key produces unrelated
//! field elements, which downstream validity predicates reject the same
//! way they reject a well-formed but invalid command.

use ark_bn254::Fr;
use rand::{CryptoRng, Rng};

use crate::field::rand_field;
use crate::hashing::hash_fixed;

/// An encrypted field-element vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    /// The random initialization vector the keystream is derived from.
    pub iv: Fr,
    /// One ciphertext element per plaintext element.
    pub data: Vec<Fr>,
}

/// Encrypt a plaintext vector under a shared field-element key.
pub fn encrypt<R: Rng + CryptoRng>(plaintext: &[Fr], key: Fr, rng: &mut R) -> Ciphertext {
    let iv = rand_field(rng);
    let data = (0_u64..)
        .zip(plaintext)
        .map(|(i, element)| *element + keystream(key, iv, i))
        .collect();
    Ciphertext { iv, data }
}

/// Decrypt a ciphertext. Infallible by design; see the module docs.
#[must_use]
pub fn decrypt(ciphertext: &Ciphertext, key: Fr) -> Vec<Fr> {
    (0_u64..)
        .zip(&ciphertext.data)
        .map(|(i, element)| *element - keystream(key, ciphertext.iv, i))
        .collect()
}

fn keystream(key: Fr, iv: Fr, index: u64) -> Fr {
    hash_fixed(&[key, iv + Fr::from(index)])
}
