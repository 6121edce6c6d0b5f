//! Cryptographic primitives for the MACI coordinator core.
//!
//! Everything in this crate operates over the BN254 scalar field, the field
//! the proving circuits are arithmetized in. The modules are layered bottom
//! up: [`field`] fixes the field type and its wire encoding, [`hashing`]
//! provides the Poseidon hash used for every commitment in the system,
//! [`keys`] implements BabyJubJub keypairs and ECDH, [`eddsa`] the signature
//! scheme over those keys, and [`encryption`] the keystream cipher that
//! carries commands from users to the coordinator.

/// EdDSA over BabyJubJub with a Poseidon challenge.
pub mod eddsa;
/// Poseidon-keystream encryption of field-element vectors.
pub mod encryption;
/// The SNARK scalar field and canonical wire conversions.
pub mod field;
/// Poseidon hashing over the SNARK scalar field.
pub mod hashing;
/// BabyJubJub keypairs and ECDH shared keys.
pub mod keys;
