//! Commands and their encrypted on-chain message form.
//!
//! A command is the cleartext user intent. On the wire it travels as a
//! [`Message`]: the seven command elements plus the three signature
//! elements, encrypted under an ECDH key shared between the voter's
//! ephemeral keypair and the coordinator. Publishing performs no
//! validation, so decryption must be total: any ten field elements
//! decrypt to *some* command/signature pair, and the processing
//! predicates decide what it is worth.

use ark_bn254::Fr;
use maci_crypto::eddsa::{self, Signature};
use maci_crypto::encryption::{self, Ciphertext};
use maci_crypto::field::DecimalStr;
use maci_crypto::hashing::hash_fixed;
use maci_crypto::keys::{Keypair, PubKey};
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// Field-element width of a serialized command.
pub const COMMAND_LENGTH: usize = 7;

/// Field-element width of an encrypted message body.
pub const MESSAGE_DATA_LENGTH: usize = 10;

/// A cleartext voting command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// 1-based index of the addressed state leaf; 0 is reserved.
    pub state_index: Fr,
    /// Key-rotation target; equal to the current key to skip rotation.
    pub new_pub_key: PubKey,
    /// 0-based vote option index.
    pub vote_option_index: Fr,
    /// The new weight for that option.
    pub new_vote_weight: Fr,
    /// Must equal the user's accepted-command count plus one.
    pub nonce: Fr,
    /// Uniform salt for unlinkability of the command hash.
    pub salt: Fr,
}

impl Command {
    /// The canonical seven-element vector form.
    #[must_use]
    pub const fn to_field_elements(&self) -> [Fr; COMMAND_LENGTH] {
        [
            self.state_index,
            self.new_pub_key.x,
            self.new_pub_key.y,
            self.vote_option_index,
            self.new_vote_weight,
            self.nonce,
            self.salt,
        ]
    }

    /// The command hash, the value users sign.
    #[must_use]
    pub fn hash(&self) -> Fr {
        hash_fixed(&self.to_field_elements())
    }

    /// Sign the command hash with the voter's keypair.
    #[must_use]
    pub fn sign(&self, keypair: &Keypair) -> Signature {
        eddsa::sign(&keypair.priv_key, self.hash())
    }

    /// Check a signature over the command hash.
    #[must_use]
    pub fn verify_signature(&self, pub_key: &PubKey, signature: &Signature) -> bool {
        eddsa::verify(pub_key, self.hash(), signature)
    }

    /// Encrypt the command and its signature under a shared key.
    pub fn encrypt<R: Rng + CryptoRng>(
        &self,
        signature: &Signature,
        shared_key: Fr,
        rng: &mut R,
    ) -> Message {
        let mut plaintext = Vec::with_capacity(MESSAGE_DATA_LENGTH);
        plaintext.extend_from_slice(&self.to_field_elements());
        plaintext.extend_from_slice(&signature.to_field_elements());
        let Ciphertext { iv, data } = encryption::encrypt(&plaintext, shared_key, rng);
        Message {
            iv,
            data: data
                .try_into()
                .expect("ciphertext length equals the fixed plaintext length"),
        }
    }
}

/// An encrypted command, the unit stored in the message tree.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The keystream initialization vector.
    #[serde_as(as = "DecimalStr")]
    pub iv: Fr,
    /// The ten ciphertext elements.
    #[serde_as(as = "[DecimalStr; 10]")]
    pub data: [Fr; MESSAGE_DATA_LENGTH],
}

impl Message {
    /// The canonical eleven-element vector form `[iv, data...]`.
    #[must_use]
    pub fn to_field_elements(&self) -> [Fr; 11] {
        let mut out = [self.iv; 11];
        for (slot, value) in out.iter_mut().skip(1).zip(self.data) {
            *slot = value;
        }
        out
    }

    /// The message hash inserted into the message tree.
    #[must_use]
    pub fn hash(&self) -> Fr {
        hash_fixed(&self.to_field_elements())
    }

    /// Decrypt into a command/signature pair.
    ///
    /// Total by design: a wrong key produces a garbage pair that the
    /// processing predicates reject like any other invalid command.
    #[must_use]
    pub fn decrypt(&self, shared_key: Fr) -> (Command, Signature) {
        let ciphertext = Ciphertext {
            iv: self.iv,
            data: self.data.to_vec(),
        };
        let plaintext: [Fr; MESSAGE_DATA_LENGTH] = encryption::decrypt(&ciphertext, shared_key)
            .try_into()
            .expect("decryption preserves the plaintext length");
        let [state_index, new_x, new_y, vote_option_index, new_vote_weight, nonce, salt, r8_x, r8_y, s] =
            plaintext;
        (
            Command {
                state_index,
                new_pub_key: PubKey { x: new_x, y: new_y },
                vote_option_index,
                new_vote_weight,
                nonce,
                salt,
            },
            Signature {
                r8: (r8_x, r8_y),
                s,
            },
        )
    }
}
