//! State leaves: the per-slot record hashed into the state tree.

use ark_bn254::Fr;
use maci_crypto::field::rand_field;
use maci_crypto::hashing::hash_fixed;
use maci_crypto::keys::PubKey;
use maci_tree::{TreeError, empty_root};
use rand::{CryptoRng, Rng};

/// Field-element width of a serialized state leaf.
pub const STATE_LEAF_LENGTH: usize = 5;

/// One state tree leaf.
///
/// Slot zero of the state tree holds a leaf that never belongs to a user:
/// blank at construction, replaced with a [`StateLeaf::random`] value after
/// every processed batch so consecutive state roots cannot be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLeaf {
    /// The user's current public key.
    pub pub_key: PubKey,
    /// Root of the user's vote option tree.
    pub vote_option_tree_root: Fr,
    /// Remaining voice credits.
    pub voice_credit_balance: Fr,
    /// Count of accepted commands.
    pub nonce: Fr,
}

impl StateLeaf {
    /// The blank leaf: zero key, empty vote option tree, no credits.
    ///
    /// # Errors
    /// Returns [`TreeError::DepthOutOfRange`] for unsupported depths.
    pub fn blank(vote_option_tree_depth: usize) -> Result<Self, TreeError> {
        Ok(Self {
            pub_key: PubKey::zero(),
            vote_option_tree_root: empty_root(vote_option_tree_depth, Fr::from(0_u64))?,
            voice_credit_balance: Fr::from(0_u64),
            nonce: Fr::from(0_u64),
        })
    }

    /// A leaf with all four fields drawn uniformly from the field.
    pub fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self {
            pub_key: PubKey {
                x: rand_field(rng),
                y: rand_field(rng),
            },
            vote_option_tree_root: rand_field(rng),
            voice_credit_balance: rand_field(rng),
            nonce: rand_field(rng),
        }
    }

    /// The canonical five-element vector form.
    #[must_use]
    pub const fn to_field_elements(&self) -> [Fr; STATE_LEAF_LENGTH] {
        [
            self.pub_key.x,
            self.pub_key.y,
            self.vote_option_tree_root,
            self.voice_credit_balance,
            self.nonce,
        ]
    }

    /// The leaf hash inserted into the state tree.
    #[must_use]
    pub fn hash(&self) -> Fr {
        hash_fixed(&self.to_field_elements())
    }
}
