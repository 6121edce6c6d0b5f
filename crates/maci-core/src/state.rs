//! The authoritative in-memory coordinator state.
//!
//! `MaciState` mirrors the on-chain voting system: it owns the ordered
//! users, the ordered messages with their ephemeral encryption keys, and
//! the randomized zeroth state leaf. Merkle trees are never stored; they
//! are rebuilt from the owned collections on demand, trading recomputation
//! cost for a minimal, auditable state.
//!
//! Message processing is deliberately asymmetric about failure: capacity
//! violations surface as errors, while a message that fails any validity
//! predicate is dropped without a trace of *why*. Distinguishing a
//! wrongly-keyed message from a wrong-nonce one would tell observers
//! which messages the coordinator could decrypt.

#![allow(
    clippy::arithmetic_side_effects,
    reason = "Index arithmetic is bounded by validated tree capacities"
)]

use ark_bn254::Fr;
use ark_ff::{One, PrimeField, Zero};
use maci_crypto::eddsa::Signature;
use maci_crypto::field::fr_to_u64;
use maci_crypto::keys::{Keypair, PubKey, ecdh_shared_key};
use maci_tree::{IncrementalMerkleTree, TreeError};
use num_bigint::BigUint;
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::command::{Command, Message};
use crate::config::CoordinatorConfig;
use crate::leaf::StateLeaf;

/// Errors raised when an append would exceed a tree capacity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// Every non-reserved state leaf slot is taken.
    #[error("state tree is full: at most {max_users} users")]
    StateTreeFull {
        /// Highest user count (capacity minus the reserved zeroth slot).
        max_users: usize,
    },

    /// Every message tree slot is taken.
    #[error("message tree is full: at most {max_messages} messages")]
    MessageTreeFull {
        /// Total message slots.
        max_messages: usize,
    },
}

/// The index passed to [`MaciState::process_message`] addresses no
/// published message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message index {index} is out of range ({count} messages published)")]
pub struct InvalidMessageIndex {
    /// The offending index.
    pub index: usize,
    /// Number of published messages.
    pub count: usize,
}

/// Errors raised by the batched vote tally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TallyError {
    /// The batch start is not aligned to the batch size.
    #[error("tally start index {start_index} is not a multiple of batch size {batch_size}")]
    UnalignedBatchStart {
        /// The offending start index.
        start_index: usize,
        /// The configured tally batch size.
        batch_size: usize,
    },

    /// The batch start lies beyond the signed-up users.
    #[error("tally start index {start_index} is out of range ({user_count} users)")]
    StartOutOfRange {
        /// The offending start index.
        start_index: usize,
        /// Number of signed-up users.
        user_count: usize,
    },
}

/// One signed-up user.
///
/// The vote vector always holds `2^vote_option_tree_depth` entries, and
/// `voice_credit_balance + sum(votes[i]^2)` equals the balance granted at
/// sign-up at all times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// The user's current public key; rotates with accepted commands.
    pub pub_key: PubKey,
    /// Current weight per vote option.
    pub votes: Vec<Fr>,
    /// Remaining voice credits.
    pub voice_credit_balance: Fr,
    /// Count of accepted commands.
    pub nonce: Fr,
}

impl User {
    fn new(pub_key: PubKey, num_vote_options: usize, voice_credit_balance: u64) -> Self {
        Self {
            pub_key,
            votes: vec![Fr::zero(); num_vote_options],
            voice_credit_balance: Fr::from(voice_credit_balance),
            nonce: Fr::zero(),
        }
    }

    /// Build the user's vote option tree.
    ///
    /// # Errors
    /// Returns a [`TreeError`] for unsupported depths; the engine only
    /// calls this with its validated configuration depth.
    pub fn vote_option_tree(&self, depth: usize) -> Result<IncrementalMerkleTree, TreeError> {
        let mut tree = IncrementalMerkleTree::new(depth, Fr::zero())?;
        for vote in &self.votes {
            tree.insert(*vote)?;
        }
        Ok(tree)
    }

    /// The user's current state leaf.
    ///
    /// # Errors
    /// Returns a [`TreeError`] for unsupported depths.
    pub fn as_state_leaf(&self, vote_option_tree_depth: usize) -> Result<StateLeaf, TreeError> {
        Ok(StateLeaf {
            pub_key: self.pub_key,
            vote_option_tree_root: self.vote_option_tree(vote_option_tree_depth)?.root(),
            voice_credit_balance: self.voice_credit_balance,
            nonce: self.nonce,
        })
    }
}

/// The off-chain coordinator state engine.
///
/// `Clone` is the deep copy: the circuit-input builders fork a clone to
/// simulate batches forward without touching the authoritative state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaciState {
    pub(crate) config: CoordinatorConfig,
    pub(crate) coordinator: Keypair,
    pub(crate) users: Vec<User>,
    pub(crate) messages: Vec<Message>,
    pub(crate) enc_pub_keys: Vec<PubKey>,
    pub(crate) zeroth_state_leaf: StateLeaf,
}

impl MaciState {
    /// Create an empty state for a coordinator keypair.
    #[must_use]
    pub fn new(config: CoordinatorConfig, coordinator: Keypair) -> Self {
        let zeroth_state_leaf = StateLeaf::blank(config.vote_option_tree_depth())
            .expect("depth validated by CoordinatorConfig");
        Self {
            config,
            coordinator,
            users: Vec::new(),
            messages: Vec::new(),
            enc_pub_keys: Vec::new(),
            zeroth_state_leaf,
        }
    }

    /// The immutable configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The coordinator keypair.
    #[must_use]
    pub const fn coordinator(&self) -> &Keypair {
        &self.coordinator
    }

    /// Signed-up users, in sign-up order.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Published messages, in publication order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Ephemeral encryption keys, paired 1:1 with the messages.
    #[must_use]
    pub fn enc_pub_keys(&self) -> &[PubKey] {
        &self.enc_pub_keys
    }

    /// The current zeroth state leaf.
    #[must_use]
    pub const fn zeroth_state_leaf(&self) -> &StateLeaf {
        &self.zeroth_state_leaf
    }

    /// Append a user and grant an initial credit balance. Returns the
    /// user's 1-based state index.
    ///
    /// # Errors
    /// Returns [`CapacityError::StateTreeFull`] once every non-reserved
    /// leaf slot is taken.
    #[instrument(skip(self, pub_key), fields(user_count = self.users.len()))]
    pub fn sign_up(
        &mut self,
        pub_key: PubKey,
        voice_credit_balance: u64,
    ) -> Result<usize, CapacityError> {
        let max_users = self.config.max_users();
        if self.users.len() == max_users {
            return Err(CapacityError::StateTreeFull { max_users });
        }
        self.users.push(User::new(
            pub_key,
            self.config.num_vote_options(),
            voice_credit_balance,
        ));
        debug!(state_index = self.users.len(), "user signed up");
        Ok(self.users.len())
    }

    /// Append a message and the ephemeral key it was encrypted to.
    ///
    /// No validation happens here: invalid and undecryptable messages are
    /// committed to the message tree like any other, and fall out during
    /// processing.
    ///
    /// # Errors
    /// Returns [`CapacityError::MessageTreeFull`] once every message slot
    /// is taken.
    pub fn publish_message(
        &mut self,
        message: Message,
        enc_pub_key: PubKey,
    ) -> Result<(), CapacityError> {
        let max_messages = self.config.max_messages();
        if self.messages.len() == max_messages {
            return Err(CapacityError::MessageTreeFull { max_messages });
        }
        self.messages.push(message);
        self.enc_pub_keys.push(enc_pub_key);
        debug!(message_count = self.messages.len(), "message published");
        Ok(())
    }

    /// Apply the message at `index`.
    ///
    /// A message failing any validity predicate leaves the state unchanged
    /// and reports success; only an index addressing no message at all is
    /// an error.
    ///
    /// # Errors
    /// Returns [`InvalidMessageIndex`] when `index` is out of range.
    #[instrument(skip(self))]
    pub fn process_message(&mut self, index: usize) -> Result<(), InvalidMessageIndex> {
        if index >= self.messages.len() {
            return Err(InvalidMessageIndex {
                index,
                count: self.messages.len(),
            });
        }
        self.apply_message(index);
        Ok(())
    }

    /// Process one batch of messages from `start_index`, then swap in a
    /// fresh random zeroth leaf.
    ///
    /// Indices past the published messages are skipped, so a short tail
    /// batch is fine. The zeroth-leaf swap happens unconditionally: every
    /// processed batch changes the state root, whether or not any message
    /// in it was valid.
    #[instrument(skip(self, random_state_leaf))]
    pub fn batch_process_messages(&mut self, start_index: usize, random_state_leaf: StateLeaf) {
        let end = start_index.saturating_add(self.config.message_batch_size());
        for index in start_index..end {
            if index < self.messages.len() {
                self.apply_message(index);
            }
        }
        self.zeroth_state_leaf = random_state_leaf;
    }

    /// The ECDH key for a published message, or zero when the recorded
    /// ephemeral key is not a valid curve point. Decrypting with the zero
    /// key yields garbage the validity predicates reject, which is exactly
    /// how such a message must behave.
    pub(crate) fn shared_key(&self, index: usize) -> Fr {
        self.enc_pub_keys
            .get(index)
            .and_then(|enc_pub_key| ecdh_shared_key(&self.coordinator.priv_key, enc_pub_key).ok())
            .unwrap_or_else(Fr::zero)
    }

    /// Decrypt and conditionally apply one message. Assumes `index` is in
    /// range.
    pub(crate) fn apply_message(&mut self, index: usize) {
        let shared_key = self.shared_key(index);
        let Some(message) = self.messages.get(index) else {
            return;
        };
        let (command, signature) = message.decrypt(shared_key);
        if self.try_apply(&command, &signature) {
            trace!(index, "message applied");
        } else {
            // One uniform event for every rejection reason; see module docs.
            debug!(index, "message had no effect");
        }
    }

    /// Run the validity predicates and, on success, update the addressed
    /// user atomically. Returns whether the state changed.
    fn try_apply(&mut self, command: &Command, signature: &Signature) -> bool {
        // Index bounds: 1-based, slot 0 reserved.
        let Some(state_index) = fr_to_u64(&command.state_index) else {
            return false;
        };
        if state_index < 1 {
            return false;
        }
        let Ok(user_index) = usize::try_from(state_index - 1) else {
            return false;
        };
        let Some(user) = self.users.get(user_index) else {
            return false;
        };

        // Signature over the command hash, against the current key.
        if !command.verify_signature(&user.pub_key, signature) {
            return false;
        }

        // Strictly sequential nonces.
        if command.nonce != user.nonce + Fr::one() {
            return false;
        }

        // Vote option bound.
        let Some(option_index) = fr_to_u64(&command.vote_option_index) else {
            return false;
        };
        if option_index > self.config.max_vote_option_index() {
            return false;
        }
        let Ok(option) = usize::try_from(option_index) else {
            return false;
        };

        // Quadratic credits, accounted over the integers: refund the
        // square of the previous weight, charge the square of the new one.
        let Some(prev) = user.votes.get(option) else {
            return false;
        };
        let prev: BigUint = (*prev).into();
        let balance: BigUint = user.voice_credit_balance.into();
        let weight: BigUint = command.new_vote_weight.into();
        let available = balance + &prev * &prev;
        let cost = &weight * &weight;
        if available < cost {
            return false;
        }
        let new_balance = available - cost;

        let Some(user) = self.users.get_mut(user_index) else {
            return false;
        };
        if let Some(slot) = user.votes.get_mut(option) {
            *slot = command.new_vote_weight;
        }
        user.voice_credit_balance = Fr::from_le_bytes_mod_order(&new_balance.to_bytes_le());
        user.nonce += Fr::one();
        // Rotation takes effect from the next message: this one was
        // checked against the key it replaces.
        user.pub_key = command.new_pub_key;
        true
    }

    /// Elementwise vote sums of every user strictly before the batch that
    /// starts at `start_index`, skipping the reserved zeroth slot.
    #[must_use]
    pub fn compute_cumulative_vote_tally(&self, start_index: usize) -> Vec<Fr> {
        let mut results = vec![Fr::zero(); self.config.num_vote_options()];
        for user in self.users.iter().take(start_index.saturating_sub(1)) {
            for (slot, vote) in results.iter_mut().zip(&user.votes) {
                *slot += vote;
            }
        }
        results
    }

    /// Elementwise vote sums of one tally batch of state leaf positions.
    /// Position 0 never contributes; positions past the signed-up users
    /// contribute zero.
    ///
    /// # Errors
    /// Returns a [`TallyError`] when `start_index` is not aligned to the
    /// tally batch size or lies beyond the signed-up users.
    pub fn compute_batch_vote_tally(&self, start_index: usize) -> Result<Vec<Fr>, TallyError> {
        let batch_size = self.config.tally_batch_size();
        if start_index % batch_size != 0 {
            return Err(TallyError::UnalignedBatchStart {
                start_index,
                batch_size,
            });
        }
        if start_index >= self.users.len() {
            return Err(TallyError::StartOutOfRange {
                start_index,
                user_count: self.users.len(),
            });
        }
        let mut results = vec![Fr::zero(); self.config.num_vote_options()];
        for position in start_index..start_index.saturating_add(batch_size) {
            if position == 0 {
                continue;
            }
            let Some(user) = self.users.get(position - 1) else {
                continue;
            };
            for (slot, vote) in results.iter_mut().zip(&user.votes) {
                *slot += vote;
            }
        }
        Ok(results)
    }

    /// Rebuild the state tree: zero value is the blank leaf hash, leaf 0
    /// the zeroth state leaf, then one leaf per user.
    ///
    /// # Errors
    /// Returns a [`TreeError`] on depth or capacity violations; both are
    /// prevented by the validated configuration.
    pub fn gen_state_tree(&self) -> Result<IncrementalMerkleTree, TreeError> {
        let vote_depth = self.config.vote_option_tree_depth();
        let blank_hash = StateLeaf::blank(vote_depth)?.hash();
        let mut tree = IncrementalMerkleTree::new(self.config.state_tree_depth(), blank_hash)?;
        tree.insert(self.zeroth_state_leaf.hash())?;
        for user in &self.users {
            tree.insert(user.as_state_leaf(vote_depth)?.hash())?;
        }
        Ok(tree)
    }

    /// The current state tree root.
    ///
    /// # Errors
    /// See [`MaciState::gen_state_tree`].
    pub fn gen_state_root(&self) -> Result<Fr, TreeError> {
        Ok(self.gen_state_tree()?.root())
    }

    /// Rebuild the message tree: zero value is the nothing-up-my-sleeve
    /// constant, one leaf per published message.
    ///
    /// # Errors
    /// See [`MaciState::gen_state_tree`].
    pub fn gen_message_tree(&self) -> Result<IncrementalMerkleTree, TreeError> {
        let mut tree = IncrementalMerkleTree::new(
            self.config.message_tree_depth(),
            *maci_crypto::field::NOTHING_UP_MY_SLEEVE,
        )?;
        for message in &self.messages {
            tree.insert(message.hash())?;
        }
        Ok(tree)
    }

    /// The current message tree root.
    ///
    /// # Errors
    /// See [`MaciState::gen_state_tree`].
    pub fn gen_message_root(&self) -> Result<Fr, TreeError> {
        Ok(self.gen_message_tree()?.root())
    }
}
