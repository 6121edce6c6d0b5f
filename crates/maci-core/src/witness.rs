//! Circuit-input builders: the wire contract between core and prover.
//!
//! Three pure builders assemble the witnesses for the message-processing
//! and tally circuits. None of them mutate the authoritative state; the
//! batch builder forks a deep clone and walks it forward message by
//! message. Every value crosses the boundary as a decimal-string field
//! element, the encoding the prover consumes.
//!
//! A message whose decrypted indices are out of range still gets a
//! witness: its paths fall back to slot zero, the slot the circuit reads
//! on its no-op branch. This keeps invalid and undecryptable messages
//! inside the batch proof, which is what makes dropping them
//! censorship-evident.

#![allow(
    clippy::arithmetic_side_effects,
    reason = "Position arithmetic is bounded by validated tree capacities"
)]

use ark_bn254::Fr;
use ark_ff::Zero;
use maci_crypto::field::{DecimalStr, fr_to_u64};
use maci_tree::{IncrementalMerkleTree, MerklePath, TreeError, empty_root};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use thiserror::Error;

use crate::command::MESSAGE_DATA_LENGTH;
use crate::leaf::{STATE_LEAF_LENGTH, StateLeaf};
use crate::state::MaciState;

/// Field-element width of a serialized message, `iv` included.
const MESSAGE_LENGTH: usize = MESSAGE_DATA_LENGTH + 1;

/// Errors raised by the circuit-input builders. All programmer errors:
/// semantic message invalidity never surfaces here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WitnessError {
    /// Tree reconstruction failed; prevented by a validated configuration.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// The message index addresses no published message.
    #[error("message index {index} is out of range ({count} messages published)")]
    MessageIndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of published messages.
        count: usize,
    },

    /// The batch holds no messages at all.
    #[error("batch starting at {start_index} contains no published messages")]
    EmptyBatch {
        /// The offending batch start.
        start_index: usize,
    },

    /// The batch start is not aligned to the batch size.
    #[error("batch start {start_index} is not a multiple of batch size {batch_size}")]
    UnalignedBatchStart {
        /// The offending start index.
        start_index: usize,
        /// The relevant batch size.
        batch_size: usize,
    },

    /// The tally batch start lies beyond the filled state leaves.
    #[error("batch start {start_index} is out of range ({leaf_count} filled state leaves)")]
    BatchStartOutOfRange {
        /// The offending start index.
        start_index: usize,
        /// Filled state leaves, the zeroth slot included.
        leaf_count: usize,
    },

    /// The intermediate tree disagrees with the state tree, which means
    /// the builder and the engine have diverged.
    #[error("intermediate tree root {actual} does not match state root {expected}")]
    RootMismatch {
        /// The authoritative state root.
        expected: Fr,
        /// The root recomputed from batch subtrees.
        actual: Fr,
    },
}

/// Witness for a single message's state transition.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UpdateStateTreeCircuitInputs {
    /// Coordinator public key `[x, y]`.
    #[serde_as(as = "[DecimalStr; 2]")]
    #[schemars(with = "[String; 2]")]
    pub coordinator_public_key: [Fr; 2],
    /// Coordinator private key after the pruned-buffer derivation.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub ecdh_private_key: Fr,
    /// The message's ephemeral public key `[x, y]`.
    #[serde_as(as = "[DecimalStr; 2]")]
    #[schemars(with = "[String; 2]")]
    pub ecdh_public_key: [Fr; 2],
    /// The raw message `[iv, data...]`.
    #[serde_as(as = "[DecimalStr; 11]")]
    #[schemars(with = "[String; 11]")]
    pub message: [Fr; MESSAGE_LENGTH],
    /// Message tree root.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub msg_tree_root: Fr,
    /// Sibling path of the message leaf.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub msg_tree_path_elements: Vec<Fr>,
    /// Left/right bitmap of the message leaf path.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub msg_tree_path_index: Vec<Fr>,
    /// The addressed user's previous weight at the addressed option.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub vote_options_leaf_raw: Fr,
    /// Root of the addressed user's vote option tree.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub vote_options_tree_root: Fr,
    /// Sibling path of the addressed vote option leaf.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub vote_options_tree_path_elements: Vec<Fr>,
    /// Left/right bitmap of the vote option path.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub vote_options_tree_path_index: Vec<Fr>,
    /// Highest permitted vote option index.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub vote_options_max_leaf_index: Fr,
    /// The addressed state leaf, unhashed.
    #[serde_as(as = "[DecimalStr; 5]")]
    #[schemars(with = "[String; 5]")]
    pub state_tree_data_raw: [Fr; STATE_LEAF_LENGTH],
    /// Highest filled state leaf index.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub state_tree_max_leaf_index: Fr,
    /// State tree root before this message.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub state_tree_root: Fr,
    /// Sibling path of the addressed state leaf.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub state_tree_path_elements: Vec<Fr>,
    /// Left/right bitmap of the state leaf path.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub state_tree_path_index: Vec<Fr>,
}

/// Witness for one full message batch, parallel arrays one entry per
/// message, plus the final random-leaf overwrite.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchUpdateStateTreeCircuitInputs {
    /// Coordinator public key `[x, y]`.
    #[serde_as(as = "[DecimalStr; 2]")]
    #[schemars(with = "[String; 2]")]
    pub coordinator_public_key: [Fr; 2],
    /// Coordinator private key after the pruned-buffer derivation.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub ecdh_private_key: Fr,
    /// Ephemeral public key per message.
    #[serde_as(as = "Vec<[DecimalStr; 2]>")]
    #[schemars(with = "Vec<[String; 2]>")]
    pub ecdh_public_keys: Vec<[Fr; 2]>,
    /// Raw message per message.
    #[serde_as(as = "Vec<[DecimalStr; 11]>")]
    #[schemars(with = "Vec<[String; 11]>")]
    pub messages: Vec<[Fr; MESSAGE_LENGTH]>,
    /// Message tree root, shared by the whole batch.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub msg_tree_root: Fr,
    /// Message leaf sibling path per message.
    #[serde_as(as = "Vec<Vec<DecimalStr>>")]
    #[schemars(with = "Vec<Vec<String>>")]
    pub msg_tree_path_elements: Vec<Vec<Fr>>,
    /// First message index of the batch.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub msg_tree_batch_start_index: Fr,
    /// State tree root before each message.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub state_tree_roots: Vec<Fr>,
    /// State leaf sibling path per message.
    #[serde_as(as = "Vec<Vec<DecimalStr>>")]
    #[schemars(with = "Vec<Vec<String>>")]
    pub state_tree_path_elements: Vec<Vec<Fr>>,
    /// State leaf path bitmap per message.
    #[serde_as(as = "Vec<Vec<DecimalStr>>")]
    #[schemars(with = "Vec<Vec<String>>")]
    pub state_tree_path_index: Vec<Vec<Fr>>,
    /// Addressed state leaf data per message.
    #[serde_as(as = "Vec<[DecimalStr; 5]>")]
    #[schemars(with = "Vec<[String; 5]>")]
    pub state_tree_data_raw: Vec<[Fr; STATE_LEAF_LENGTH]>,
    /// Highest filled state leaf index.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub state_tree_max_leaf_index: Fr,
    /// Previous vote weight per message.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub vote_options_leaf_raw: Vec<Fr>,
    /// Addressed vote option tree root per message.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub vote_options_tree_roots: Vec<Fr>,
    /// Vote option sibling path per message.
    #[serde_as(as = "Vec<Vec<DecimalStr>>")]
    #[schemars(with = "Vec<Vec<String>>")]
    pub vote_options_tree_path_elements: Vec<Vec<Fr>>,
    /// Vote option path bitmap per message.
    #[serde_as(as = "Vec<Vec<DecimalStr>>")]
    #[schemars(with = "Vec<Vec<String>>")]
    pub vote_options_tree_path_index: Vec<Vec<Fr>>,
    /// Highest permitted vote option index.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub vote_options_max_leaf_index: Fr,
    /// Hash of the random leaf written to slot zero after the batch.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub random_leaf: Fr,
    /// Sibling path of slot zero at overwrite time.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub random_leaf_path_elements: Vec<Fr>,
    /// Left/right bitmap of the slot-zero path.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub random_leaf_path_index: Vec<Fr>,
    /// State tree root after the batch and the random-leaf overwrite.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub new_state_tree_root: Fr,
}

/// Witness for tallying one batch of state leaves.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuadVoteTallyCircuitInputs {
    /// Vote vectors of the batch, one per state leaf position.
    #[serde_as(as = "Vec<Vec<DecimalStr>>")]
    #[schemars(with = "Vec<Vec<String>>")]
    pub vote_leaves: Vec<Vec<Fr>>,
    /// Unhashed state leaves of the batch.
    #[serde_as(as = "Vec<[DecimalStr; 5]>")]
    #[schemars(with = "Vec<[String; 5]>")]
    pub state_leaves: Vec<[Fr; STATE_LEAF_LENGTH]>,
    /// The authoritative state root the batch is proven against.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub full_state_root: Fr,
    /// Root of the current batch's subtree.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub intermediate_state_root: Fr,
    /// Sibling path of the batch root inside the intermediate tree.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub intermediate_path_elements: Vec<Fr>,
    /// Left/right bitmap of the intermediate path.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub intermediate_path_index: Vec<Fr>,
    /// Vote sums over every user before this batch.
    #[serde_as(as = "Vec<DecimalStr>")]
    #[schemars(with = "Vec<String>")]
    pub current_results: Vec<Fr>,
    /// `H(current_results || current_results_salt)`.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub current_results_commitment: Fr,
    /// Salt of the running-results commitment.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub current_results_salt: Fr,
    /// Salt for the commitment to the updated results.
    #[serde_as(as = "DecimalStr")]
    #[schemars(with = "String")]
    pub new_results_salt: Fr,
}

impl MaciState {
    /// Build the witness for the state transition of message `index`.
    ///
    /// # Errors
    /// Returns a [`WitnessError`] when the index addresses no published
    /// message or tree reconstruction fails.
    pub fn gen_update_state_tree_circuit_inputs(
        &self,
        index: usize,
    ) -> Result<UpdateStateTreeCircuitInputs, WitnessError> {
        let message = *self.messages.get(index).ok_or(
            WitnessError::MessageIndexOutOfRange {
                index,
                count: self.messages.len(),
            },
        )?;
        let enc_pub_key = *self.enc_pub_keys.get(index).ok_or(
            WitnessError::MessageIndexOutOfRange {
                index,
                count: self.enc_pub_keys.len(),
            },
        )?;
        let (command, _signature) = message.decrypt(self.shared_key(index));

        let message_tree = self.gen_message_tree()?;
        let msg_path = message_tree.path(index)?;

        let state_tree = self.gen_state_tree()?;
        let leaf_position = fr_to_u64(&command.state_index)
            .and_then(|value| usize::try_from(value).ok())
            .filter(|position| (1..=self.users.len()).contains(position))
            .unwrap_or(0);
        let state_path = state_tree.path(leaf_position)?;
        let (leaf, votes) = self.leaf_record(leaf_position)?;

        let option_index = fr_to_u64(&command.vote_option_index)
            .filter(|&option| option <= self.config.max_vote_option_index())
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or(0);
        let vote_tree = vote_tree_from(&votes, self.config.vote_option_tree_depth())?;
        let vote_path = vote_tree.path(option_index)?;
        let previous_weight = votes.get(option_index).copied().unwrap_or_else(Fr::zero);

        Ok(UpdateStateTreeCircuitInputs {
            coordinator_public_key: self.coordinator.pub_key.to_field_elements(),
            ecdh_private_key: self.coordinator.priv_key.formatted_scalar_as_field(),
            ecdh_public_key: enc_pub_key.to_field_elements(),
            message: message.to_field_elements(),
            msg_tree_root: message_tree.root(),
            msg_tree_path_elements: msg_path.siblings.clone(),
            msg_tree_path_index: path_bits(&msg_path),
            vote_options_leaf_raw: previous_weight,
            vote_options_tree_root: vote_tree.root(),
            vote_options_tree_path_elements: vote_path.siblings.clone(),
            vote_options_tree_path_index: path_bits(&vote_path),
            vote_options_max_leaf_index: Fr::from(self.config.max_vote_option_index()),
            state_tree_data_raw: leaf.to_field_elements(),
            state_tree_max_leaf_index: fr_from_usize(self.users.len()),
            state_tree_root: state_tree.root(),
            state_tree_path_elements: state_path.siblings.clone(),
            state_tree_path_index: path_bits(&state_path),
        })
    }

    /// Build the witness for one full message batch.
    ///
    /// Works on a deep clone: each message's per-transition witness is
    /// captured against the clone *before* the message is applied to it.
    /// After the batch, `random_state_leaf` is hashed into slot zero and
    /// the overwrite path recorded.
    ///
    /// # Errors
    /// Returns a [`WitnessError`] when the batch start is unaligned,
    /// addresses no messages, or tree reconstruction fails.
    pub fn gen_batch_update_state_tree_circuit_inputs(
        &self,
        start_index: usize,
        random_state_leaf: &StateLeaf,
    ) -> Result<BatchUpdateStateTreeCircuitInputs, WitnessError> {
        let batch_size = self.config.message_batch_size();
        if start_index % batch_size != 0 {
            return Err(WitnessError::UnalignedBatchStart {
                start_index,
                batch_size,
            });
        }

        let mut forked = self.clone();
        let mut transitions = Vec::with_capacity(batch_size);
        for index in start_index..start_index.saturating_add(batch_size) {
            if index >= forked.messages.len() {
                break;
            }
            transitions.push(forked.gen_update_state_tree_circuit_inputs(index)?);
            forked.apply_message(index);
        }
        if transitions.is_empty() {
            return Err(WitnessError::EmptyBatch { start_index });
        }

        let mut state_tree = forked.gen_state_tree()?;
        let overwrite_path = state_tree.path(0)?;
        state_tree.update(0, random_state_leaf.hash())?;

        let first = transitions
            .first()
            .cloned()
            .ok_or(WitnessError::EmptyBatch { start_index })?;
        Ok(BatchUpdateStateTreeCircuitInputs {
            coordinator_public_key: first.coordinator_public_key,
            ecdh_private_key: first.ecdh_private_key,
            ecdh_public_keys: transitions.iter().map(|t| t.ecdh_public_key).collect(),
            messages: transitions.iter().map(|t| t.message).collect(),
            msg_tree_root: first.msg_tree_root,
            msg_tree_path_elements: transitions
                .iter()
                .map(|t| t.msg_tree_path_elements.clone())
                .collect(),
            msg_tree_batch_start_index: fr_from_usize(start_index),
            state_tree_roots: transitions.iter().map(|t| t.state_tree_root).collect(),
            state_tree_path_elements: transitions
                .iter()
                .map(|t| t.state_tree_path_elements.clone())
                .collect(),
            state_tree_path_index: transitions
                .iter()
                .map(|t| t.state_tree_path_index.clone())
                .collect(),
            state_tree_data_raw: transitions.iter().map(|t| t.state_tree_data_raw).collect(),
            state_tree_max_leaf_index: first.state_tree_max_leaf_index,
            vote_options_leaf_raw: transitions.iter().map(|t| t.vote_options_leaf_raw).collect(),
            vote_options_tree_roots: transitions
                .iter()
                .map(|t| t.vote_options_tree_root)
                .collect(),
            vote_options_tree_path_elements: transitions
                .iter()
                .map(|t| t.vote_options_tree_path_elements.clone())
                .collect(),
            vote_options_tree_path_index: transitions
                .iter()
                .map(|t| t.vote_options_tree_path_index.clone())
                .collect(),
            vote_options_max_leaf_index: first.vote_options_max_leaf_index,
            random_leaf: random_state_leaf.hash(),
            random_leaf_path_elements: overwrite_path.siblings.clone(),
            random_leaf_path_index: path_bits(&overwrite_path),
            new_state_tree_root: state_tree.root(),
        })
    }

    /// Build the witness for tallying the batch of state leaves starting
    /// at `start_index`.
    ///
    /// # Errors
    /// Returns a [`WitnessError`] when the start is unaligned or out of
    /// range, or when the intermediate tree disagrees with the state root.
    pub fn gen_quad_vote_tally_circuit_inputs(
        &self,
        start_index: usize,
        current_results_salt: Fr,
        new_results_salt: Fr,
    ) -> Result<QuadVoteTallyCircuitInputs, WitnessError> {
        let batch_size = self.config.tally_batch_size();
        if start_index % batch_size != 0 {
            return Err(WitnessError::UnalignedBatchStart {
                start_index,
                batch_size,
            });
        }
        let leaf_count = self.users.len().saturating_add(1);
        if start_index >= leaf_count {
            return Err(WitnessError::BatchStartOutOfRange {
                start_index,
                leaf_count,
            });
        }

        let vote_depth = self.config.vote_option_tree_depth();
        let batch_depth = self.config.tally_batch_tree_depth();
        let blank_hash = StateLeaf::blank(vote_depth)?.hash();

        // One subtree root per batch of state leaves; empty batches are
        // the zero value of the intermediate tree.
        let empty_batch_root = empty_root(batch_depth, blank_hash)?;
        let mut intermediate =
            IncrementalMerkleTree::new(self.config.intermediate_tree_depth(), empty_batch_root)?;
        for batch_start in (0..leaf_count).step_by(batch_size) {
            let mut subtree = IncrementalMerkleTree::new(batch_depth, blank_hash)?;
            for position in batch_start..batch_start.saturating_add(batch_size) {
                if position < leaf_count {
                    let (record, _votes) = self.leaf_record(position)?;
                    subtree.insert(record.hash())?;
                }
            }
            intermediate.insert(subtree.root())?;
        }

        let current_batch = start_index / batch_size;
        let intermediate_path = intermediate.path(current_batch)?;
        let intermediate_root = intermediate
            .leaves()
            .get(current_batch)
            .copied()
            .ok_or(WitnessError::BatchStartOutOfRange {
                start_index,
                leaf_count,
            })?;

        let full_state_root = self.gen_state_root()?;
        if intermediate.root() != full_state_root {
            return Err(WitnessError::RootMismatch {
                expected: full_state_root,
                actual: intermediate.root(),
            });
        }

        let mut state_leaves = Vec::with_capacity(batch_size);
        let mut vote_leaves = Vec::with_capacity(batch_size);
        for position in start_index..start_index.saturating_add(batch_size) {
            let (record, votes) = self.leaf_record(position)?;
            state_leaves.push(record.to_field_elements());
            vote_leaves.push(votes);
        }

        let current_results = self.compute_cumulative_vote_tally(start_index);
        let current_results_commitment = commit_to_results(&current_results, current_results_salt);

        Ok(QuadVoteTallyCircuitInputs {
            vote_leaves,
            state_leaves,
            full_state_root,
            intermediate_state_root: intermediate_root,
            intermediate_path_elements: intermediate_path.siblings.clone(),
            intermediate_path_index: path_bits(&intermediate_path),
            current_results,
            current_results_commitment,
            current_results_salt,
            new_results_salt,
        })
    }

    /// The state leaf and vote vector at a state tree position. Position
    /// zero is the zeroth leaf with an all-zero vote vector; positions
    /// past the signed-up users read as blank.
    fn leaf_record(&self, position: usize) -> Result<(StateLeaf, Vec<Fr>), TreeError> {
        let vote_depth = self.config.vote_option_tree_depth();
        let zero_votes = || vec![Fr::zero(); self.config.num_vote_options()];
        if position == 0 {
            return Ok((self.zeroth_state_leaf, zero_votes()));
        }
        match self.users.get(position - 1) {
            Some(user) => Ok((user.as_state_leaf(vote_depth)?, user.votes.clone())),
            None => Ok((StateLeaf::blank(vote_depth)?, zero_votes())),
        }
    }
}

/// Commit to a results vector: `H(results || salt)`.
#[must_use]
pub fn commit_to_results(results: &[Fr], salt: Fr) -> Fr {
    let mut preimage = Vec::with_capacity(results.len().saturating_add(1));
    preimage.extend_from_slice(results);
    preimage.push(salt);
    maci_crypto::hashing::hash_many(&preimage)
}

/// Build a vote option tree from a vote vector.
fn vote_tree_from(votes: &[Fr], depth: usize) -> Result<IncrementalMerkleTree, TreeError> {
    let mut tree = IncrementalMerkleTree::new(depth, Fr::zero())?;
    for vote in votes {
        tree.insert(*vote)?;
    }
    Ok(tree)
}

/// A path's left/right bitmap as field elements.
fn path_bits(path: &MerklePath) -> Vec<Fr> {
    path.indices.iter().map(|bit| Fr::from(*bit)).collect()
}

/// A `usize` lifted into the field.
fn fr_from_usize(value: usize) -> Fr {
    Fr::from(u64::try_from(value).expect("usize fits u64"))
}
