//! Immutable coordinator configuration.
//!
//! All tree depths and batch sizes are fixed at construction and validated
//! once; every other module treats them as trusted. The configuration is
//! part of the external contract (it pins the shapes of the circuit
//! inputs), so it serializes for operators but deliberately does not
//! deserialize: the only way to obtain a value is through the validating
//! constructor.

use maci_tree::MAX_TREE_DEPTH;
use schemars::JsonSchema;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by configuration validation. All fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A tree depth is outside `1..=MAX_TREE_DEPTH`.
    #[error("tree depth {0} is outside the supported range 1..={MAX_TREE_DEPTH}")]
    DepthOutOfRange(usize),

    /// A batch size is not a power of two.
    #[error("batch size {0} is not a power of two")]
    BatchSizeNotPowerOfTwo(usize),

    /// The tally batch does not fit the state tree.
    #[error("tally batch size {batch_size} exceeds the state tree capacity {capacity}")]
    BatchLargerThanStateTree {
        /// The offending batch size.
        batch_size: usize,
        /// Total state tree leaf slots.
        capacity: usize,
    },

    /// The highest permitted vote option does not fit the vote option tree.
    #[error(
        "max vote option index {max_index} does not fit a vote option tree of depth {depth}"
    )]
    VoteOptionIndexOutOfRange {
        /// The offending index bound.
        max_index: u64,
        /// The configured vote option tree depth.
        depth: usize,
    },
}

/// Immutable parameters of one coordinator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CoordinatorConfig {
    state_tree_depth: usize,
    message_tree_depth: usize,
    vote_option_tree_depth: usize,
    message_batch_size: usize,
    tally_batch_size: usize,
    max_vote_option_index: u64,
    initial_voice_credit_balance: u64,
}

impl CoordinatorConfig {
    /// Validate and freeze a configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when any depth is unsupported, a batch
    /// size is not a power of two, the tally batch exceeds the state tree,
    /// or the vote option bound does not fit its tree.
    #[allow(clippy::too_many_arguments, reason = "Plain constructor for seven scalars")]
    pub fn new(
        state_tree_depth: usize,
        message_tree_depth: usize,
        vote_option_tree_depth: usize,
        message_batch_size: usize,
        tally_batch_size: usize,
        max_vote_option_index: u64,
        initial_voice_credit_balance: u64,
    ) -> Result<Self, ConfigError> {
        for depth in [state_tree_depth, message_tree_depth, vote_option_tree_depth] {
            if depth == 0 || depth > MAX_TREE_DEPTH {
                return Err(ConfigError::DepthOutOfRange(depth));
            }
        }
        for batch_size in [message_batch_size, tally_batch_size] {
            if !batch_size.is_power_of_two() {
                return Err(ConfigError::BatchSizeNotPowerOfTwo(batch_size));
            }
        }
        let capacity = checked_pow2(state_tree_depth);
        if tally_batch_size > capacity {
            return Err(ConfigError::BatchLargerThanStateTree {
                batch_size: tally_batch_size,
                capacity,
            });
        }
        let num_vote_options = checked_pow2(vote_option_tree_depth);
        let bound_fits = usize::try_from(max_vote_option_index)
            .is_ok_and(|max_index| max_index < num_vote_options);
        if !bound_fits {
            return Err(ConfigError::VoteOptionIndexOutOfRange {
                max_index: max_vote_option_index,
                depth: vote_option_tree_depth,
            });
        }
        Ok(Self {
            state_tree_depth,
            message_tree_depth,
            vote_option_tree_depth,
            message_batch_size,
            tally_batch_size,
            max_vote_option_index,
            initial_voice_credit_balance,
        })
    }

    /// Depth of the state tree.
    #[must_use]
    pub const fn state_tree_depth(&self) -> usize {
        self.state_tree_depth
    }

    /// Depth of the message tree.
    #[must_use]
    pub const fn message_tree_depth(&self) -> usize {
        self.message_tree_depth
    }

    /// Depth of each per-user vote option tree.
    #[must_use]
    pub const fn vote_option_tree_depth(&self) -> usize {
        self.vote_option_tree_depth
    }

    /// Messages processed per batch.
    #[must_use]
    pub const fn message_batch_size(&self) -> usize {
        self.message_batch_size
    }

    /// State leaves tallied per batch.
    #[must_use]
    pub const fn tally_batch_size(&self) -> usize {
        self.tally_batch_size
    }

    /// Highest vote option index a command may address.
    #[must_use]
    pub const fn max_vote_option_index(&self) -> u64 {
        self.max_vote_option_index
    }

    /// Voice credits granted to every user at sign-up.
    #[must_use]
    pub const fn initial_voice_credit_balance(&self) -> u64 {
        self.initial_voice_credit_balance
    }

    /// Number of vote options, `2^vote_option_tree_depth`.
    #[must_use]
    pub fn num_vote_options(&self) -> usize {
        checked_pow2(self.vote_option_tree_depth)
    }

    /// Total state tree leaf slots.
    #[must_use]
    pub fn state_tree_capacity(&self) -> usize {
        checked_pow2(self.state_tree_depth)
    }

    /// Highest user count; slot zero is reserved for the zeroth leaf.
    #[must_use]
    pub fn max_users(&self) -> usize {
        self.state_tree_capacity().saturating_sub(1)
    }

    /// Highest message count.
    #[must_use]
    pub fn max_messages(&self) -> usize {
        checked_pow2(self.message_tree_depth)
    }

    /// Depth of one tally batch subtree, `log2(tally_batch_size)`.
    #[must_use]
    pub fn tally_batch_tree_depth(&self) -> usize {
        exact_log2(self.tally_batch_size)
    }

    /// Depth of the intermediate tree whose leaves are batch subtree roots.
    #[must_use]
    pub fn intermediate_tree_depth(&self) -> usize {
        self.state_tree_depth
            .saturating_sub(self.tally_batch_tree_depth())
    }
}

/// `2^exponent` for exponents validated against [`MAX_TREE_DEPTH`].
fn checked_pow2(exponent: usize) -> usize {
    1_usize
        .checked_shl(u32::try_from(exponent).expect("depth fits u32"))
        .expect("depth validated against MAX_TREE_DEPTH")
}

/// `log2` of a validated power of two.
fn exact_log2(value: usize) -> usize {
    usize::try_from(value.trailing_zeros()).expect("u32 fits usize")
}
