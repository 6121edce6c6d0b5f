//! Append-only incremental Merkle tree over the SNARK scalar field.
//!
//! The tree has a fixed depth and a configurable zero value: unfilled
//! leaves read as the zero value and unfilled inner nodes read as the
//! precomputed hash of two empty children, so the root of a sparsely
//! filled tree never requires materializing the empty region. Filled
//! nodes are stored per level, which keeps `insert` and `update` at one
//! hash per level and lets path extraction read siblings directly.

#![allow(
    clippy::indexing_slicing,
    reason = "Level and node indices are bounded by the validated depth and leaf count"
)]
#![allow(
    clippy::arithmetic_side_effects,
    reason = "Index arithmetic is bounded by 2^depth with depth <= 32"
)]

use ark_bn254::Fr;
use maci_crypto::hashing::hash_left_right;
use thiserror::Error;

/// Deepest supported tree.
pub const MAX_TREE_DEPTH: usize = 32;

/// Errors raised by tree construction and mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The requested depth exceeds [`MAX_TREE_DEPTH`].
    #[error("tree depth {0} exceeds the supported maximum {MAX_TREE_DEPTH}")]
    DepthOutOfRange(usize),

    /// Every leaf slot is already filled.
    #[error("tree is full at {0} leaves")]
    Full(usize),

    /// The index does not address a filled leaf.
    #[error("leaf index {index} is not filled (next free index is {next_index})")]
    LeafNotFilled {
        /// The offending index.
        index: usize,
        /// The first unfilled index.
        next_index: usize,
    },
}

/// A Merkle authentication path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    /// Sibling hash per level, leaf level first.
    pub siblings: Vec<Fr>,
    /// Left/right bitmap per level: 0 when the addressed node is the left
    /// child, 1 when it is the right child.
    pub indices: Vec<u8>,
}

impl MerklePath {
    /// Fold a leaf up the path to the root it authenticates against.
    #[must_use]
    pub fn compute_root(&self, leaf: Fr) -> Fr {
        self.siblings
            .iter()
            .zip(&self.indices)
            .fold(leaf, |node, (sibling, bit)| {
                if *bit == 0 {
                    hash_left_right(node, *sibling)
                } else {
                    hash_left_right(*sibling, node)
                }
            })
    }
}

/// Compute the root of a depth-`depth` tree whose every leaf is `zero_value`.
///
/// # Errors
/// Returns [`TreeError::DepthOutOfRange`] for unsupported depths.
pub fn empty_root(depth: usize, zero_value: Fr) -> Result<Fr, TreeError> {
    if depth > MAX_TREE_DEPTH {
        return Err(TreeError::DepthOutOfRange(depth));
    }
    let mut node = zero_value;
    for _ in 0..depth {
        node = hash_left_right(node, node);
    }
    Ok(node)
}

/// A fixed-depth binary Merkle tree with zero-subtree caching.
///
/// `Clone` is the deep copy: the clone and the original never share
/// mutable state.
#[derive(Debug, Clone)]
pub struct IncrementalMerkleTree {
    depth: usize,
    zero_value: Fr,
    /// Empty-subtree hash per level; `zeros[0]` is the empty leaf and
    /// `zeros[depth]` the root of a fully empty tree.
    zeros: Vec<Fr>,
    /// Filled nodes per level; `levels[0]` are the leaves and
    /// `levels[depth]` holds the root once any leaf is filled.
    levels: Vec<Vec<Fr>>,
}

impl IncrementalMerkleTree {
    /// Create an empty tree.
    ///
    /// Depth zero is the degenerate single-slot tree whose root is its one
    /// leaf; the tally builder uses it when a single batch spans the whole
    /// state tree.
    ///
    /// # Errors
    /// Returns [`TreeError::DepthOutOfRange`] for unsupported depths.
    pub fn new(depth: usize, zero_value: Fr) -> Result<Self, TreeError> {
        if depth > MAX_TREE_DEPTH {
            return Err(TreeError::DepthOutOfRange(depth));
        }
        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(zero_value);
        for level in 0..depth {
            let child = zeros[level];
            zeros.push(hash_left_right(child, child));
        }
        Ok(Self {
            depth,
            zero_value,
            zeros,
            levels: vec![Vec::new(); depth + 1],
        })
    }

    /// The tree depth.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// The configured empty-leaf value.
    #[must_use]
    pub const fn zero_value(&self) -> Fr {
        self.zero_value
    }

    /// Total number of leaf slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        1_usize << self.depth
    }

    /// The index the next `insert` will fill.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.levels[0].len()
    }

    /// The filled leaves, in insertion order.
    #[must_use]
    pub fn leaves(&self) -> &[Fr] {
        &self.levels[0]
    }

    /// The current root.
    #[must_use]
    pub fn root(&self) -> Fr {
        self.node(self.depth, 0)
    }

    /// Append a leaf at the next free index.
    ///
    /// # Errors
    /// Returns [`TreeError::Full`] when every slot is filled.
    pub fn insert(&mut self, leaf: Fr) -> Result<(), TreeError> {
        let index = self.next_index();
        if index == self.capacity() {
            return Err(TreeError::Full(index));
        }
        self.levels[0].push(leaf);
        self.refresh_ancestors(index);
        Ok(())
    }

    /// Overwrite a previously filled leaf.
    ///
    /// # Errors
    /// Returns [`TreeError::LeafNotFilled`] when `index` has not been
    /// inserted yet.
    pub fn update(&mut self, index: usize, leaf: Fr) -> Result<(), TreeError> {
        if index >= self.next_index() {
            return Err(TreeError::LeafNotFilled {
                index,
                next_index: self.next_index(),
            });
        }
        self.levels[0][index] = leaf;
        self.refresh_ancestors(index);
        Ok(())
    }

    /// The sibling path and left/right bitmap for a filled leaf, valid for
    /// a subsequent [`IncrementalMerkleTree::update`] at the same index.
    ///
    /// # Errors
    /// Returns [`TreeError::LeafNotFilled`] when `index` has not been
    /// inserted yet.
    pub fn path(&self, index: usize) -> Result<MerklePath, TreeError> {
        if index >= self.next_index() {
            return Err(TreeError::LeafNotFilled {
                index,
                next_index: self.next_index(),
            });
        }
        let mut siblings = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);
        let mut idx = index;
        for level in 0..self.depth {
            siblings.push(self.node(level, idx ^ 1));
            indices.push(if idx & 1 == 0 { 0 } else { 1 });
            idx /= 2;
        }
        Ok(MerklePath { siblings, indices })
    }

    /// Read a node, falling back to the empty-subtree hash of its level.
    fn node(&self, level: usize, index: usize) -> Fr {
        self.levels[level]
            .get(index)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    /// Recompute the ancestors of a changed leaf, one node per level.
    ///
    /// Leaves fill left to right, so a parent's slot is either already
    /// stored or the next free slot of its level.
    fn refresh_ancestors(&mut self, leaf_index: usize) {
        let mut idx = leaf_index;
        for level in 0..self.depth {
            let parent = idx / 2;
            let node = hash_left_right(self.node(level, parent * 2), self.node(level, parent * 2 + 1));
            let row = &mut self.levels[level + 1];
            if parent < row.len() {
                row[parent] = node;
            } else {
                row.push(node);
            }
            idx = parent;
        }
    }
}
