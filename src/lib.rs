//! # packed-dtree
//!
//! Complete binary decision trees packed into fixed-width register words,
//! searched either by a reference descent or by a pipelined batch evaluator.
//!
//! A tree of `L` levels has `2^L - 1` nodes in level order (root `0`, children
//! of `a` at `2a + 1` and `2a + 2`). Every internal node names one field of
//! the input record and a value; a record whose field equals the value goes
//! left, anything else goes right. The leaf address reached is the result.
//!
//! Node loads are staged into three 128-bit register groups (node value,
//! field index, RAM row) with one slot per level, earliest level in the
//! highest bits. See [`address`] for the exact layout.
//!
//! ## Example
//!
//! ```rust
//! use packed_dtree::{DecisionTree, Record, TreeConfig};
//!
//! // 2 fields of 4 bits, 2 levels: a root and two leaves.
//! let mut tree = DecisionTree::new(TreeConfig::new(2, 4, 2)).unwrap();
//! tree.load(0, 1, 5).unwrap();
//!
//! let record: Record = [(0, 3), (1, 5)].into_iter().collect();
//! let words = tree.prepare(&[record]).unwrap();
//! assert_eq!(words, vec![0x35]);
//!
//! assert_eq!(tree.search_reference(&words), vec![1]);
//! assert_eq!(tree.search_pipelined(&words).unwrap(), vec![1]);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod address;
pub mod codec;
pub mod config;
pub mod coproc;
pub mod error;
pub mod search;
pub mod store;
pub mod tree;

pub use codec::{BatchCodec, Record};
pub use config::{EvaluatorConfig, TreeConfig, TreeLayout};
pub use coproc::{CoProcessor, PipelinedEvaluator, StreamCoProcessor};
pub use error::{Error, Result};
pub use search::{BatchEvaluator, SearchStrategy, Traversal};
pub use store::{Node, PackedTreeStore, RegisterFile, SharedTree, StagedSlot};
pub use tree::DecisionTree;


#[cfg(test)]
mod proptests;
