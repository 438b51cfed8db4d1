//! Search strategies.
//!
//! Both strategies take a [`PackedTreeStore`] and a batch of encoded records
//! and return one leaf address per record, in input order:
//!
//! - [`Traversal`] walks the store's node table directly, one record at a
//!   time (optionally spread over rayon workers);
//! - [`BatchEvaluator`] hands the whole batch to a [`CoProcessor`] that holds
//!   its own mirror of the tree, resynchronising that mirror first whenever
//!   the store has changed since it was last mirrored.
//!
//! For any tree and batch the two produce identical results.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::codec::BatchCodec;
use crate::coproc::CoProcessor;
use crate::error::{Error, Result};
use crate::store::PackedTreeStore;

/// Common contract of the search strategies.
pub trait SearchStrategy {
    fn search(&mut self, store: &PackedTreeStore, words: &[u32]) -> Result<Vec<u32>>;
}

// =============================================================================
// Reference traversal
// =============================================================================

/// Reference descent over the node table.
#[derive(Debug, Clone, Copy)]
pub struct Traversal {
    block_size: usize,
}

impl Default for Traversal {
    fn default() -> Self {
        Self::new()
    }
}

impl Traversal {
    pub fn new() -> Self {
        Self { block_size: 0 }
    }

    /// Search blocks of `block_size` records in parallel.
    pub fn parallel(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    /// Leaf reached by one encoded record.
    ///
    /// At each internal node the record's field named by the node is compared
    /// with the node's value: equal descends to `2a + 1`, otherwise `2a + 2`.
    /// The walk takes exactly `num_levels - 1` steps.
    #[inline]
    pub fn leaf_for(store: &PackedTreeStore, codec: &BatchCodec, word: u32) -> u32 {
        let first_leaf = store.layout().first_leaf;
        let mut address = 0u32;
        while address < first_leaf {
            let node = store.node_unchecked(address);
            address = if codec.field_value(word, node.field_index) == node.value {
                2 * address + 1
            } else {
                2 * address + 2
            };
        }
        address
    }

    /// Sequential search over a batch.
    pub fn search_batch(store: &PackedTreeStore, words: &[u32]) -> Vec<u32> {
        let codec = BatchCodec::new(store.layout());
        words
            .iter()
            .map(|&w| Self::leaf_for(store, &codec, w))
            .collect()
    }

    /// Block-parallel search; result order matches `words`.
    pub fn par_search_batch(store: &PackedTreeStore, words: &[u32], block_size: usize) -> Vec<u32> {
        let codec = BatchCodec::new(store.layout());
        words
            .par_chunks(block_size.max(1))
            .flat_map_iter(|block| block.iter().map(|&w| Self::leaf_for(store, &codec, w)))
            .collect()
    }
}

impl SearchStrategy for Traversal {
    fn search(&mut self, store: &PackedTreeStore, words: &[u32]) -> Result<Vec<u32>> {
        if self.block_size == 0 {
            Ok(Self::search_batch(store, words))
        } else {
            Ok(Self::par_search_batch(store, words, self.block_size))
        }
    }
}

// =============================================================================
// Pipelined batch evaluation
// =============================================================================

/// Evaluates batches on a co-processor that mirrors one store.
#[derive(Debug)]
pub struct BatchEvaluator<C> {
    coproc: C,
    /// Store generation the co-processor currently reflects.
    mirrored: Option<u64>,
}

impl<C: CoProcessor> BatchEvaluator<C> {
    pub fn new(coproc: C) -> Self {
        Self {
            coproc,
            mirrored: None,
        }
    }

    pub fn coprocessor(&self) -> &C {
        &self.coproc
    }

    /// Whether the co-processor reflects `store` as it is now.
    pub fn is_synced(&self, store: &PackedTreeStore) -> bool {
        self.mirrored == Some(store.generation())
    }

    /// Load a node into `store` and, if the mirror is current, into the
    /// co-processor as well. A stale mirror is left for [`Self::sync`].
    pub fn load(&mut self, store: &mut PackedTreeStore, address: u32, field_index: u32, value: u32) -> Result<()> {
        let was_synced = self.is_synced(store);
        store.load(address, field_index, value)?;
        if was_synced {
            self.mirrored = None;
            self.coproc.configure(address, field_index, value)?;
            self.mirrored = Some(store.generation());
        }
        Ok(())
    }

    /// Reset the co-processor and replay every loaded node of `store`.
    pub fn sync(&mut self, store: &PackedTreeStore) -> Result<()> {
        self.mirrored = None;
        self.coproc.reset()?;
        let mut replayed = 0usize;
        for (address, node) in store.loaded_nodes() {
            self.coproc.configure(address, node.field_index, node.value)?;
            replayed += 1;
        }
        debug!(replayed, generation = store.generation(), "co-processor resynchronised");
        self.mirrored = Some(store.generation());
        Ok(())
    }

    /// Clear both the store and the co-processor.
    pub fn reset(&mut self, store: &mut PackedTreeStore) -> Result<()> {
        self.mirrored = None;
        store.reset();
        self.coproc.reset()?;
        self.mirrored = Some(store.generation());
        Ok(())
    }

    /// Submit `words` and wait for one result per word.
    pub fn evaluate(&mut self, store: &PackedTreeStore, words: &[u32]) -> Result<Vec<u32>> {
        if !self.is_synced(store) {
            warn!(generation = store.generation(), "co-processor mirror is stale");
            self.sync(store)?;
        }
        debug!(records = words.len(), "submitting batch");
        let results = self.coproc.submit(words)?;
        if results.len() != words.len() {
            return Err(Error::ResultLengthMismatch {
                expected: words.len(),
                actual: results.len(),
            });
        }
        Ok(results)
    }
}

impl<C: CoProcessor> SearchStrategy for BatchEvaluator<C> {
    fn search(&mut self, store: &PackedTreeStore, words: &[u32]) -> Result<Vec<u32>> {
        self.evaluate(store, words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Record;
    use crate::coproc::PipelinedEvaluator;

    fn evaluator(store: &PackedTreeStore) -> BatchEvaluator<PipelinedEvaluator> {
        BatchEvaluator::new(PipelinedEvaluator::new(*store.layout()))
    }

    #[test]
    fn test_two_level_scenario() {
        let mut store = PackedTreeStore::new(2, 4, 2).unwrap();
        store.load(0, 1, 5).unwrap();

        let codec = BatchCodec::new(store.layout());
        let record: Record = [(0, 3), (1, 5)].into_iter().collect();
        let words = codec.encode(&[record]).unwrap();
        assert_eq!(words, vec![0x35]);

        assert_eq!(Traversal::search_batch(&store, &words), vec![1]);
        assert_eq!(evaluator(&store).evaluate(&store, &words).unwrap(), vec![1]);
    }

    #[test]
    fn test_single_level_returns_root() {
        let store = PackedTreeStore::new(3, 4, 1).unwrap();
        let words = [0u32, 0xFFF, 0x123];
        assert_eq!(Traversal::search_batch(&store, &words), vec![0, 0, 0]);
        assert_eq!(evaluator(&store).evaluate(&store, &words).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_equality_not_threshold() {
        // Root tests field 0 == 8. Both 7 and 9 go right.
        let mut store = PackedTreeStore::new(1, 4, 2).unwrap();
        store.load(0, 0, 8).unwrap();
        assert_eq!(Traversal::search_batch(&store, &[7, 8, 9]), vec![2, 1, 2]);
    }

    #[test]
    fn test_three_level_paths() {
        // fields: 2 x 4 bits. Root: f0 == 1; left: f1 == 2; right: f1 == 3.
        let mut store = PackedTreeStore::new(2, 4, 3).unwrap();
        store.load(0, 0, 1).unwrap();
        store.load(1, 1, 2).unwrap();
        store.load(2, 1, 3).unwrap();

        let words = [0x12, 0x10, 0x03, 0x04];
        let expected = vec![3, 4, 5, 6];
        assert_eq!(Traversal::search_batch(&store, &words), expected);
        assert_eq!(Traversal::par_search_batch(&store, &words, 1), expected);
        assert_eq!(Traversal::parallel(3).search(&store, &words).unwrap(), expected);
        assert_eq!(evaluator(&store).search(&store, &words).unwrap(), expected);
    }

    #[test]
    fn test_write_through_and_resync() {
        let mut store = PackedTreeStore::new(2, 4, 3).unwrap();
        let mut ev = evaluator(&store);
        assert!(!ev.is_synced(&store));

        // First evaluate syncs an empty tree.
        assert_eq!(ev.evaluate(&store, &[0x00]).unwrap(), vec![3]);
        assert!(ev.is_synced(&store));

        // Write-through keeps the mirror current.
        ev.load(&mut store, 0, 0, 1).unwrap();
        assert!(ev.is_synced(&store));
        assert_eq!(ev.coprocessor().stage_node(0, 0).unwrap().value, 1);

        // A load behind the evaluator's back is caught before the next batch.
        store.load(2, 1, 3).unwrap();
        assert!(!ev.is_synced(&store));
        assert_eq!(ev.evaluate(&store, &[0x03]).unwrap(), vec![5]);
        assert!(ev.is_synced(&store));

        ev.reset(&mut store).unwrap();
        assert!(ev.is_synced(&store));
        assert_eq!(ev.evaluate(&store, &[0x03]).unwrap(), vec![3]);
    }

    #[test]
    fn test_failed_load_keeps_mirror() {
        let mut store = PackedTreeStore::new(2, 4, 2).unwrap();
        let mut ev = evaluator(&store);
        ev.sync(&store).unwrap();
        assert!(ev.load(&mut store, 5, 0, 0).is_err());
        assert!(ev.is_synced(&store));
    }

    struct Truncating;

    impl CoProcessor for Truncating {
        fn reset(&mut self) -> Result<()> {
            Ok(())
        }

        fn configure(&mut self, _: u32, _: u32, _: u32) -> Result<()> {
            Ok(())
        }

        fn submit(&mut self, words: &[u32]) -> Result<Vec<u32>> {
            Ok(words.iter().skip(1).copied().collect())
        }
    }

    #[test]
    fn test_length_mismatch_is_reported() {
        let store = PackedTreeStore::new(2, 4, 2).unwrap();
        let mut ev = BatchEvaluator::new(Truncating);
        assert_eq!(
            ev.evaluate(&store, &[1, 2, 3]),
            Err(Error::ResultLengthMismatch {
                expected: 3,
                actual: 2
            })
        );
    }
}
