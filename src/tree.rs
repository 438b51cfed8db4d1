//! One-stop handle: store, codec and co-processor kept in step.

use crate::codec::{BatchCodec, Record};
use crate::config::{EvaluatorConfig, TreeConfig};
use crate::coproc::{CoProcessor, PipelinedEvaluator, StreamCoProcessor};
use crate::error::Result;
use crate::search::{BatchEvaluator, Traversal};
use crate::store::{PackedTreeStore, RegisterFile};

/// A packed decision tree with both search strategies attached.
///
/// Build phase: [`DecisionTree::load`] each node. Query phase:
/// [`DecisionTree::prepare`] a batch, then search it with either
/// [`DecisionTree::search_reference`] or [`DecisionTree::search_pipelined`].
pub struct DecisionTree<C = PipelinedEvaluator> {
    store: PackedTreeStore,
    codec: BatchCodec,
    evaluator: BatchEvaluator<C>,
    config: EvaluatorConfig,
}

impl DecisionTree<PipelinedEvaluator> {
    /// Tree with an in-process pipelined evaluator.
    pub fn new(config: TreeConfig) -> Result<Self> {
        let store = PackedTreeStore::with_config(config)?;
        let coproc = PipelinedEvaluator::new(*store.layout());
        Self::from_parts(store, coproc, EvaluatorConfig::default())
    }
}

impl DecisionTree<StreamCoProcessor> {
    /// Tree whose pipelined evaluator runs on a worker thread, with
    /// `config.submit_timeout` on every co-processor call.
    pub fn streaming(config: TreeConfig, eval_config: EvaluatorConfig) -> Result<Self> {
        let store = PackedTreeStore::with_config(config)?;
        let coproc = StreamCoProcessor::spawn(PipelinedEvaluator::new(*store.layout()), &eval_config)?;
        Self::from_parts(store, coproc, eval_config)
    }
}

impl<C: CoProcessor> DecisionTree<C> {
    /// Tree mirrored into a caller-supplied co-processor.
    pub fn with_coprocessor(config: TreeConfig, coproc: C, eval_config: EvaluatorConfig) -> Result<Self> {
        Self::from_parts(PackedTreeStore::with_config(config)?, coproc, eval_config)
    }

    fn from_parts(store: PackedTreeStore, coproc: C, config: EvaluatorConfig) -> Result<Self> {
        let mut evaluator = BatchEvaluator::new(coproc);
        evaluator.sync(&store)?;
        Ok(Self {
            codec: BatchCodec::new(store.layout()),
            store,
            evaluator,
            config,
        })
    }

    pub fn store(&self) -> &PackedTreeStore {
        &self.store
    }

    pub fn codec(&self) -> &BatchCodec {
        &self.codec
    }

    /// Store a node and mirror it into the co-processor.
    pub fn load(&mut self, address: u32, field_index: u32, value: u32) -> Result<()> {
        self.evaluator.load(&mut self.store, address, field_index, value)
    }

    /// Clear the tree and the co-processor.
    pub fn reset(&mut self) -> Result<()> {
        self.evaluator.reset(&mut self.store)
    }

    /// Encode a batch of records.
    pub fn prepare(&self, records: &[Record]) -> Result<Vec<u32>> {
        self.codec.encode(records)
    }

    /// Reference search; parallel when the batch spans more than one block.
    pub fn search_reference(&self, words: &[u32]) -> Vec<u32> {
        if words.len() > self.config.block_size {
            Traversal::par_search_batch(&self.store, words, self.config.block_size)
        } else {
            Traversal::search_batch(&self.store, words)
        }
    }

    /// Search on the co-processor.
    pub fn search_pipelined(&mut self, words: &[u32]) -> Result<Vec<u32>> {
        self.evaluator.evaluate(&self.store, words)
    }

    pub fn read_raw(&self) -> &RegisterFile {
        self.store.read_raw()
    }

    pub fn dump_registers(&self) -> Vec<String> {
        self.store.dump_registers()
    }
}
