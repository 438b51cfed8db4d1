//! Tree geometry and evaluator configuration.

use std::time::Duration;

use crate::address::{self, GROUP_BITS, WORD_BITS};
use crate::error::{Error, Result};

/// Deepest tree whose RAM-row encoding fits one register group.
pub const MAX_LEVELS: u32 = 16;

/// Declared shape of a tree and of the records it classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Number of distinct fields in a record.
    pub num_fields: u32,
    /// Bit width of every field value (and of every stored node value).
    pub num_bits_per_field: u32,
    /// Number of levels, leaves included.
    pub num_levels: u32,
}

impl TreeConfig {
    pub fn new(num_fields: u32, num_bits_per_field: u32, num_levels: u32) -> Self {
        Self {
            num_fields,
            num_bits_per_field,
            num_levels,
        }
    }

    /// Check the shape against the fixed word and register widths and
    /// derive the quantities every other component needs.
    pub fn validate(&self) -> Result<TreeLayout> {
        if self.num_fields == 0 {
            return Err(Error::out_of_range("num_fields", 0u32, 1u32));
        }
        if self.num_levels == 0 {
            return Err(Error::out_of_range("num_levels", 0u32, 1u32));
        }
        if self.num_bits_per_field == 0 || self.num_bits_per_field > WORD_BITS {
            return Err(Error::UnsupportedWidth {
                what: "num_bits_per_field",
                requested: self.num_bits_per_field,
                max: WORD_BITS,
            });
        }
        if self.num_levels > MAX_LEVELS {
            return Err(Error::UnsupportedWidth {
                what: "address group",
                requested: address::address_total_bits(self.num_levels),
                max: GROUP_BITS,
            });
        }

        let record_bits = u64::from(self.num_fields) * u64::from(self.num_bits_per_field);
        if record_bits > u64::from(WORD_BITS) {
            return Err(Error::UnsupportedWidth {
                what: "input record",
                requested: record_bits.min(u64::from(u32::MAX)) as u32,
                max: WORD_BITS,
            });
        }

        let field_index_width = address::field_index_width(self.num_fields);
        let value_bits = address::sliced_total_bits(self.num_levels, self.num_bits_per_field);
        if value_bits > GROUP_BITS {
            return Err(Error::UnsupportedWidth {
                what: "node value group",
                requested: value_bits,
                max: GROUP_BITS,
            });
        }
        let field_bits = address::sliced_total_bits(self.num_levels, field_index_width);
        if field_bits > GROUP_BITS {
            return Err(Error::UnsupportedWidth {
                what: "field index group",
                requested: field_bits,
                max: GROUP_BITS,
            });
        }

        Ok(TreeLayout {
            config: *self,
            field_index_width,
            address_bits: address::address_total_bits(self.num_levels),
            field_bits,
            value_bits,
            node_count: address::node_count(self.num_levels),
            first_leaf: address::first_leaf(self.num_levels),
        })
    }
}

/// Quantities derived once from a validated [`TreeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLayout {
    pub config: TreeConfig,
    /// Bits per stored field index.
    pub field_index_width: u32,
    /// Used width of the address (RAM-row) group.
    pub address_bits: u32,
    /// Used width of the field index group.
    pub field_bits: u32,
    /// Used width of the node value group.
    pub value_bits: u32,
    pub node_count: u32,
    pub first_leaf: u32,
}

impl TreeLayout {
    #[inline]
    pub fn num_fields(&self) -> u32 {
        self.config.num_fields
    }

    #[inline]
    pub fn num_bits_per_field(&self) -> u32 {
        self.config.num_bits_per_field
    }

    #[inline]
    pub fn num_levels(&self) -> u32 {
        self.config.num_levels
    }

    #[inline]
    pub fn is_leaf(&self, address: u32) -> bool {
        address >= self.first_leaf
    }

    /// Exclusive upper bound on node values.
    #[inline]
    pub fn value_bound(&self) -> u64 {
        1u64 << self.config.num_bits_per_field
    }

    /// Bounds-check a `(address, field_index, value)` triple.
    pub fn check_node(&self, address: u32, field_index: u32, value: u32) -> Result<()> {
        if address >= self.node_count {
            return Err(Error::out_of_range("address", address, self.node_count));
        }
        if field_index >= self.config.num_fields {
            return Err(Error::out_of_range("field_index", field_index, self.config.num_fields));
        }
        if u64::from(value) >= self.value_bound() {
            return Err(Error::out_of_range("value", value, self.value_bound()));
        }
        Ok(())
    }
}

/// Configuration for batch evaluation.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// How long `submit` waits for a streaming co-processor's results.
    pub submit_timeout: Duration,
    /// Batches queued towards a streaming co-processor before `submit` blocks.
    pub channel_capacity: usize,
    /// Records per block for the parallel reference search.
    pub block_size: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(5),
            channel_capacity: 4,
            block_size: 64,
        }
    }
}
