//! Batch encoding of input records.
//!
//! One record becomes one 32-bit word with its fields concatenated in catalog
//! order, field 0 in the highest bits:
//!
//! ```text
//! num_fields = 3, num_bits_per_field = 4
//!
//!   bit 11      8 7       4 3       0
//!      | field 0 | field 1 | field 2 |
//! ```

use std::collections::BTreeMap;

use crate::config::TreeLayout;
use crate::error::{Error, Result};

/// Sparse record: field index to value. Absent fields encode as zero.
pub type Record = BTreeMap<u32, u32>;

/// Encodes record batches for one tree shape.
#[derive(Debug, Clone, Copy)]
pub struct BatchCodec {
    num_fields: u32,
    num_bits_per_field: u32,
}

impl BatchCodec {
    pub fn new(layout: &TreeLayout) -> Self {
        Self {
            num_fields: layout.num_fields(),
            num_bits_per_field: layout.num_bits_per_field(),
        }
    }

    #[inline]
    fn shift(&self, field_index: u32) -> u32 {
        (self.num_fields - 1 - field_index) * self.num_bits_per_field
    }

    #[inline]
    fn value_mask(&self) -> u64 {
        (1u64 << self.num_bits_per_field) - 1
    }

    fn check(&self, field_index: u32, value: u32) -> Result<()> {
        if field_index >= self.num_fields {
            return Err(Error::out_of_range("field_index", field_index, self.num_fields));
        }
        if u64::from(value) > self.value_mask() {
            return Err(Error::out_of_range("value", value, self.value_mask() + 1));
        }
        Ok(())
    }

    /// Pack one record.
    pub fn encode_record(&self, record: &Record) -> Result<u32> {
        let mut word = 0u64;
        for (&field_index, &value) in record {
            self.check(field_index, value)?;
            word |= u64::from(value) << self.shift(field_index);
        }
        Ok(word as u32)
    }

    /// Pack one dense record whose `i`-th element is field `i`.
    pub fn encode_values(&self, values: &[u32]) -> Result<u32> {
        if values.len() > self.num_fields as usize {
            return Err(Error::out_of_range(
                "num_values",
                values.len() as u64,
                u64::from(self.num_fields) + 1,
            ));
        }
        let mut word = 0u64;
        for (field_index, &value) in values.iter().enumerate() {
            let field_index = field_index as u32;
            self.check(field_index, value)?;
            word |= u64::from(value) << self.shift(field_index);
        }
        Ok(word as u32)
    }

    /// Pack a batch, one word per record, in input order.
    ///
    /// The whole batch is validated; nothing is returned on error.
    pub fn encode(&self, records: &[Record]) -> Result<Vec<u32>> {
        records.iter().map(|r| self.encode_record(r)).collect()
    }

    /// Value of `field_index` inside an encoded record.
    #[inline]
    pub fn field_value(&self, word: u32, field_index: u32) -> u32 {
        debug_assert!(field_index < self.num_fields);
        ((u64::from(word) >> self.shift(field_index)) & self.value_mask()) as u32
    }

    /// Unpack every field of an encoded record.
    pub fn decode_record(&self, word: u32) -> Vec<u32> {
        (0..self.num_fields).map(|f| self.field_value(word, f)).collect()
    }

    /// Result words are already leaf addresses.
    pub fn decode_results(&self, words: &[u32]) -> Vec<u32> {
        words.to_vec()
    }
}
