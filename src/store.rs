//! Packed tree storage.
//!
//! A [`PackedTreeStore`] keeps two views of the same tree:
//!
//! - the node table read by the reference traversal, one `(field_index,
//!   value)` pair per address;
//! - the [`RegisterFile`], three 128-bit groups that stage the most recently
//!   loaded node of every level in the bit-reversed layout a co-processor
//!   latches from (see [`crate::address`]).
//!
//! Both are written by [`PackedTreeStore::load`] and by nothing else.

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::address::{self, GROUP_WORDS};
use crate::config::{TreeConfig, TreeLayout};
use crate::error::{Error, Result};

/// Comparison data stored at one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Node {
    pub field_index: u32,
    pub value: u32,
}

/// One level's slot as decoded from the register groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagedSlot {
    /// Row of the level's RAM, i.e. the address's offset within its level.
    pub ram_row: u32,
    pub field_index: u32,
    pub value: u32,
}

// =============================================================================
// Register file
// =============================================================================

/// The three packed register groups.
///
/// Word order inside each group follows [`address::split_words`]; group
/// order follows the co-processor's register map: node values in registers
/// 1-4, field indices in 5-8, RAM-row addresses in 9-12.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFile {
    pub node_value: [u32; GROUP_WORDS],
    pub field_index: [u32; GROUP_WORDS],
    pub address: [u32; GROUP_WORDS],
}

impl RegisterFile {
    /// Number of 32-bit registers across all groups.
    pub const LEN: usize = 3 * GROUP_WORDS;

    /// All registers in register-map order (register 1 first).
    pub fn as_words(&self) -> [u32; Self::LEN] {
        let mut out = [0u32; Self::LEN];
        out[..GROUP_WORDS].copy_from_slice(&self.node_value);
        out[GROUP_WORDS..2 * GROUP_WORDS].copy_from_slice(&self.field_index);
        out[2 * GROUP_WORDS..].copy_from_slice(&self.address);
        out
    }

    /// Inverse of [`RegisterFile::as_words`].
    pub fn from_words(words: &[u32; Self::LEN]) -> Self {
        let mut regs = Self::default();
        regs.node_value.copy_from_slice(&words[..GROUP_WORDS]);
        regs.field_index.copy_from_slice(&words[GROUP_WORDS..2 * GROUP_WORDS]);
        regs.address.copy_from_slice(&words[2 * GROUP_WORDS..]);
        regs
    }

    /// Write one node into its level's slot of every group.
    ///
    /// The caller has already bounds-checked the node against `layout`.
    pub fn stage(&mut self, layout: &TreeLayout, address: u32, field_index: u32, value: u32) {
        let level = address::level_of(address);
        let ram_row = address::offset_in_level(address, level);

        self.node_value = address::pack_into(
            &self.node_value,
            u64::from(value),
            address::bit_range_for_value(level, layout.num_bits_per_field()),
            layout.value_bits,
        );
        self.field_index = address::pack_into(
            &self.field_index,
            u64::from(field_index),
            address::bit_range_for_field(level, layout.field_index_width),
            layout.field_bits,
        );
        self.address = address::pack_into(
            &self.address,
            u64::from(ram_row),
            address::address_slot(level),
            layout.address_bits,
        );
    }

    /// Decode one level's slot.
    pub fn slot(&self, layout: &TreeLayout, level: u32) -> Result<StagedSlot> {
        if level >= layout.num_levels() {
            return Err(Error::out_of_range("level", level, layout.num_levels()));
        }
        Ok(StagedSlot {
            ram_row: address::extract_from(
                &self.address,
                address::address_slot(level),
                layout.address_bits,
            ) as u32,
            field_index: address::extract_from(
                &self.field_index,
                address::bit_range_for_field(level, layout.field_index_width),
                layout.field_bits,
            ) as u32,
            value: address::extract_from(
                &self.node_value,
                address::bit_range_for_value(level, layout.num_bits_per_field()),
                layout.value_bits,
            ) as u32,
        })
    }

    /// Human-readable register dump, one line per register.
    pub fn dump(&self) -> Vec<String> {
        self.as_words()
            .iter()
            .enumerate()
            .map(|(i, w)| format!("register {:>2}: {:#010x}", i + 1, w))
            .collect()
    }
}

// =============================================================================
// PackedTreeStore
// =============================================================================

/// A complete binary tree of fixed depth with its packed register image.
#[derive(Debug, Clone)]
pub struct PackedTreeStore {
    layout: TreeLayout,
    nodes: Vec<Node>,
    loaded: Vec<bool>,
    registers: RegisterFile,
    /// Bumped on every mutation so mirrors can detect staleness.
    generation: u64,
}

impl PackedTreeStore {
    /// Allocate a zeroed tree.
    ///
    /// Fails with [`Error::UnsupportedWidth`] if the shape does not fit the
    /// register groups or a 32-bit input record.
    pub fn new(num_fields: u32, num_bits_per_field: u32, num_levels: u32) -> Result<Self> {
        Self::with_config(TreeConfig::new(num_fields, num_bits_per_field, num_levels))
    }

    pub fn with_config(config: TreeConfig) -> Result<Self> {
        let layout = config.validate()?;
        Ok(Self {
            layout,
            nodes: vec![Node::default(); layout.node_count as usize],
            loaded: vec![false; layout.node_count as usize],
            registers: RegisterFile::default(),
            generation: 0,
        })
    }

    #[inline]
    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Store `(field_index, value)` at `address`.
    ///
    /// All bounds are checked before anything is written. Only the bits of
    /// the address's level slot change in each register group.
    pub fn load(&mut self, address: u32, field_index: u32, value: u32) -> Result<()> {
        self.layout.check_node(address, field_index, value)?;

        debug!(
            address,
            level = address::level_of(address),
            field_index,
            value,
            "load node"
        );

        self.nodes[address as usize] = Node { field_index, value };
        self.loaded[address as usize] = true;
        self.registers.stage(&self.layout, address, field_index, value);
        self.generation += 1;
        Ok(())
    }

    /// Comparison data at `address` (zero if never loaded).
    pub fn node(&self, address: u32) -> Result<Node> {
        self.nodes
            .get(address as usize)
            .copied()
            .ok_or_else(|| Error::out_of_range("address", address, self.layout.node_count))
    }

    /// Unchecked read for traversal; `address` must be below the node count.
    #[inline]
    pub(crate) fn node_unchecked(&self, address: u32) -> Node {
        self.nodes[address as usize]
    }

    pub fn is_loaded(&self, address: u32) -> bool {
        self.loaded.get(address as usize).copied().unwrap_or(false)
    }

    /// Every loaded node in address order.
    pub fn loaded_nodes(&self) -> impl Iterator<Item = (u32, Node)> + '_ {
        self.nodes
            .iter()
            .zip(&self.loaded)
            .enumerate()
            .filter(|(_, (_, loaded))| **loaded)
            .map(|(a, (&node, _))| (a as u32, node))
    }

    /// The packed register image for transport to a co-processor.
    #[inline]
    pub fn read_raw(&self) -> &RegisterFile {
        &self.registers
    }

    /// Decode a level's staged slot from the register image.
    pub fn staged(&self, level: u32) -> Result<StagedSlot> {
        self.registers.slot(&self.layout, level)
    }

    /// Clear every node and register.
    pub fn reset(&mut self) {
        info!(num_levels = self.layout.num_levels(), "reset tree");
        self.nodes.fill(Node::default());
        self.loaded.fill(false);
        self.registers = RegisterFile::default();
        self.generation += 1;
    }

    /// Formatted register lines, also emitted at debug level.
    pub fn dump_registers(&self) -> Vec<String> {
        let lines = self.registers.dump();
        for line in &lines {
            debug!("{line}");
        }
        lines
    }
}

// =============================================================================
// Shared access
// =============================================================================

/// A store shared between loaders and concurrent searches.
///
/// Searches hold a read guard for the whole batch; [`SharedTree::load`]
/// refuses with [`Error::TreeBusy`] instead of waiting for them.
#[derive(Debug)]
pub struct SharedTree {
    inner: RwLock<PackedTreeStore>,
}

impl SharedTree {
    pub fn new(store: PackedTreeStore) -> Self {
        Self {
            inner: RwLock::new(store),
        }
    }

    pub fn load(&self, address: u32, field_index: u32, value: u32) -> Result<()> {
        let mut store = self.inner.try_write().ok_or(Error::TreeBusy)?;
        store.load(address, field_index, value)
    }

    pub fn reset(&self) -> Result<()> {
        let mut store = self.inner.try_write().ok_or(Error::TreeBusy)?;
        store.reset();
        Ok(())
    }

    /// Read-only view held for the duration of a batch.
    pub fn read(&self) -> RwLockReadGuard<'_, PackedTreeStore> {
        self.inner.read()
    }

    pub fn into_inner(self) -> PackedTreeStore {
        self.inner.into_inner()
    }
}
