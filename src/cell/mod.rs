//! Cells: the tree-shaped binary structures consumed by on-chain verifiers
//!
//! A cell holds up to 1023 data bits and up to 4 references to other cells.
//! - **Cell**: immutable ordinary cell with its representation hash
//! - **CellBuilder**: bit-level writer producing cells
//! - **boc**: bag-of-cells (de)serialization

mod builder;
pub mod boc;

pub use builder::CellBuilder;

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Maximum number of data bits in one cell
pub const MAX_BITS: usize = 1023;
/// Maximum number of references in one cell
pub const MAX_REFS: usize = 4;

/// Cell construction and (de)serialization errors
#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("cell data overflow: {requested} bits requested, {available} available")]
    BitOverflow { requested: usize, available: usize },

    #[error("cell reference overflow: at most {MAX_REFS} references")]
    RefOverflow,

    #[error("value {value} does not fit in {bits} bits")]
    ValueTooLarge { value: u64, bits: usize },

    #[error("invalid bag of cells: {0}")]
    InvalidBoc(String),

    #[error("bag of cells checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("unsupported cell: {0}")]
    Unsupported(String),
}

/// An ordinary cell
///
/// Hash and depth are computed once at construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    hash: [u8; 32],
    depth: u16,
}

impl Cell {
    /// Build a cell from raw data bits and references.
    ///
    /// `data` must hold exactly `ceil(bit_len / 8)` bytes; bits past
    /// `bit_len` in the last byte are cleared.
    pub fn new(mut data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Result<Self, CellError> {
        if bit_len > MAX_BITS {
            return Err(CellError::BitOverflow {
                requested: bit_len,
                available: MAX_BITS,
            });
        }
        if refs.len() > MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        if data.len() != bit_len.div_ceil(8) {
            return Err(CellError::InvalidBoc(format!(
                "{} data bytes for {} bits",
                data.len(),
                bit_len
            )));
        }
        if bit_len % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xFFu8 << (8 - bit_len % 8);
            }
        }

        let depth = refs
            .iter()
            .map(|r| r.depth + 1)
            .max()
            .unwrap_or(0);

        let mut cell = Self {
            data,
            bit_len,
            refs,
            hash: [0u8; 32],
            depth,
        };
        cell.hash = cell.compute_hash();
        Ok(cell)
    }

    /// An empty cell (no bits, no references)
    pub fn empty() -> Self {
        let mut cell = Self {
            data: Vec::new(),
            bit_len: 0,
            refs: Vec::new(),
            hash: [0u8; 32],
            depth: 0,
        };
        cell.hash = cell.compute_hash();
        cell
    }

    /// Parse a single-root bag of cells
    pub fn from_boc(bytes: &[u8]) -> Result<Self, CellError> {
        boc::deserialize(bytes)
    }

    /// Serialize as a bag of cells with a CRC32C trailer
    pub fn to_boc(&self) -> Vec<u8> {
        boc::serialize(self, true)
    }

    /// Representation hash
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Data bytes; unused trailing bits of the last byte are zero
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    /// First descriptor byte: reference count (ordinary cell, level 0)
    pub(crate) fn refs_descriptor(&self) -> u8 {
        self.refs.len() as u8
    }

    /// Second descriptor byte: floor(bits / 8) + ceil(bits / 8)
    pub(crate) fn bits_descriptor(&self) -> u8 {
        (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8
    }

    /// Data bytes with the completion tag set when the bit length is not
    /// byte aligned
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        let rem = self.bit_len % 8;
        if rem != 0 {
            if let Some(last) = out.last_mut() {
                *last |= 0x80 >> rem;
            }
        }
        out
    }

    fn compute_hash(&self) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update([self.refs_descriptor(), self.bits_descriptor()]);
        h.update(self.padded_data());
        for r in &self.refs {
            h.update(r.depth.to_be_bytes());
        }
        for r in &self.refs {
            h.update(r.hash);
        }
        h.finalize().into()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("data", &hex::encode(&self.data))
            .field("refs", &self.refs)
            .finish()
    }
}
