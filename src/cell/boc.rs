//! Bag of cells: serialized form of a cell tree
//!
//! Layout (single root, no index, optional CRC32C trailer):
//! ```text
//! magic b5ee9c72 | flags+size | off_bytes | cells | roots | absent | total size | root idx
//! cell*  = d1 | d2 | data (completion-tagged) | ref idx*
//! crc32c (little endian, over everything before it)
//! ```
//! Cells are written parents first, so every reference points forward.

use super::{Cell, CellError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

const FLAG_HAS_INDEX: u8 = 0x80;
const FLAG_HAS_CRC: u8 = 0x40;
const FLAG_CACHE_BITS: u8 = 0x20;

/// Serialize `root` and its descendants, deduplicating identical cells
pub fn serialize(root: &Cell, with_crc: bool) -> Vec<u8> {
    let cells = topological_order(root);
    let index: HashMap<[u8; 32], usize> = cells
        .iter()
        .enumerate()
        .map(|(i, c)| (c.hash(), i))
        .collect();

    let size_bytes = bytes_needed(cells.len() as u64);

    let mut body = Vec::new();
    for cell in &cells {
        body.push(cell.refs_descriptor());
        body.push(cell.bits_descriptor());
        body.extend_from_slice(&cell.padded_data());
        for r in cell.refs() {
            write_uint(&mut body, index[&r.hash()] as u64, size_bytes);
        }
    }
    let off_bytes = bytes_needed(body.len() as u64);

    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(&BOC_MAGIC);
    let flags = if with_crc { FLAG_HAS_CRC } else { 0 };
    out.push(flags | size_bytes as u8);
    out.push(off_bytes as u8);
    write_uint(&mut out, cells.len() as u64, size_bytes);
    write_uint(&mut out, 1, size_bytes);
    write_uint(&mut out, 0, size_bytes);
    write_uint(&mut out, body.len() as u64, off_bytes);
    write_uint(&mut out, 0, size_bytes);
    out.extend_from_slice(&body);

    if with_crc {
        let crc = crc32c::crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
    }
    out
}

/// Parse a single-root bag of cells
pub fn deserialize(bytes: &[u8]) -> Result<Cell, CellError> {
    let mut reader = Reader::new(bytes);

    if reader.take(4)? != BOC_MAGIC {
        return Err(CellError::InvalidBoc("unknown magic".into()));
    }
    let flags = reader.byte()?;
    let has_index = flags & FLAG_HAS_INDEX != 0;
    let has_crc = flags & FLAG_HAS_CRC != 0;
    let size_bytes = (flags & 0x07) as usize;
    if flags & FLAG_CACHE_BITS != 0 && !has_index {
        return Err(CellError::InvalidBoc("cache bits without index".into()));
    }
    if size_bytes == 0 || size_bytes > 4 {
        return Err(CellError::InvalidBoc(format!("size field of {} bytes", size_bytes)));
    }

    let mut body_end = bytes.len();
    if has_crc {
        if bytes.len() < 4 {
            return Err(CellError::InvalidBoc("truncated checksum".into()));
        }
        body_end -= 4;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let computed = crc32c::crc32c(&bytes[..body_end]);
        if stored != computed {
            return Err(CellError::ChecksumMismatch { stored, computed });
        }
    }

    let off_bytes = reader.byte()? as usize;
    if off_bytes == 0 || off_bytes > 8 {
        return Err(CellError::InvalidBoc(format!("offset field of {} bytes", off_bytes)));
    }
    let cell_count = reader.uint(size_bytes)? as usize;
    let root_count = reader.uint(size_bytes)?;
    let absent = reader.uint(size_bytes)?;
    let total_size = reader.uint(off_bytes)? as usize;
    if root_count != 1 {
        return Err(CellError::Unsupported(format!("{} roots", root_count)));
    }
    if absent != 0 {
        return Err(CellError::Unsupported("absent cells".into()));
    }
    let root_index = reader.uint(size_bytes)? as usize;
    if has_index {
        let index_len = cell_count
            .checked_mul(off_bytes)
            .ok_or_else(|| CellError::InvalidBoc("index size overflow".into()))?;
        reader.take(index_len)?;
    }

    let body = reader.take(total_size)?;
    if reader.pos != body_end {
        return Err(CellError::InvalidBoc("trailing bytes".into()));
    }
    // every cell has at least its two descriptor bytes
    if cell_count > body.len() / 2 {
        return Err(CellError::InvalidBoc(format!(
            "{} cells declared in {} bytes",
            cell_count,
            body.len()
        )));
    }

    let raw = parse_cells(body, cell_count, size_bytes)?;
    if root_index >= raw.len() {
        return Err(CellError::InvalidBoc("root index out of range".into()));
    }

    // References point forward, so build from the last cell backwards.
    let mut built: Vec<Option<Arc<Cell>>> = vec![None; raw.len()];
    for i in (0..raw.len()).rev() {
        let rc = &raw[i];
        let mut refs = Vec::with_capacity(rc.refs.len());
        for &r in &rc.refs {
            if r <= i || r >= raw.len() {
                return Err(CellError::InvalidBoc(format!(
                    "cell {} references cell {}",
                    i, r
                )));
            }
            let child = built[r]
                .clone()
                .ok_or_else(|| CellError::InvalidBoc(format!("cell {} not built", r)))?;
            refs.push(child);
        }
        built[i] = Some(Arc::new(Cell::new(rc.data.clone(), rc.bit_len, refs)?));
    }

    built[root_index]
        .take()
        .map(Arc::unwrap_or_clone)
        .ok_or_else(|| CellError::InvalidBoc("root not built".into()))
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

fn parse_cells(body: &[u8], count: usize, size_bytes: usize) -> Result<Vec<RawCell>, CellError> {
    let mut reader = Reader::new(body);
    let mut cells = Vec::with_capacity(count);
    for _ in 0..count {
        let d1 = reader.byte()?;
        let d2 = reader.byte()?;
        let ref_count = (d1 & 0x07) as usize;
        if d1 & 0x08 != 0 {
            return Err(CellError::Unsupported("exotic cell".into()));
        }
        if d1 & 0x10 != 0 || d1 >> 5 != 0 {
            return Err(CellError::Unsupported("stored hashes or non-zero level".into()));
        }
        if ref_count > super::MAX_REFS {
            return Err(CellError::InvalidBoc(format!("{} references", ref_count)));
        }

        let data_len = (d2 as usize).div_ceil(2);
        let mut data = reader.take(data_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            data_len * 8
        } else {
            let last = data.last().copied().unwrap_or(0);
            if last == 0 {
                return Err(CellError::InvalidBoc("missing completion tag".into()));
            }
            let tag = last.trailing_zeros() as usize;
            if let Some(b) = data.last_mut() {
                *b &= !(1u8 << tag);
            }
            (data_len - 1) * 8 + (7 - tag)
        };

        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            refs.push(reader.uint(size_bytes)? as usize);
        }
        cells.push(RawCell { data, bit_len, refs });
    }
    if reader.pos != body.len() {
        return Err(CellError::InvalidBoc("cell data size mismatch".into()));
    }
    Ok(cells)
}

/// Unique cells of the tree, every parent before its children
fn topological_order(root: &Cell) -> Vec<&Cell> {
    fn visit<'a>(cell: &'a Cell, seen: &mut HashSet<[u8; 32]>, post: &mut Vec<&'a Cell>) {
        if !seen.insert(cell.hash()) {
            return;
        }
        for r in cell.refs() {
            visit(r, seen, post);
        }
        post.push(cell);
    }

    let mut seen = HashSet::new();
    let mut post = Vec::new();
    visit(root, &mut seen, &mut post);
    post.reverse();
    post
}

fn bytes_needed(value: u64) -> usize {
    let mut n = 1;
    while n < 8 && value >> (n * 8) != 0 {
        n += 1;
    }
    n
}

fn write_uint(out: &mut Vec<u8>, value: u64, bytes: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - bytes..]);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CellError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| CellError::InvalidBoc("unexpected end of data".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, n: usize) -> Result<u64, CellError> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }
}
