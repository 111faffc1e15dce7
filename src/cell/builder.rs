use super::{Cell, CellError, MAX_BITS, MAX_REFS};
use std::sync::Arc;

/// Bit-level writer for a single cell
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_left(&self) -> usize {
        MAX_BITS - self.bit_len
    }

    pub fn refs_left(&self) -> usize {
        MAX_REFS - self.refs.len()
    }

    /// Store the low `bits` bits of `value`, most significant first
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(CellError::ValueTooLarge { value, bits });
        }
        self.ensure_bits(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    /// Store the first `bits` bits of `bytes`
    pub fn store_bits(&mut self, bytes: &[u8], bits: usize) -> Result<&mut Self, CellError> {
        if bits > bytes.len() * 8 {
            return Err(CellError::BitOverflow {
                requested: bits,
                available: bytes.len() * 8,
            });
        }
        self.ensure_bits(bits)?;
        for i in 0..bits {
            self.push_bit(bytes[i / 8] & (0x80 >> (i % 8)) != 0);
        }
        Ok(self)
    }

    /// Store every bit of `bytes`
    pub fn store_slice(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        self.store_bits(bytes, bytes.len() * 8)
    }

    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self, CellError> {
        if self.refs.len() >= MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// Append the bits and references of another cell
    pub fn store_cell(&mut self, cell: &Cell) -> Result<&mut Self, CellError> {
        if self.refs.len() + cell.refs().len() > MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        self.store_bits(cell.data(), cell.bit_len())?;
        self.refs.extend(cell.refs().iter().cloned());
        Ok(self)
    }

    pub fn build(&self) -> Result<Cell, CellError> {
        Cell::new(self.data.clone(), self.bit_len, self.refs.clone())
    }

    fn ensure_bits(&self, bits: usize) -> Result<(), CellError> {
        if bits > self.bits_left() {
            return Err(CellError::BitOverflow {
                requested: bits,
                available: self.bits_left(),
            });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }
}
