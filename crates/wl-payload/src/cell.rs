//! Cells and the bag-of-cells wire format.
//!
//! A cell holds up to 1023 data bits and up to 4 references to child cells.
//! `CellBuilder` checks both limits on every write, so a finished `Cell`
//! is always well formed.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{Address, PayloadError, to_hex};

pub const MAX_CELL_BITS: usize = 1023;
pub const MAX_CELL_REFS: usize = 4;

const BOC_MAGIC: u32 = 0xb5ee_9c72;
const BOC_FLAG_CRC32C: u8 = 0x40;

#[derive(Debug, Clone, Default)]
struct BitString {
    bytes: Vec<u8>,
    len: usize,
}

impl BitString {
    fn push_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    fn push_uint(&mut self, value: u128, bits: usize) {
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    /// Data bytes with the completion tag applied to a trailing partial byte.
    fn padded(&self) -> Vec<u8> {
        let mut bytes = self.bytes.clone();
        if self.len % 8 != 0 {
            let last = bytes.len() - 1;
            bytes[last] |= 0x80 >> (self.len % 8);
        }
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    inner: Arc<CellData>,
}

#[derive(Debug, PartialEq, Eq)]
struct CellData {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Cell>,
    depth: u16,
    hash: [u8; 32],
}

impl Cell {
    pub fn empty() -> Self {
        CellBuilder::new()
            .end_cell()
            .unwrap_or_else(|_| unreachable!("an empty cell is always valid"))
    }

    pub fn bit_len(&self) -> usize {
        self.inner.bit_len
    }

    pub fn refs(&self) -> &[Cell] {
        &self.inner.refs
    }

    pub fn depth(&self) -> u16 {
        self.inner.depth
    }

    /// Representation hash.
    pub fn hash(&self) -> [u8; 32] {
        self.inner.hash
    }

    pub fn hash_hex(&self) -> String {
        to_hex(&self.inner.hash)
    }

    /// Bit `index` of the data section.
    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.inner.bit_len {
            return None;
        }
        Some(self.inner.data[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    fn descriptors(&self) -> [u8; 2] {
        let d1 = self.inner.refs.len() as u8;
        let d2 = (self.inner.bit_len / 8 + self.inner.bit_len.div_ceil(8)) as u8;
        [d1, d2]
    }

    fn padded_data(&self) -> Vec<u8> {
        let mut data = self.inner.data.clone();
        if self.inner.bit_len % 8 != 0 {
            let last = data.len() - 1;
            data[last] |= 0x80 >> (self.inner.bit_len % 8);
        }
        data
    }

    /// Serializes this cell tree as a single-root bag of cells with a CRC32-C trailer.
    pub fn to_boc(&self) -> Vec<u8> {
        let order = topological_order(self);
        let index: HashMap<[u8; 32], usize> = order
            .iter()
            .enumerate()
            .map(|(i, cell)| (cell.hash(), i))
            .collect();

        let size_bytes = byte_width(order.len() as u64);
        let mut cells_blob = Vec::new();
        for cell in &order {
            cells_blob.extend_from_slice(&cell.descriptors());
            cells_blob.extend_from_slice(&cell.padded_data());
            for child in cell.refs() {
                push_be(&mut cells_blob, index[&child.hash()] as u64, size_bytes);
            }
        }
        let off_bytes = byte_width(cells_blob.len() as u64);

        let mut out = Vec::with_capacity(cells_blob.len() + 32);
        out.extend_from_slice(&BOC_MAGIC.to_be_bytes());
        out.push(BOC_FLAG_CRC32C | size_bytes as u8);
        out.push(off_bytes as u8);
        push_be(&mut out, order.len() as u64, size_bytes);
        push_be(&mut out, 1, size_bytes);
        push_be(&mut out, 0, size_bytes);
        push_be(&mut out, cells_blob.len() as u64, off_bytes);
        push_be(&mut out, 0, size_bytes);
        out.extend_from_slice(&cells_blob);

        let crc = crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn to_boc_base64(&self) -> String {
        STANDARD.encode(self.to_boc())
    }
}

/// Parents before children, each distinct cell once, root first.
fn topological_order(root: &Cell) -> Vec<Cell> {
    fn visit(cell: &Cell, seen: &mut HashSet<[u8; 32]>, post: &mut Vec<Cell>) {
        if !seen.insert(cell.hash()) {
            return;
        }
        for child in cell.refs() {
            visit(child, seen, post);
        }
        post.push(cell.clone());
    }

    let mut seen = HashSet::new();
    let mut post = Vec::new();
    visit(root, &mut seen, &mut post);
    post.reverse();
    post
}

fn byte_width(value: u64) -> usize {
    let mut width = 1;
    while width < 8 && value >> (width * 8) != 0 {
        width += 1;
    }
    width
}

fn push_be(out: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}

fn crc32c(data: &[u8]) -> u32 {
    let mut crc: u32 = !0;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x82f6_3b78
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    bits: BitString,
    refs: Vec<Cell>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_left(&self) -> usize {
        MAX_CELL_BITS - self.bits.len
    }

    pub fn refs_left(&self) -> usize {
        MAX_CELL_REFS - self.refs.len()
    }

    fn reserve(&self, bits: usize) -> Result<(), PayloadError> {
        if bits > self.bits_left() {
            return Err(PayloadError::BitOverflow {
                needed: bits,
                available: self.bits_left(),
            });
        }
        Ok(())
    }

    pub fn store_bit(mut self, bit: bool) -> Result<Self, PayloadError> {
        self.reserve(1)?;
        self.bits.push_bit(bit);
        Ok(self)
    }

    pub fn store_uint(mut self, value: u64, bits: usize) -> Result<Self, PayloadError> {
        if bits < 64 && value >> bits != 0 {
            return Err(PayloadError::ValueOutOfRange {
                value: value as u128,
                bits,
            });
        }
        self.reserve(bits)?;
        self.bits.push_uint(value as u128, bits);
        Ok(self)
    }

    pub fn store_int(mut self, value: i64, bits: usize) -> Result<Self, PayloadError> {
        if bits == 0 || bits > 64 {
            return Err(PayloadError::ValueOutOfRange {
                value: value.unsigned_abs() as u128,
                bits,
            });
        }
        let min = if bits == 64 { i64::MIN } else { -(1i64 << (bits - 1)) };
        let max = if bits == 64 { i64::MAX } else { (1i64 << (bits - 1)) - 1 };
        if value < min || value > max {
            return Err(PayloadError::ValueOutOfRange {
                value: value.unsigned_abs() as u128,
                bits,
            });
        }
        self.reserve(bits)?;
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.bits.push_uint((value as u64 & mask) as u128, bits);
        Ok(self)
    }

    /// `VarUInteger 16`: a 4-bit byte length followed by the big-endian amount.
    pub fn store_coins(mut self, amount: u128) -> Result<Self, PayloadError> {
        let len = if amount == 0 {
            0
        } else {
            16 - (amount.leading_zeros() as usize / 8)
        };
        if len > 15 {
            return Err(PayloadError::ValueOutOfRange {
                value: amount,
                bits: 120,
            });
        }
        self.reserve(4 + len * 8)?;
        self.bits.push_uint(len as u128, 4);
        self.bits.push_uint(amount, len * 8);
        Ok(self)
    }

    /// `addr_std` for `Some`, `addr_none` for `None`.
    pub fn store_address(mut self, address: Option<&Address>) -> Result<Self, PayloadError> {
        let Some(address) = address else {
            self.reserve(2)?;
            self.bits.push_uint(0, 2);
            return Ok(self);
        };

        self.reserve(2 + 1 + 8 + 256)?;
        self.bits.push_uint(0b10, 2);
        self.bits.push_bit(false);
        self.bits.push_uint(address.workchain as u8 as u128, 8);
        for byte in address.hash {
            self.bits.push_uint(byte as u128, 8);
        }
        Ok(self)
    }

    pub fn store_ref(mut self, cell: Cell) -> Result<Self, PayloadError> {
        if self.refs.len() >= MAX_CELL_REFS {
            return Err(PayloadError::RefOverflow);
        }
        self.refs.push(cell);
        Ok(self)
    }

    pub fn store_maybe_ref(self, cell: Option<Cell>) -> Result<Self, PayloadError> {
        match cell {
            Some(cell) => {
                if self.refs.len() >= MAX_CELL_REFS {
                    return Err(PayloadError::RefOverflow);
                }
                self.store_bit(true)?.store_ref(cell)
            }
            None => self.store_bit(false),
        }
    }

    /// Writes as many bytes as fit here and continues the rest in a chain of
    /// child cells, each referenced from its parent.
    pub fn store_string_tail(self, text: &str) -> Result<Self, PayloadError> {
        self.store_bytes_tail(text.as_bytes())
    }

    fn store_bytes_tail(mut self, bytes: &[u8]) -> Result<Self, PayloadError> {
        let fits = self.bits_left() / 8;
        let (here, rest) = bytes.split_at(fits.min(bytes.len()));
        for byte in here {
            self.bits.push_uint(*byte as u128, 8);
        }
        if rest.is_empty() {
            return Ok(self);
        }
        if self.refs.len() >= MAX_CELL_REFS {
            return Err(PayloadError::RefOverflow);
        }
        let child = CellBuilder::new().store_bytes_tail(rest)?.end_cell()?;
        self.store_ref(child)
    }

    pub fn end_cell(self) -> Result<Cell, PayloadError> {
        if self.bits.len > MAX_CELL_BITS {
            return Err(PayloadError::BitOverflow {
                needed: self.bits.len,
                available: MAX_CELL_BITS,
            });
        }
        if self.refs.len() > MAX_CELL_REFS {
            return Err(PayloadError::RefOverflow);
        }

        let depth = self
            .refs
            .iter()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0);

        let d1 = self.refs.len() as u8;
        let d2 = (self.bits.len / 8 + self.bits.len.div_ceil(8)) as u8;

        let mut hasher = Sha256::new();
        hasher.update([d1, d2]);
        hasher.update(self.bits.padded());
        for child in &self.refs {
            hasher.update(child.depth().to_be_bytes());
        }
        for child in &self.refs {
            hasher.update(child.hash());
        }
        let hash: [u8; 32] = hasher.finalize().into();

        Ok(Cell {
            inner: Arc::new(CellData {
                data: self.bits.bytes,
                bit_len: self.bits.len,
                refs: self.refs,
                depth,
                hash,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cell_has_known_hash() {
        assert_eq!(
            Cell::empty().hash_hex(),
            "96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"
        );
    }

    #[test]
    fn empty_cell_boc_layout() {
        let boc = Cell::empty().to_boc();
        assert_eq!(&boc[..4], &[0xb5, 0xee, 0x9c, 0x72]);
        // flags, off_bytes, cells, roots, absent, tot size, root index, d1, d2
        assert_eq!(&boc[4..13], &[0x41, 0x01, 0x01, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(boc.len(), 13 + 4);
    }

    #[test]
    fn partial_byte_gets_completion_tag() {
        let cell = CellBuilder::new()
            .store_uint(0b101, 3)
            .unwrap()
            .end_cell()
            .unwrap();
        assert_eq!(cell.bit_len(), 3);
        assert_eq!(cell.padded_data(), vec![0b1011_0000]);
        assert_eq!(cell.descriptors(), [0, 1]);
    }

    #[test]
    fn builder_rejects_overflow() {
        let builder = CellBuilder::new().store_uint(0, 63).unwrap();
        let mut builder = builder;
        for _ in 0..15 {
            builder = builder.store_uint(u64::MAX, 64).unwrap();
        }
        assert_eq!(builder.bits_left(), 0);
        assert_eq!(
            builder.store_bit(true).unwrap_err(),
            PayloadError::BitOverflow {
                needed: 1,
                available: 0
            }
        );

        let err = CellBuilder::new().store_uint(8, 3).unwrap_err();
        assert_eq!(err, PayloadError::ValueOutOfRange { value: 8, bits: 3 });
    }

    #[test]
    fn ref_limit_enforced() {
        let mut builder = CellBuilder::new();
        for _ in 0..MAX_CELL_REFS {
            builder = builder.store_ref(Cell::empty()).unwrap();
        }
        assert_eq!(
            builder.store_ref(Cell::empty()).unwrap_err(),
            PayloadError::RefOverflow
        );
    }

    #[test]
    fn coins_use_minimal_length() {
        let zero = CellBuilder::new().store_coins(0).unwrap().end_cell().unwrap();
        assert_eq!(zero.bit_len(), 4);

        let nano = CellBuilder::new()
            .store_coins(50_000_000)
            .unwrap()
            .end_cell()
            .unwrap();
        // 50_000_000 = 0x02faf080 -> 4 bytes
        assert_eq!(nano.bit_len(), 4 + 32);
    }

    #[test]
    fn signed_ints_round_to_twos_complement() {
        let cell = CellBuilder::new()
            .store_int(-1, 8)
            .unwrap()
            .end_cell()
            .unwrap();
        assert_eq!(cell.padded_data(), vec![0xff]);
        assert!(CellBuilder::new().store_int(128, 8).is_err());
    }

    #[test]
    fn long_strings_spill_into_children() {
        let text = "x".repeat(300);
        let cell = CellBuilder::new()
            .store_uint(0, 32)
            .unwrap()
            .store_string_tail(&text)
            .unwrap()
            .end_cell()
            .unwrap();

        // 1023 - 32 = 991 bits -> 123 bytes here, 127 in the next cell, 50 in the last
        assert_eq!(cell.bit_len(), 32 + 123 * 8);
        assert_eq!(cell.refs().len(), 1);
        assert_eq!(cell.refs()[0].bit_len(), 127 * 8);
        assert_eq!(cell.refs()[0].refs()[0].bit_len(), 50 * 8);
        assert_eq!(cell.depth(), 2);
    }

    #[test]
    fn shared_children_are_serialized_once() {
        let leaf = CellBuilder::new().store_uint(7, 8).unwrap().end_cell().unwrap();
        let root = CellBuilder::new()
            .store_ref(leaf.clone())
            .unwrap()
            .store_ref(leaf)
            .unwrap()
            .end_cell()
            .unwrap();

        let order = topological_order(&root);
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], root);

        let boc = root.to_boc();
        // cell count byte
        assert_eq!(boc[6], 2);
    }
}
