//! Dense bitset stored as packed u64 words.
//!
//! Wire format:
//! - len (8 bytes LE): number of bits
//! - arrlen (8 bytes LE): number of u64 words
//! - arrlen * 8 bytes: raw u64 words (little-endian)
//!
//! Used as the undefined-value bitmap inside encoded blocks and as the
//! debug-mode permutation coverage check.

use std::io::{Read, Write};

use crate::error::Result;
use crate::serialization::{read_u64, write_u64};

pub struct DenseBitset {
    len: usize,
    words: Vec<u64>,
}

impl DenseBitset {
    /// Create an all-zero bitset of the given length.
    pub fn new(len: usize) -> Self {
        DenseBitset {
            len,
            words: vec![0u64; len.div_ceil(64)],
        }
    }

    /// Number of bits in the bitset.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get bit at the given index. Returns false for out-of-range indices.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Set bit at the given index. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] |= 1u64 << (index % 64);
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Serialize to the archive wire format.
    pub fn serialize(&self, writer: &mut (impl Write + ?Sized)) -> Result<()> {
        write_u64(writer, self.len as u64)?;
        write_u64(writer, self.words.len() as u64)?;
        for w in &self.words {
            write_u64(writer, *w)?;
        }
        Ok(())
    }

    /// Deserialize from the archive wire format.
    pub fn deserialize(reader: &mut impl Read) -> Result<Self> {
        let len = read_u64(reader)? as usize;
        let arrlen = read_u64(reader)? as usize;
        let mut words = Vec::with_capacity(arrlen);
        for _ in 0..arrlen {
            words.push(read_u64(reader)?);
        }
        Ok(DenseBitset { len, words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_set_get() {
        let mut bs = DenseBitset::new(100);
        assert_eq!(bs.count_ones(), 0);
        bs.set(0);
        bs.set(63);
        bs.set(64);
        bs.set(99);
        assert!(bs.get(0));
        assert!(bs.get(63));
        assert!(bs.get(64));
        assert!(bs.get(99));
        assert!(!bs.get(1));
        assert_eq!(bs.count_ones(), 4);
    }

    #[test]
    fn test_out_of_range() {
        let mut bs = DenseBitset::new(4);
        bs.set(100); // ignored
        assert!(!bs.get(100));
        assert_eq!(bs.count_ones(), 0);
    }

    #[test]
    fn test_roundtrip() {
        let mut bs = DenseBitset::new(130);
        for i in (0..130).step_by(3) {
            bs.set(i);
        }
        let mut buf = Vec::new();
        bs.serialize(&mut buf).unwrap();

        let back = DenseBitset::deserialize(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.len(), 130);
        for i in 0..130 {
            assert_eq!(back.get(i), i % 3 == 0, "bit {}", i);
        }
    }

    #[test]
    fn test_empty_roundtrip() {
        let bs = DenseBitset::new(0);
        let mut buf = Vec::new();
        bs.serialize(&mut buf).unwrap();
        let back = DenseBitset::deserialize(&mut Cursor::new(&buf)).unwrap();
        assert!(back.is_empty());
    }
}
