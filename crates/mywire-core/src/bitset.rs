//! Fixed-length bitmap backed by 64-bit words.

use crate::error::{EncodingErrorKind, Error, Result};

/// A bitmap of a declared length.
///
/// Every accessor checks the index against the declared length and returns
/// [`EncodingErrorKind::IndexOutOfRange`] instead of silently ignoring it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// All-zero bitmap holding `len` bits.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Build from the wire layout: bit `i` is `bytes[i / 8] & (1 << (i % 8))`.
    ///
    /// Bits of `bytes` beyond `len` are ignored; missing bytes read as zero.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut set = Self::new(len);
        for i in 0..len {
            if let Some(byte) = bytes.get(i / 8) {
                if byte & (1 << (i % 8)) != 0 {
                    set.words[i / 64] |= 1 << (i % 64);
                }
            }
        }
        set
    }

    /// Serialize back to the wire layout (`ceil(len / 8)` bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len.div_ceil(8)];
        for i in self.iter_ones() {
            out[i / 8] |= 1 << (i % 8);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::encoding(
                EncodingErrorKind::IndexOutOfRange,
                format!("bit {index} out of range for bitmap of {} bits", self.len),
            ));
        }
        Ok(())
    }

    pub fn set(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        self.words[index / 64] |= 1 << (index % 64);
        Ok(())
    }

    pub fn clear(&mut self, index: usize) -> Result<()> {
        self.check(index)?;
        self.words[index / 64] &= !(1 << (index % 64));
        Ok(())
    }

    pub fn test(&self, index: usize) -> Result<bool> {
        self.check(index)?;
        Ok(self.words[index / 64] & (1 << (index % 64)) != 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.words[i / 64] & (1 << (i % 64)) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout_is_lsb_first() {
        let set = BitSet::from_bytes(&[0b0000_0101, 0b1000_0000], 16);
        assert!(set.test(0).unwrap());
        assert!(!set.test(1).unwrap());
        assert!(set.test(2).unwrap());
        assert!(set.test(15).unwrap());
        assert_eq!(set.count_ones(), 3);
        assert_eq!(set.to_bytes(), vec![0b0000_0101, 0b1000_0000]);
    }

    #[test]
    fn out_of_range_is_an_error() {
        let mut set = BitSet::new(10);
        let err = set.set(10).unwrap_err();
        assert_eq!(err.encoding_kind(), Some(EncodingErrorKind::IndexOutOfRange));
        assert!(set.clear(64).is_err());
        assert!(set.test(11).is_err());
    }

    #[test]
    fn set_and_clear_across_words() {
        let mut set = BitSet::new(130);
        set.set(0).unwrap();
        set.set(64).unwrap();
        set.set(129).unwrap();
        assert_eq!(set.iter_ones().collect::<Vec<_>>(), vec![0, 64, 129]);
        set.clear(64).unwrap();
        assert_eq!(set.count_ones(), 2);
    }

    #[test]
    fn trailing_bits_beyond_len_are_ignored() {
        let set = BitSet::from_bytes(&[0xFF], 3);
        assert_eq!(set.count_ones(), 3);
    }
}
