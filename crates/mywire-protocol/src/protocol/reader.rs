//! MySQL packet reading utilities.
//!
//! Every read advances the cursor only over bytes it successfully consumed,
//! so a failed read leaves the cursor at the point of failure.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::error::EncodingErrorKind;
use mywire_core::{BitSet, Error, Result};

/// A cursor over a packet payload.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor offset from the start of the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::short_read(len, self.remaining()));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Everything left in the payload.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        bytes
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(self.read_uint_le(2)? as u16)
    }

    pub fn read_u24_le(&mut self) -> Result<u32> {
        Ok(self.read_uint_le(3)? as u32)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(self.read_uint_le(4)? as u32)
    }

    pub fn read_u48_le(&mut self) -> Result<u64> {
        self.read_uint_le(6)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.read_uint_le(8)
    }

    /// Unsigned little-endian integer of `n` bytes (1..=8).
    pub fn read_uint_le(&mut self, n: usize) -> Result<u64> {
        debug_assert!((1..=8).contains(&n));
        let bytes = self.read_bytes(n)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Unsigned big-endian integer of `n` bytes (1..=8).
    pub fn read_uint_be(&mut self, n: usize) -> Result<u64> {
        debug_assert!((1..=8).contains(&n));
        let bytes = self.read_bytes(n)?;
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Signed little-endian integer of `n` bytes, sign-extended.
    pub fn read_int_le(&mut self, n: usize) -> Result<i64> {
        let raw = self.read_uint_le(n)?;
        let shift = 64 - 8 * n as u32;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32_le()?))
    }

    pub fn read_f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64_le()?))
    }

    /// Length-encoded integer.
    ///
    /// - 0x00-0xFA: the value itself
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - 0xFB (NULL) and 0xFF (ERR marker) are invalid here
    pub fn read_lenenc_int(&mut self) -> Result<u64> {
        match self.read_lenenc_int_or_null()? {
            Some(v) => Ok(v),
            None => Err(Error::encoding(
                EncodingErrorKind::InvalidLenEnc,
                "0xFB (NULL) where a length was expected",
            )),
        }
    }

    /// Length-encoded integer where 0xFB means NULL (text result rows).
    pub fn read_lenenc_int_or_null(&mut self) -> Result<Option<u64>> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Ok(Some(u64::from(first))),
            0xFB => Ok(None),
            0xFC => self.read_uint_le(2).map(Some),
            0xFD => self.read_uint_le(3).map(Some),
            0xFE => self.read_uint_le(8).map(Some),
            0xFF => Err(Error::encoding(
                EncodingErrorKind::InvalidLenEnc,
                "0xFF is not a valid length-encoded integer prefix",
            )),
        }
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_lenenc_int()?;
        usize::try_from(len).map_err(|_| Error::short_read(usize::MAX, self.remaining()))
    }

    pub fn read_lenenc_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    pub fn read_lenenc_string(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.read_lenenc_bytes()?).into_owned())
    }

    /// Length-encoded string where a leading 0xFB means NULL.
    pub fn read_lenenc_bytes_or_null(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_lenenc_int_or_null()? {
            None => Ok(None),
            Some(len) => {
                let len = usize::try_from(len)
                    .map_err(|_| Error::short_read(usize::MAX, self.remaining()))?;
                self.read_bytes(len).map(Some)
            }
        }
    }

    /// Bytes up to the next NUL; the terminator is consumed but not returned.
    pub fn read_null_bytes(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(Error::encoding(
                EncodingErrorKind::NoTerminator,
                format!("no NUL terminator in {} remaining bytes", rest.len()),
            ));
        };
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    pub fn read_null_string(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.read_null_bytes()?).into_owned())
    }

    /// NUL-terminated string that may also end at the end of the payload.
    pub fn read_null_string_or_rest(&mut self) -> String {
        match self.read_null_string() {
            Ok(s) => s,
            Err(_) => self.read_rest_string(),
        }
    }

    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.read_bytes(len)?).into_owned())
    }

    /// Bitmap of `n` bits stored in `ceil(n / 8)` bytes.
    pub fn read_bitmap(&mut self, bits: usize) -> Result<BitSet> {
        let bytes = self.read_bytes(bits.div_ceil(8))?;
        Ok(BitSet::from_bytes(bytes, bits))
    }
}

/// Whether bit `index` is set in a binary-row NULL bitmap (offset by 2 bits).
pub fn binary_null_bit(bitmap: &[u8], index: usize) -> bool {
    let bit = index + 2;
    bitmap
        .get(bit / 8)
        .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mywire_core::error::FramingErrorKind;

    #[test]
    fn test_lenenc_int_forms() {
        let mut r = PacketReader::new(&[0xFA, 0xFC, 0x34, 0x12, 0xFD, 1, 2, 3]);
        assert_eq!(r.read_lenenc_int().unwrap(), 250);
        assert_eq!(r.read_lenenc_int().unwrap(), 0x1234);
        assert_eq!(r.read_lenenc_int().unwrap(), 0x0003_0201);
        assert!(r.is_empty());

        let mut r = PacketReader::new(&[0xFE, 1, 0, 0, 0, 0, 0, 0, 0x80]);
        assert_eq!(r.read_lenenc_int().unwrap(), 0x8000_0000_0000_0001);
    }

    #[test]
    fn test_lenenc_ff_is_invalid() {
        let mut r = PacketReader::new(&[0xFF, 0, 0]);
        let err = r.read_lenenc_int().unwrap_err();
        assert_eq!(err.encoding_kind(), Some(EncodingErrorKind::InvalidLenEnc));
    }

    #[test]
    fn test_short_read_leaves_cursor_at_failure_point() {
        let mut r = PacketReader::new(&[0xFC, 0x01]);
        let err = r.read_lenenc_int().unwrap_err();
        assert_eq!(err.framing_kind(), Some(FramingErrorKind::ShortRead));
        assert_eq!(r.position(), 1);

        let mut r = PacketReader::new(&[1, 2, 3]);
        assert!(r.read_u32_le().is_err());
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_u24_le().unwrap(), 0x0003_0201);
    }

    #[test]
    fn test_null_string() {
        let mut r = PacketReader::new(b"root\0rest");
        assert_eq!(r.read_null_string().unwrap(), "root");
        assert_eq!(r.position(), 5);
        let err = r.read_null_string().unwrap_err();
        assert_eq!(err.encoding_kind(), Some(EncodingErrorKind::NoTerminator));
        assert_eq!(r.position(), 5);
        assert_eq!(r.read_null_string_or_rest(), "rest");
    }

    #[test]
    fn test_fixed_ints_both_endians() {
        let mut r = PacketReader::new(&[0x01, 0x02, 0x03, 0x01, 0x02, 0x03]);
        assert_eq!(r.read_uint_le(3).unwrap(), 0x0003_0201);
        assert_eq!(r.read_uint_be(3).unwrap(), 0x0001_0203);

        let mut r = PacketReader::new(&[0xFF, 0xFF, 0x7F]);
        assert_eq!(r.read_int_le(2).unwrap(), -1);
        let mut r = PacketReader::new(&[0x00, 0x00, 0x80]);
        assert_eq!(r.read_int_le(3).unwrap(), -0x80_0000);
    }

    #[test]
    fn test_lenenc_string_and_null() {
        let mut r = PacketReader::new(&[3, b'a', b'b', b'c', 0xFB]);
        assert_eq!(r.read_lenenc_string().unwrap(), "abc");
        assert_eq!(r.read_lenenc_bytes_or_null().unwrap(), None);
    }

    #[test]
    fn test_bitmaps() {
        let mut r = PacketReader::new(&[0b0000_0011, 0b0000_0001]);
        let bits = r.read_bitmap(9).unwrap();
        assert_eq!(bits.iter_ones().collect::<Vec<_>>(), vec![0, 1, 8]);

        // binary row bitmap: column 0 is bit 2
        assert!(binary_null_bit(&[0b0000_0100], 0));
        assert!(!binary_null_bit(&[0b0000_0100], 1));
        assert!(binary_null_bit(&[0, 0b0000_0001], 6));
    }
}
