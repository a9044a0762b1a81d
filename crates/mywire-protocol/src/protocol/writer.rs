//! Payload encoder: fixed-width little-endian integers, length-encoded
//! integers and the three string forms (NUL-terminated, length-encoded,
//! fixed width).

#![allow(clippy::cast_possible_truncation)]

/// Growable payload buffer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Low `n` bytes of `value`, little-endian.
    pub fn write_uint_le(&mut self, value: u64, n: usize) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..n]);
    }

    /// Low `n` bytes of `value`, big-endian.
    pub fn write_uint_be(&mut self, value: u64, n: usize) {
        self.buffer.extend_from_slice(&value.to_be_bytes()[8 - n..]);
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.write_u32_le(value.to_bits());
    }

    pub fn write_f64_le(&mut self, value: f64) {
        self.write_u64_le(value.to_bits());
    }

    /// Write a length-encoded integer.
    ///
    /// MySQL uses a variable-length integer encoding:
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC + 2 bytes: values up to 2^16
    /// - 0xFD + 3 bytes: values up to 2^24
    /// - 0xFE + 8 bytes: values up to 2^64
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.write_u8(value as u8);
        } else if value < 0x10000 {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value < 0x0100_0000 {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// The 0xFB NULL marker of text result rows.
    pub fn write_null_marker(&mut self) {
        self.write_u8(0xFB);
    }

    pub fn write_null_string(&mut self, s: &str) {
        self.write_null_bytes(s.as_bytes());
    }

    pub fn write_null_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.buffer.push(0);
    }

    /// Write a fixed-length string, padding with zeros or truncating.
    pub fn write_fixed_string(&mut self, s: &str, len: usize) {
        let bytes = s.as_bytes();
        if bytes.len() >= len {
            self.buffer.extend_from_slice(&bytes[..len]);
        } else {
            self.buffer.extend_from_slice(bytes);
            self.write_zeros(len - bytes.len());
        }
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }
}

/// Length of the length-encoded form of `value`.
pub fn lenenc_int_len(value: u64) -> usize {
    match value {
        0..251 => 1,
        251..0x10000 => 3,
        0x10000..0x0100_0000 => 4,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketReader;

    #[test]
    fn test_write_fixed_ints() {
        let mut writer = PacketWriter::new();
        writer.write_u16_le(0x1234);
        writer.write_u24_le(0x0012_3456);
        writer.write_u32_le(0x1234_5678);
        assert_eq!(
            writer.as_bytes(),
            &[0x34, 0x12, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12]
        );

        let mut writer = PacketWriter::new();
        writer.write_uint_be(0x0102_0304_0506, 6);
        writer.write_uint_le(0x0102, 2);
        assert_eq!(writer.as_bytes(), &[1, 2, 3, 4, 5, 6, 2, 1]);
    }

    #[test]
    fn test_write_lenenc_int() {
        let cases: [(u64, &[u8]); 4] = [
            (0x42, &[0x42]),
            (0x1234, &[0xFC, 0x34, 0x12]),
            (0x0012_3456, &[0xFD, 0x56, 0x34, 0x12]),
            (
                0x0807_0605_0403_0201,
                &[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            ),
        ];
        for (value, expected) in cases {
            let mut writer = PacketWriter::new();
            writer.write_lenenc_int(value);
            assert_eq!(writer.as_bytes(), expected);
            assert_eq!(lenenc_int_len(value), expected.len());
        }
    }

    #[test]
    fn test_lenenc_boundaries_decode() {
        for value in [250u64, 251, 0xFFFF, 0x1_0000, 0xFF_FFFF, 0x100_0000, u64::MAX] {
            let mut writer = PacketWriter::new();
            writer.write_lenenc_int(value);
            let bytes = writer.into_bytes();
            assert!([1, 3, 4, 9].contains(&bytes.len()));
            assert_eq!(PacketReader::new(&bytes).read_lenenc_int().unwrap(), value);
        }
    }

    #[test]
    fn test_write_strings() {
        let mut writer = PacketWriter::new();
        writer.write_null_string("hello");
        writer.write_lenenc_string("hi");
        writer.write_fixed_string("abc", 5);
        writer.write_fixed_string("toolong", 3);
        assert_eq!(writer.as_bytes(), b"hello\0\x02hiabc\0\0too");
    }
}
