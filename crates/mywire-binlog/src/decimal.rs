//! Packed DECIMAL decoding.
//!
//! The binary form stores the integer and fractional parts separately, each
//! as groups of nine decimal digits in four big-endian bytes plus a shorter
//! leading (integer) or trailing (fraction) group. The sign is the inverted
//! top bit; negative values have every byte complemented.

use mywire_core::error::BinlogErrorKind;
use mywire_core::{Error, Result};
use mywire_protocol::protocol::PacketReader;

const DIGITS_PER_GROUP: usize = 9;
const GROUP_BYTES: usize = 4;
const DIG2BYTES: [usize; DIGITS_PER_GROUP + 1] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

/// Maximum precision MySQL accepts for DECIMAL.
pub const MAX_PRECISION: u8 = 65;

/// Size in bytes of a DECIMAL(precision, scale).
pub fn binary_size(precision: u8, scale: u8) -> usize {
    let scale = usize::from(scale);
    let integral = usize::from(precision).saturating_sub(scale);
    (integral / DIGITS_PER_GROUP) * GROUP_BYTES
        + DIG2BYTES[integral % DIGITS_PER_GROUP]
        + (scale / DIGITS_PER_GROUP) * GROUP_BYTES
        + DIG2BYTES[scale % DIGITS_PER_GROUP]
}

/// Read one DECIMAL(precision, scale) and render it exactly.
pub fn read_decimal(reader: &mut PacketReader<'_>, precision: u8, scale: u8) -> Result<String> {
    if precision == 0 || precision > MAX_PRECISION || scale > precision {
        return Err(Error::binlog(
            BinlogErrorKind::InvalidMetadata,
            format!("invalid DECIMAL({precision},{scale})"),
        ));
    }
    let bytes = reader.read_bytes(binary_size(precision, scale))?;
    Ok(decode(bytes, precision, scale))
}

/// Render `bytes`, which must be exactly `binary_size(precision, scale)` long.
fn decode(bytes: &[u8], precision: u8, scale: u8) -> String {
    let mut buf = bytes.to_vec();
    let negative = buf[0] & 0x80 == 0;
    buf[0] ^= 0x80;
    if negative {
        for byte in &mut buf {
            *byte = !*byte;
        }
    }

    let scale = usize::from(scale);
    let integral = usize::from(precision) - scale;
    let mut pos = 0;
    let mut take = |len: usize| {
        let value = buf[pos..pos + len]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        pos += len;
        value
    };

    let mut int_digits = String::new();
    let leading = DIG2BYTES[integral % DIGITS_PER_GROUP];
    if leading > 0 {
        int_digits.push_str(&take(leading).to_string());
    }
    for _ in 0..integral / DIGITS_PER_GROUP {
        int_digits.push_str(&format!("{:09}", take(GROUP_BYTES)));
    }
    let int_digits = int_digits.trim_start_matches('0');

    let mut frac_digits = String::new();
    for _ in 0..scale / DIGITS_PER_GROUP {
        frac_digits.push_str(&format!("{:09}", take(GROUP_BYTES)));
    }
    let trailing = scale % DIGITS_PER_GROUP;
    if trailing > 0 {
        let value = take(DIG2BYTES[trailing]);
        frac_digits.push_str(&format!("{value:0trailing$}"));
    }

    let mut out = String::with_capacity(usize::from(precision) + 3);
    if negative {
        out.push('-');
    }
    out.push_str(if int_digits.is_empty() { "0" } else { int_digits });
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_digits);
    }
    out
}
