//! Temporal column encodings in row images.
//!
//! The `*2` types (MySQL 5.6.4+) are big-endian with a fractional-second
//! tail whose width depends on the column's fsp; the legacy types are
//! little-endian decimal-packed integers.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::error::BinlogErrorKind;
use mywire_core::{DateTimeValue, DateValue, Error, Result, TimeValue, TimestampValue};
use mywire_protocol::protocol::PacketReader;

const DATETIMEF_INT_OFS: i64 = 0x80_0000_0000;
const TIMEF_INT_OFS: i64 = 0x80_0000;
const TIMEF_OFS: i64 = 0x8000_0000_0000;

fn check_fsp(fsp: u8) -> Result<()> {
    if fsp > 6 {
        return Err(Error::binlog(
            BinlogErrorKind::InvalidMetadata,
            format!("fractional second precision {fsp} exceeds 6"),
        ));
    }
    Ok(())
}

/// Unsigned fractional tail of TIMESTAMP2 / DATETIME2, in microseconds.
fn read_fraction(reader: &mut PacketReader<'_>, fsp: u8) -> Result<u32> {
    check_fsp(fsp)?;
    Ok(match fsp {
        0 => 0,
        1 | 2 => u32::from(reader.read_u8()?) * 10_000,
        3 | 4 => reader.read_uint_be(2)? as u32 * 100,
        _ => reader.read_uint_be(3)? as u32,
    })
}

pub fn read_timestamp(reader: &mut PacketReader<'_>) -> Result<TimestampValue> {
    Ok(TimestampValue {
        seconds: i64::from(reader.read_u32_le()?),
        micros: 0,
    })
}

pub fn read_timestamp2(reader: &mut PacketReader<'_>, fsp: u8) -> Result<TimestampValue> {
    let seconds = reader.read_uint_be(4)? as i64;
    let micros = read_fraction(reader, fsp)?;
    Ok(TimestampValue { seconds, micros })
}

/// Legacy DATETIME: `YYYYMMDDhhmmss` as an 8-byte integer.
pub fn read_datetime(reader: &mut PacketReader<'_>) -> Result<DateTimeValue> {
    let packed = reader.read_u64_le()?;
    let date = packed / 1_000_000;
    let time = packed % 1_000_000;
    Ok(DateTimeValue {
        year: (date / 10_000) as u16,
        month: ((date / 100) % 100) as u8,
        day: (date % 100) as u8,
        hour: (time / 10_000) as u8,
        minute: ((time / 100) % 100) as u8,
        second: (time % 100) as u8,
        micros: 0,
    })
}

pub fn read_datetime2(reader: &mut PacketReader<'_>, fsp: u8) -> Result<DateTimeValue> {
    let int_part = reader.read_uint_be(5)? as i64 - DATETIMEF_INT_OFS;
    let micros = read_fraction(reader, fsp)?;
    Ok(unpack_datetime((int_part << 24) + i64::from(micros)))
}

/// Split a packed datetime (`ymdhms << 24 | micros`).
pub fn unpack_datetime(packed: i64) -> DateTimeValue {
    let packed = packed.unsigned_abs();
    let micros = (packed % (1 << 24)) as u32;
    let ymdhms = packed >> 24;
    let ymd = ymdhms >> 17;
    let ym = ymd >> 5;
    let hms = ymdhms % (1 << 17);
    DateTimeValue {
        year: (ym / 13) as u16,
        month: (ym % 13) as u8,
        day: (ymd % (1 << 5)) as u8,
        hour: (hms >> 12) as u8,
        minute: ((hms >> 6) % (1 << 6)) as u8,
        second: (hms % (1 << 6)) as u8,
        micros,
    }
}

/// Legacy TIME: signed `hhmmss` in 3 bytes.
pub fn read_time(reader: &mut PacketReader<'_>) -> Result<TimeValue> {
    let value = reader.read_int_le(3)?;
    let abs = value.unsigned_abs();
    let hours = abs / 10_000;
    Ok(TimeValue {
        negative: value < 0,
        days: (hours / 24) as u32,
        hours: (hours % 24) as u8,
        minutes: ((abs / 100) % 100) as u8,
        seconds: (abs % 100) as u8,
        micros: 0,
    })
}

pub fn read_time2(reader: &mut PacketReader<'_>, fsp: u8) -> Result<TimeValue> {
    check_fsp(fsp)?;
    let packed = match fsp {
        0 => (reader.read_uint_be(3)? as i64 - TIMEF_INT_OFS) << 24,
        1 | 2 => {
            let mut int_part = reader.read_uint_be(3)? as i64 - TIMEF_INT_OFS;
            let mut frac = i64::from(reader.read_u8()?);
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x100;
            }
            (int_part << 24) + frac * 10_000
        }
        3 | 4 => {
            let mut int_part = reader.read_uint_be(3)? as i64 - TIMEF_INT_OFS;
            let mut frac = reader.read_uint_be(2)? as i64;
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x10000;
            }
            (int_part << 24) + frac * 100
        }
        _ => reader.read_uint_be(6)? as i64 - TIMEF_OFS,
    };
    Ok(unpack_time(packed))
}

/// Split a packed time (`hms << 24 | micros`, negated when negative).
pub fn unpack_time(packed: i64) -> TimeValue {
    let negative = packed < 0;
    let packed = packed.unsigned_abs();
    let hms = packed >> 24;
    let hours = (hms >> 12) % (1 << 10);
    TimeValue {
        negative,
        days: (hours / 24) as u32,
        hours: (hours % 24) as u8,
        minutes: ((hms >> 6) % (1 << 6)) as u8,
        seconds: (hms % (1 << 6)) as u8,
        micros: (packed % (1 << 24)) as u32,
    }
}

/// DATE / NEWDATE: `year << 9 | month << 5 | day` in 3 bytes.
pub fn read_date(reader: &mut PacketReader<'_>) -> Result<DateValue> {
    let packed = reader.read_u24_le()?;
    Ok(DateValue {
        year: (packed >> 9) as u16,
        month: ((packed >> 5) & 0x0F) as u8,
        day: (packed & 0x1F) as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> PacketReader<'_> {
        PacketReader::new(bytes)
    }

    fn datetime2_bytes(dt: DateTimeValue) -> [u8; 5] {
        let ymd = ((u64::from(dt.year) * 13 + u64::from(dt.month)) << 5) | u64::from(dt.day);
        let hms = (u64::from(dt.hour) << 12) | (u64::from(dt.minute) << 6) | u64::from(dt.second);
        let int_part = ((ymd << 17) | hms) + DATETIMEF_INT_OFS as u64;
        let be = int_part.to_be_bytes();
        [be[3], be[4], be[5], be[6], be[7]]
    }

    #[test]
    fn test_datetime2_with_millis() {
        let expected = DateTimeValue {
            year: 2024,
            month: 2,
            day: 29,
            hour: 13,
            minute: 45,
            second: 7,
            micros: 123_000,
        };
        let mut bytes = datetime2_bytes(expected).to_vec();
        bytes.extend_from_slice(&(1230u16).to_be_bytes());
        let mut r = reader(&bytes);
        assert_eq!(read_datetime2(&mut r, 3).unwrap(), expected);
        assert!(r.is_empty());
    }

    #[test]
    fn test_timestamp2_fraction_widths() {
        let mut bytes = 1_700_000_000u32.to_be_bytes().to_vec();
        bytes.push(45);
        let value = read_timestamp2(&mut reader(&bytes), 2).unwrap();
        assert_eq!(value.seconds, 1_700_000_000);
        assert_eq!(value.micros, 450_000);

        let mut bytes = 1u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0x01, 0xE2, 0x40]);
        assert_eq!(read_timestamp2(&mut reader(&bytes), 6).unwrap().micros, 123_456);
    }

    #[test]
    fn test_time2_positive_and_negative() {
        // 838:59:59
        let hms: i64 = (838 << 12) | (59 << 6) | 59;
        let bytes = ((hms + TIMEF_INT_OFS) as u32).to_be_bytes();
        let value = read_time2(&mut reader(&bytes[1..]), 0).unwrap();
        assert!(!value.negative);
        assert_eq!(value.days * 24 + u32::from(value.hours), 838);
        assert_eq!((value.minutes, value.seconds), (59, 59));

        // -00:00:01.5 at fsp 1: int part -2 with a borrowed fraction
        let int_part = (TIMEF_INT_OFS - 2) as u32;
        let mut bytes = int_part.to_be_bytes()[1..].to_vec();
        bytes.push(206); // -50 hundredths as a two's complement byte
        let value = read_time2(&mut reader(&bytes), 1).unwrap();
        assert!(value.negative);
        assert_eq!(value.seconds, 1);
        assert_eq!(value.micros, 500_000);
    }

    #[test]
    fn test_legacy_encodings() {
        let datetime = 20_231_231_235_959u64.to_le_bytes();
        let value = read_datetime(&mut reader(&datetime)).unwrap();
        assert_eq!((value.year, value.month, value.day), (2023, 12, 31));
        assert_eq!((value.hour, value.minute, value.second), (23, 59, 59));

        let time = (-123_456i32).to_le_bytes();
        let value = read_time(&mut reader(&time[..3])).unwrap();
        assert!(value.negative);
        assert_eq!((value.hours, value.minutes, value.seconds), (12, 34, 56));

        let packed: u32 = (2024 << 9) | (7 << 5) | 4;
        let value = read_date(&mut reader(&packed.to_le_bytes()[..3])).unwrap();
        assert_eq!(value, DateValue { year: 2024, month: 7, day: 4 });
    }

    #[test]
    fn test_fsp_out_of_range() {
        let err = read_timestamp2(&mut reader(&[0; 8]), 7).unwrap_err();
        assert_eq!(err.binlog_kind(), Some(BinlogErrorKind::InvalidMetadata));
    }
}
