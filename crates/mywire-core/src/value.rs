//! Decoded column values.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// A decoded column value.
///
/// Text result rows produce [`Value::Bytes`] for every non-null column; binary
/// result rows and binlog row images produce the typed variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Signed integer of any width
    Int(i64),
    /// Unsigned integer of any width
    UInt(u64),
    /// FLOAT
    Float(f32),
    /// DOUBLE
    Double(f64),
    /// DECIMAL / NEWDECIMAL rendered exactly
    Decimal(String),
    /// Strings, blobs, geometry WKB and text-protocol values
    Bytes(Vec<u8>),
    Date(DateValue),
    Time(TimeValue),
    DateTime(DateTimeValue),
    /// TIMESTAMP from a binlog row image (seconds since the epoch, UTC)
    Timestamp(TimestampValue),
    Year(u16),
    /// 1-based ENUM member index (0 is the empty error value)
    Enum(u16),
    /// SET member bitmask
    Set(u64),
    /// BIT(n) payload, big-endian
    Bit(Vec<u8>),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DateValue {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimeValue {
    pub negative: bool,
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DateTimeValue {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micros: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimestampValue {
    pub seconds: i64,
    pub micros: u32,
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Year(v) => Some(i64::from(*v)),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) | Value::Set(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Enum(v) => Some(u64::from(*v)),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) | Value::Bit(b) => Some(b),
            Value::Decimal(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Text-protocol encoding of this value; `None` for NULL.
    pub fn to_text(&self) -> Option<Vec<u8>> {
        let text = match self {
            Value::Null => return None,
            Value::Bytes(b) | Value::Bit(b) => return Some(b.clone()),
            Value::Int(v) => v.to_string(),
            Value::UInt(v) | Value::Set(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Decimal(s) => s.clone(),
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::DateTime(dt) => dt.to_string(),
            Value::Timestamp(ts) => ts.to_string(),
            Value::Year(y) => format!("{y:04}"),
            Value::Enum(v) => v.to_string(),
            Value::Json(j) => j.to_string(),
        };
        Some(text.into_bytes())
    }

    /// Interpret a DATE, DATETIME or TIMESTAMP in `tz`.
    ///
    /// DATE and DATETIME carry no zone and are taken as wall-clock time in
    /// `tz`; TIMESTAMP is an absolute instant converted to `tz`. Zero dates
    /// yield `None`.
    pub fn to_timestamp_in(&self, tz: &Tz) -> Option<DateTime<Tz>> {
        match self {
            Value::DateTime(dt) => dt.to_zoned(tz),
            Value::Date(d) => DateTimeValue::from(*d).to_zoned(tz),
            Value::Timestamp(ts) => ts.to_utc().map(|utc| utc.with_timezone(tz)),
            _ => None,
        }
    }
}

impl DateValue {
    pub fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }

    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )
    }
}

impl TimeValue {
    pub fn is_zero(&self) -> bool {
        self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0
            && self.micros == 0
    }

    /// Total hours including the day component.
    pub fn total_hours(&self) -> u64 {
        u64::from(self.days) * 24 + u64::from(self.hours)
    }

    pub fn to_duration(&self) -> TimeDelta {
        let micros = (self.total_hours() as i64 * 3600
            + i64::from(self.minutes) * 60
            + i64::from(self.seconds))
            * 1_000_000
            + i64::from(self.micros);
        TimeDelta::microseconds(if self.negative { -micros } else { micros })
    }
}

impl DateTimeValue {
    pub fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }

    pub fn date(&self) -> DateValue {
        DateValue {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        self.date().to_naive()?.and_hms_micro_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
            self.micros,
        )
    }

    /// Wall-clock time in `tz`; the earlier instant wins on DST overlap.
    pub fn to_zoned(&self, tz: &Tz) -> Option<DateTime<Tz>> {
        let naive = self.to_naive()?;
        tz.from_local_datetime(&naive).earliest()
    }
}

impl From<DateValue> for DateTimeValue {
    fn from(d: DateValue) -> Self {
        Self {
            year: d.year,
            month: d.month,
            day: d.day,
            ..Self::default()
        }
    }
}

impl TimestampValue {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.micros * 1000)
    }
}

fn write_micros(f: &mut fmt::Formatter<'_>, micros: u32) -> fmt::Result {
    if micros != 0 {
        write!(f, ".{micros:06}")?;
    }
    Ok(())
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.total_hours(),
            self.minutes,
            self.seconds
        )?;
        write_micros(f, self.micros)
    }
}

impl fmt::Display for DateTimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        write_micros(f, self.micros)
    }
}

impl fmt::Display for TimestampValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_utc() {
            Some(utc) => {
                write!(f, "{}", utc.format("%Y-%m-%d %H:%M:%S"))?;
                write_micros(f, self.micros)
            }
            None => write!(f, "0000-00-00 00:00:00"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_display() {
        let dt = DateTimeValue {
            year: 2024,
            month: 2,
            day: 29,
            hour: 13,
            minute: 5,
            second: 9,
            micros: 1500,
        };
        assert_eq!(dt.to_string(), "2024-02-29 13:05:09.001500");

        let t = TimeValue {
            negative: true,
            days: 1,
            hours: 2,
            minutes: 3,
            seconds: 4,
            micros: 0,
        };
        assert_eq!(t.to_string(), "-26:03:04");
        assert_eq!(t.to_duration(), TimeDelta::seconds(-(26 * 3600 + 3 * 60 + 4)));
    }

    #[test]
    fn timestamp_renders_in_utc() {
        let ts = TimestampValue {
            seconds: 0,
            micros: 0,
        };
        assert_eq!(ts.to_string(), "1970-01-01 00:00:00");
    }

    #[test]
    fn zoned_conversion() {
        let dt = DateTimeValue {
            year: 2020,
            month: 6,
            day: 1,
            hour: 12,
            ..DateTimeValue::default()
        };
        let zoned = Value::DateTime(dt)
            .to_timestamp_in(&chrono_tz::Europe::Berlin)
            .unwrap();
        assert_eq!(zoned.with_timezone(&Utc).to_rfc3339(), "2020-06-01T10:00:00+00:00");
        assert!(Value::DateTime(DateTimeValue::default())
            .to_timestamp_in(&chrono_tz::UTC)
            .is_none());
    }

    #[test]
    fn text_encoding() {
        assert_eq!(Value::Int(-7).to_text(), Some(b"-7".to_vec()));
        assert_eq!(Value::Year(0).to_text(), Some(b"0000".to_vec()));
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::Bytes(b"1".to_vec()).as_i64(), Some(1));
    }
}
