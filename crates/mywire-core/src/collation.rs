//! Built-in collation table.
//!
//! The table is read-only; the two lookup maps are built on first use and
//! shared by every connection afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// A server collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collation {
    pub id: u16,
    pub charset: &'static str,
    pub name: &'static str,
    /// Whether this is the default collation of its character set
    pub is_default: bool,
}

/// Client default collation for MySQL 8.0 (`utf8mb4_0900_ai_ci`).
pub const DEFAULT_COLLATION_ID: u16 = 255;
/// `binary` pseudo-collation used for non-character columns.
pub const BINARY_COLLATION_ID: u16 = 63;

const fn c(id: u16, charset: &'static str, name: &'static str, is_default: bool) -> Collation {
    Collation {
        id,
        charset,
        name,
        is_default,
    }
}

static COLLATIONS: &[Collation] = &[
    c(1, "big5", "big5_chinese_ci", true),
    c(8, "latin1", "latin1_swedish_ci", true),
    c(11, "ascii", "ascii_general_ci", true),
    c(28, "gbk", "gbk_chinese_ci", true),
    c(33, "utf8", "utf8_general_ci", true),
    c(45, "utf8mb4", "utf8mb4_general_ci", false),
    c(46, "utf8mb4", "utf8mb4_bin", false),
    c(47, "latin1", "latin1_bin", false),
    c(48, "latin1", "latin1_general_ci", false),
    c(63, "binary", "binary", true),
    c(65, "ascii", "ascii_bin", false),
    c(83, "utf8", "utf8_bin", false),
    c(192, "utf8", "utf8_unicode_ci", false),
    c(224, "utf8mb4", "utf8mb4_unicode_ci", false),
    c(248, "gb18030", "gb18030_chinese_ci", true),
    c(255, "utf8mb4", "utf8mb4_0900_ai_ci", true),
    c(278, "utf8mb4", "utf8mb4_0900_as_cs", false),
    c(309, "utf8mb4", "utf8mb4_0900_bin", false),
];

struct Tables {
    by_id: HashMap<u16, &'static Collation>,
    by_name: HashMap<&'static str, &'static Collation>,
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| Tables {
        by_id: COLLATIONS.iter().map(|c| (c.id, c)).collect(),
        by_name: COLLATIONS.iter().map(|c| (c.name, c)).collect(),
    })
}

/// Look up a collation by numeric id.
pub fn by_id(id: u16) -> Result<&'static Collation> {
    tables()
        .by_id
        .get(&id)
        .copied()
        .ok_or_else(|| Error::UnknownCollation(format!("id {id}")))
}

/// Look up a collation by name (case-insensitive).
pub fn by_name(name: &str) -> Result<&'static Collation> {
    let lower = name.to_ascii_lowercase();
    tables()
        .by_name
        .get(lower.as_str())
        .copied()
        .ok_or_else(|| Error::UnknownCollation(name.to_string()))
}

/// Default collation of a character set.
pub fn default_for_charset(charset: &str) -> Result<&'static Collation> {
    let charset = if charset.eq_ignore_ascii_case("utf8mb3") {
        "utf8"
    } else {
        charset
    };
    COLLATIONS
        .iter()
        .find(|c| c.is_default && c.charset.eq_ignore_ascii_case(charset))
        .ok_or_else(|| Error::UnknownCollation(format!("charset {charset}")))
}

/// All built-in collations, in id order.
pub fn all() -> &'static [Collation] {
    COLLATIONS
}

impl Collation {
    pub fn is_binary(&self) -> bool {
        self.id == BINARY_COLLATION_ID
    }

    /// The low byte of the id, as carried in handshake packets.
    pub fn handshake_byte(&self) -> u8 {
        (self.id & 0xFF) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_and_name() {
        let c = by_id(255).unwrap();
        assert_eq!(c.name, "utf8mb4_0900_ai_ci");
        assert!(c.is_default);
        assert_eq!(by_name("UTF8MB4_BIN").unwrap().id, 46);
        assert!(by_id(63).unwrap().is_binary());
    }

    #[test]
    fn unknown_collation_is_typed() {
        assert!(matches!(by_id(9999), Err(Error::UnknownCollation(_))));
        assert!(matches!(by_name("klingon_ci"), Err(Error::UnknownCollation(_))));
    }

    #[test]
    fn charset_defaults() {
        assert_eq!(default_for_charset("utf8mb4").unwrap().id, 255);
        assert_eq!(default_for_charset("utf8mb3").unwrap().id, 33);
        assert_eq!(default_for_charset("binary").unwrap().id, 63);
    }

    #[test]
    fn table_ids_are_unique_and_sorted() {
        let ids: Vec<u16> = all().iter().map(|c| c.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }
}
