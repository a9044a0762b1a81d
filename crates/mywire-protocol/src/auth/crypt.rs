//! SHA-256 crypt and the persisted password forms built on it.
//!
//! caching_sha2_password stores `$A$005$<20-byte salt><43-char hash>`,
//! where `005` is the round count in thousands as three hex digits.
//! sha256_password stores `$5$<20-byte salt><43-char hash>` with the
//! default 5000 rounds.

use sha2::{Digest, Sha256};

/// Default number of SHA-256 crypt rounds.
pub const DEFAULT_ROUNDS: u32 = 5000;
/// Salt length used by both persisted forms.
pub const SALT_LEN: usize = 20;
/// Length of the encoded hash.
pub const HASH_LEN: usize = 43;

const CACHING_SHA2_PREFIX: &str = "$A$";
const SHA256_PREFIX: &str = "$5$";

const ALPHABET: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Byte triples of the final digest, in output order.
const ENCODE_ORDER: [(usize, usize, usize); 10] = [
    (0, 10, 20),
    (21, 1, 11),
    (12, 22, 2),
    (3, 13, 23),
    (24, 4, 14),
    (15, 25, 5),
    (6, 16, 26),
    (27, 7, 17),
    (18, 28, 8),
    (9, 19, 29),
];

fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `len` bytes of `block` repeated.
fn repeat_to(block: &[u8; 32], len: usize) -> Vec<u8> {
    block.iter().copied().cycle().take(len).collect()
}

/// SHA-256 crypt (Drepper) of `key` with `salt`, returning the 43-char hash.
///
/// The salt is used as given; MySQL's 20-byte salts are not truncated to 16.
pub fn sha256_crypt(key: &[u8], salt: &[u8], rounds: u32) -> String {
    let b = digest(&[key, salt, key]);

    let mut a = Sha256::new();
    a.update(key);
    a.update(salt);
    let mut remaining = key.len();
    while remaining > 32 {
        a.update(b);
        remaining -= 32;
    }
    a.update(&b[..remaining]);
    let mut bits = key.len();
    while bits > 0 {
        if bits & 1 != 0 {
            a.update(b);
        } else {
            a.update(key);
        }
        bits >>= 1;
    }
    let a: [u8; 32] = a.finalize().into();

    let mut dp = Sha256::new();
    for _ in 0..key.len() {
        dp.update(key);
    }
    let p = repeat_to(&dp.finalize().into(), key.len());

    let mut ds = Sha256::new();
    for _ in 0..16 + usize::from(a[0]) {
        ds.update(salt);
    }
    let s = repeat_to(&ds.finalize().into(), salt.len());

    let mut c = a;
    for i in 0..rounds {
        let mut h = Sha256::new();
        if i & 1 != 0 {
            h.update(&p);
        } else {
            h.update(c);
        }
        if i % 3 != 0 {
            h.update(&s);
        }
        if i % 7 != 0 {
            h.update(&p);
        }
        if i & 1 != 0 {
            h.update(c);
        } else {
            h.update(&p);
        }
        c = h.finalize().into();
    }

    encode_digest(&c)
}

fn push_b64(out: &mut String, mut word: u32, chars: usize) {
    for _ in 0..chars {
        out.push(char::from(ALPHABET[(word & 0x3F) as usize]));
        word >>= 6;
    }
}

fn encode_digest(c: &[u8; 32]) -> String {
    let mut out = String::with_capacity(HASH_LEN);
    for (b2, b1, b0) in ENCODE_ORDER {
        let word = u32::from(c[b2]) << 16 | u32::from(c[b1]) << 8 | u32::from(c[b0]);
        push_b64(&mut out, word, 4);
    }
    push_b64(&mut out, u32::from(c[31]) << 8 | u32::from(c[30]), 3);
    out
}

/// Parsed persisted hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHash<'a> {
    pub rounds: u32,
    pub salt: &'a [u8],
    pub hash: &'a str,
}

/// `$A$<rounds/1000 as 3 hex>$<salt><hash>`
pub fn format_caching_sha2(salt: &[u8], hash: &str, rounds: u32) -> String {
    let mut out = format!("{CACHING_SHA2_PREFIX}{:03X}$", rounds / 1000);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push_str(hash);
    out
}

pub fn parse_caching_sha2(stored: &str) -> Option<StoredHash<'_>> {
    let rest = stored.strip_prefix(CACHING_SHA2_PREFIX)?;
    let (count, body) = rest.split_once('$')?;
    if count.len() != 3 {
        return None;
    }
    let rounds = u32::from_str_radix(count, 16).ok()? * 1000;
    split_salt_hash(body).map(|(salt, hash)| StoredHash { rounds, salt, hash })
}

/// `$5$<salt><hash>`
pub fn format_sha256(salt: &[u8], hash: &str) -> String {
    let mut out = String::from(SHA256_PREFIX);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push_str(hash);
    out
}

pub fn parse_sha256(stored: &str) -> Option<StoredHash<'_>> {
    let body = stored.strip_prefix(SHA256_PREFIX)?;
    split_salt_hash(body).map(|(salt, hash)| StoredHash {
        rounds: DEFAULT_ROUNDS,
        salt,
        hash,
    })
}

fn split_salt_hash(body: &str) -> Option<(&[u8], &str)> {
    if body.len() != SALT_LEN + HASH_LEN || !body.is_char_boundary(SALT_LEN) {
        return None;
    }
    let (salt, hash) = body.split_at(SALT_LEN);
    Some((salt.as_bytes(), hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vector() {
        // Published SHA-256 crypt example with the default round count.
        assert_eq!(
            sha256_crypt(b"Hello world!", b"saltstring", DEFAULT_ROUNDS),
            "5B8vYYiY.CVt1RlTTf8KbXBH3hsxY/GNooZaBBGWEc5"
        );
    }

    #[test]
    fn test_twenty_byte_salt() {
        let hash = sha256_crypt(b"secret", b"ABCDEFGHIJKLMNOPQRST", DEFAULT_ROUNDS);
        assert_eq!(hash, "JE9sOcOki6f10bl0q5vIv/iZt93mZ8p/xmSkHO/nqCC");
        assert_eq!(hash.len(), HASH_LEN);
    }

    #[test]
    fn test_caching_sha2_form() {
        let stored = format_caching_sha2(b"ABCDEFGHIJKLMNOPQRST", "x".repeat(43).as_str(), 5000);
        assert!(stored.starts_with("$A$005$ABCDEFGHIJKLMNOPQRST"));
        assert_eq!(stored.len(), 7 + SALT_LEN + HASH_LEN);

        let parsed = parse_caching_sha2(&stored).unwrap();
        assert_eq!(parsed.rounds, 5000);
        assert_eq!(parsed.salt, b"ABCDEFGHIJKLMNOPQRST");
        assert!(parse_caching_sha2("$A$005$short").is_none());
        assert!(parse_caching_sha2("*ABC").is_none());
    }

    #[test]
    fn test_sha256_form() {
        let stored = format_sha256(b"ABCDEFGHIJKLMNOPQRST", &"y".repeat(43));
        let parsed = parse_sha256(&stored).unwrap();
        assert_eq!(parsed.rounds, DEFAULT_ROUNDS);
        assert_eq!(parsed.hash.len(), HASH_LEN);
    }
}
