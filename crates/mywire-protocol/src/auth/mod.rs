//! MySQL authentication plugins.
//!
//! This module implements both sides of:
//! - `mysql_native_password`: SHA1-based (legacy, MySQL < 8.0 default)
//! - `caching_sha2_password`: SHA256-based (MySQL 8.0+ default)
//! - `sha256_password`: cleartext over TLS or RSA-encrypted
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
//! ```
//!
//! stored as `*` + uppercase hex of `SHA1(SHA1(password))`.
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + salt))
//! ```
//!
//! Full auth requires TLS or RSA public key encryption. The persisted form
//! is a SHA-256 crypt hash, see [`crypt`].

pub mod cache;
pub mod crypt;

pub use cache::Sha2Cache;

use std::fmt;

use rand::Rng;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use mywire_core::error::AuthErrorKind;
use mywire_core::{Error, Result};

/// Well-known authentication plugin names.
pub mod plugins {
    /// SHA1-based authentication (legacy default)
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// SHA256-based authentication (MySQL 8.0+ default)
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    /// RSA-based SHA256 authentication
    pub const SHA256_PASSWORD: &str = "sha256_password";
}

/// AuthMoreData status bytes for caching_sha2_password.
pub mod caching_sha2 {
    /// Request for public key (client sends 0x02)
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth success
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed (switch to secure channel or RSA)
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// sha256_password public key request byte.
pub mod sha256 {
    pub const REQUEST_PUBLIC_KEY: u8 = 0x01;
}

/// Length of the handshake salt.
pub const SALT_LEN: usize = 20;

/// An authentication plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    NativePassword,
    Sha256Password,
    CachingSha2Password,
}

impl AuthMethod {
    pub const fn name(self) -> &'static str {
        match self {
            AuthMethod::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthMethod::Sha256Password => plugins::SHA256_PASSWORD,
            AuthMethod::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Ok(AuthMethod::NativePassword),
            plugins::SHA256_PASSWORD => Ok(AuthMethod::Sha256Password),
            plugins::CACHING_SHA2_PASSWORD => Ok(AuthMethod::CachingSha2Password),
            other => Err(Error::auth(
                AuthErrorKind::UnsupportedMethod,
                format!("authentication plugin '{other}' is not supported"),
            )),
        }
    }

    /// Client response for `password` given the server `salt`.
    ///
    /// sha256_password has no challenge-response form; its response is the
    /// NUL-terminated cleartext, which may only travel over TLS.
    pub fn scramble(self, password: &str, salt: &[u8]) -> Vec<u8> {
        match self {
            AuthMethod::NativePassword => scramble_native(password, salt),
            AuthMethod::CachingSha2Password => scramble_caching_sha2(password, salt),
            AuthMethod::Sha256Password => {
                if password.is_empty() {
                    Vec::new()
                } else {
                    cleartext(password)
                }
            }
        }
    }

    /// Persisted `authentication_string` for `password` with a fresh salt.
    pub fn store(self, password: &str) -> String {
        self.store_with_salt(password, &generate_salt())
    }

    pub fn store_with_salt(self, password: &str, salt: &[u8; crypt::SALT_LEN]) -> String {
        if password.is_empty() {
            return String::new();
        }
        match self {
            AuthMethod::NativePassword => {
                format!("*{}", hex::encode_upper(native_stage2(password)))
            }
            AuthMethod::CachingSha2Password => {
                let hash = crypt::sha256_crypt(password.as_bytes(), salt, crypt::DEFAULT_ROUNDS);
                crypt::format_caching_sha2(salt, &hash, crypt::DEFAULT_ROUNDS)
            }
            AuthMethod::Sha256Password => {
                let hash = crypt::sha256_crypt(password.as_bytes(), salt, crypt::DEFAULT_ROUNDS);
                crypt::format_sha256(salt, &hash)
            }
        }
    }

    /// Check a client response against the stored credential.
    ///
    /// For mysql_native_password `response` is the scramble computed with
    /// `salt`. For the SHA-256 methods it is the recovered cleartext
    /// password (a trailing NUL is ignored); `salt` is unused.
    pub fn validate(self, stored: &str, response: &[u8], salt: &[u8]) -> Result<()> {
        if stored.is_empty() {
            return if response.is_empty() || response == [0] {
                Ok(())
            } else {
                Err(mismatch())
            };
        }
        let ok = match self {
            AuthMethod::NativePassword => validate_native(stored, response, salt),
            AuthMethod::CachingSha2Password => {
                let password = strip_nul(response);
                crypt::parse_caching_sha2(stored).is_some_and(|parsed| {
                    crypt::sha256_crypt(password, parsed.salt, parsed.rounds) == parsed.hash
                })
            }
            AuthMethod::Sha256Password => {
                let password = strip_nul(response);
                crypt::parse_sha256(stored).is_some_and(|parsed| {
                    crypt::sha256_crypt(password, parsed.salt, parsed.rounds) == parsed.hash
                })
            }
        };
        if ok { Ok(()) } else { Err(mismatch()) }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn mismatch() -> Error {
    Error::auth(AuthErrorKind::Mismatch, "password does not match")
}

fn strip_nul(data: &[u8]) -> &[u8] {
    data.strip_suffix(&[0]).unwrap_or(data)
}

fn cleartext(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// MySQL sends a 20-byte scramble followed by a NUL in some packets; drop it.
pub fn normalize_salt(salt: &[u8]) -> &[u8] {
    if salt.len() == SALT_LEN + 1 && salt.last() == Some(&0) {
        &salt[..SALT_LEN]
    } else {
        salt
    }
}

/// mysql_native_password mixes in at most the first 20 salt bytes.
fn native_salt(salt: &[u8]) -> &[u8] {
    let salt = normalize_salt(salt);
    &salt[..salt.len().min(SALT_LEN)]
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `SHA1(SHA1(password))`, the value behind the `*HEX` storage form.
pub fn native_stage2(password: &str) -> [u8; 20] {
    sha1(&[&sha1(&[password.as_bytes()])])
}

/// mysql_native_password client scramble; empty for an empty password.
pub fn scramble_native(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let salt = native_salt(salt);
    let stage1 = sha1(&[password.as_bytes()]);
    let stage2 = sha1(&[&stage1]);
    xor(&stage1, &sha1(&[salt, &stage2]))
}

fn validate_native(stored: &str, response: &[u8], salt: &[u8]) -> bool {
    let Some(stage2) = stored.strip_prefix('*').and_then(|h| hex::decode(h).ok()) else {
        return false;
    };
    if stage2.len() != 20 || response.len() != 20 {
        return false;
    }
    let salt = native_salt(salt);
    let candidate = xor(response, &sha1(&[salt, &stage2]));
    sha1(&[&candidate]).as_slice() == stage2.as_slice()
}

/// caching_sha2_password client scramble; empty for an empty password.
pub fn scramble_caching_sha2(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let salt = normalize_salt(salt);
    let stage1 = sha256(&[password.as_bytes()]);
    let stage2 = sha256(&[&stage1]);
    xor(&stage1, &sha256(&[&stage2, salt]))
}

/// `SHA256(SHA256(password))`, the value kept in [`Sha2Cache`].
pub fn sha2_stage2(password: &[u8]) -> [u8; 32] {
    sha256(&[&sha256(&[password])])
}

/// Check a caching_sha2_password scramble against a cached stage-2 hash.
pub fn validate_fast(stage2: &[u8; 32], response: &[u8], salt: &[u8]) -> Result<()> {
    if response.len() != 32 {
        return Err(mismatch());
    }
    let salt = normalize_salt(salt);
    let candidate = xor(response, &sha256(&[stage2, salt]));
    if sha256(&[&candidate]) == *stage2 {
        Ok(())
    } else {
        Err(mismatch())
    }
}

/// `(password || 0x00) XOR cycle(salt)`
pub fn xor_with_salt(password: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password);
    out.push(0);
    if salt.is_empty() {
        return out;
    }
    for (i, byte) in out.iter_mut().enumerate() {
        *byte ^= salt[i % salt.len()];
    }
    out
}

/// Encrypt `password` for the RSA full-authentication path.
///
/// The plaintext is the NUL-terminated password XORed with the salt and
/// the padding is OAEP with SHA-1. The server key may be SPKI or PKCS#1 PEM.
pub fn encrypt_password(password: &str, salt: &[u8], public_key_pem: &str) -> Result<Vec<u8>> {
    let key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_key_pem))
        .map_err(|e| {
            Error::auth(
                AuthErrorKind::PublicKey,
                format!("failed to parse RSA public key PEM: {e}"),
            )
        })?;
    let plaintext = xor_with_salt(password.as_bytes(), normalize_salt(salt));
    key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), &plaintext)
        .map_err(|e| {
            Error::auth(
                AuthErrorKind::PublicKey,
                format!("RSA OAEP encryption failed: {e}"),
            )
        })
}

/// Server RSA key pair for the public-key exchange.
#[derive(Clone)]
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public_pem: String,
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public_pem", &self.public_pem)
            .finish_non_exhaustive()
    }
}

impl RsaKeyPair {
    /// Generate a fresh key of `bits` bits.
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| {
            Error::auth(
                AuthErrorKind::PublicKey,
                format!("RSA key generation failed: {e}"),
            )
        })?;
        Self::from_private_key(private)
    }

    /// Load a PKCS#8 or PKCS#1 private key.
    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| {
                Error::auth(
                    AuthErrorKind::PublicKey,
                    format!("failed to parse RSA private key PEM: {e}"),
                )
            })?;
        Self::from_private_key(private)
    }

    fn from_private_key(private: RsaPrivateKey) -> Result<Self> {
        let public_pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| {
                Error::auth(
                    AuthErrorKind::PublicKey,
                    format!("failed to encode RSA public key: {e}"),
                )
            })?;
        Ok(Self {
            private,
            public_pem,
        })
    }

    /// SPKI PEM sent to clients in AuthMoreData.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    pub fn private_key_pem(&self) -> Result<String> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| (*pem).clone())
            .map_err(|e| {
                Error::auth(
                    AuthErrorKind::PublicKey,
                    format!("failed to encode RSA private key: {e}"),
                )
            })
    }

    /// Recover the cleartext password from a client ciphertext.
    pub fn decrypt_password(&self, ciphertext: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
        let masked = self
            .private
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map_err(|_| mismatch())?;
        let salt = normalize_salt(salt);
        let mut plain: Vec<u8> = if salt.is_empty() {
            masked
        } else {
            masked
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ salt[i % salt.len()])
                .collect()
        };
        if plain.last() == Some(&0) {
            plain.pop();
        }
        Ok(plain)
    }
}

/// 20 random printable bytes, excluding `$` and NUL.
///
/// Used both as the handshake salt and as the SHA-256 crypt salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut rng = OsRng;
    let mut salt = [0u8; SALT_LEN];
    for byte in &mut salt {
        *byte = loop {
            let candidate: u8 = rng.gen_range(0x21..=0x7E);
            if candidate != b'$' {
                break candidate;
            }
        };
    }
    salt
}
