//! Password hashing for the directory's userPassword attribute.
//!
//! Produces and verifies LDAP `{SCHEME}`-prefixed hashes. The scheme is
//! selected per field by the `hashing` config value; salted schemes draw a
//! fresh salt per call, so two hashes of the same plaintext never compare
//! equal.

use crate::errors::{ApiError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher as Argon2Hasher, SaltString},
    Argon2, PasswordVerifier as Argon2Verifier,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bcrypt::{hash as bcrypt_hash, verify as bcrypt_verify, DEFAULT_COST};
use md5::Digest as _;
use rand::{Rng, RngCore};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;

/// Supported password hash schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    /// Salted SHA-1 (LDAP standard default)
    Ssha,
    /// Salted SHA-256
    Ssha256,
    /// Salted SHA-512
    Ssha512,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
    /// Argon2id
    Argon2id,
    /// bcrypt
    Bcrypt,
    /// MD5 (legacy only)
    Md5,
    /// Salted MD5 (legacy only)
    Smd5,
    /// Plain text (testing only)
    Plain,
}

impl HashMethod {
    /// Returns the LDAP scheme prefix for this method.
    pub fn scheme(&self) -> &'static str {
        match self {
            HashMethod::Ssha => "{SSHA}",
            HashMethod::Ssha256 => "{SSHA256}",
            HashMethod::Ssha512 => "{SSHA512}",
            HashMethod::Sha256 => "{SHA256}",
            HashMethod::Sha512 => "{SHA512}",
            HashMethod::Argon2id => "{ARGON2}",
            HashMethod::Bcrypt => "{BCRYPT}",
            HashMethod::Md5 => "{MD5}",
            HashMethod::Smd5 => "{SMD5}",
            HashMethod::Plain => "",
        }
    }

    /// Parses a configured scheme name. Accepts both the scheme mnemonics
    /// and the descriptive names used in config files
    /// (e.g. "salted_sha1", "SSHA", "{SSHA}").
    pub fn parse(s: &str) -> Option<Self> {
        let norm = s.trim_matches(|c| c == '{' || c == '}').to_uppercase();
        match norm.as_str() {
            "SSHA" | "SALTED_SHA1" => Some(HashMethod::Ssha),
            "SSHA256" | "SALTED_SHA256" => Some(HashMethod::Ssha256),
            "SSHA512" | "SALTED_SHA512" => Some(HashMethod::Ssha512),
            "SHA256" => Some(HashMethod::Sha256),
            "SHA512" => Some(HashMethod::Sha512),
            "ARGON2" | "ARGON2ID" => Some(HashMethod::Argon2id),
            "BCRYPT" => Some(HashMethod::Bcrypt),
            "MD5" => Some(HashMethod::Md5),
            "SMD5" | "SALTED_MD5" => Some(HashMethod::Smd5),
            "PLAIN" | "CLEAR" | "CLEARTEXT" => Some(HashMethod::Plain),
            _ => None,
        }
    }

    /// Detects the scheme of a stored hash.
    pub fn detect(hash: &str) -> Option<Self> {
        let upper = hash.to_uppercase();
        if upper.starts_with("{SSHA512}") {
            Some(HashMethod::Ssha512)
        } else if upper.starts_with("{SSHA256}") {
            Some(HashMethod::Ssha256)
        } else if upper.starts_with("{SSHA}") {
            Some(HashMethod::Ssha)
        } else if upper.starts_with("{SHA512}") {
            Some(HashMethod::Sha512)
        } else if upper.starts_with("{SHA256}") {
            Some(HashMethod::Sha256)
        } else if upper.starts_with("{ARGON2}") {
            Some(HashMethod::Argon2id)
        } else if upper.starts_with("{BCRYPT}") || hash.starts_with("$2") {
            Some(HashMethod::Bcrypt)
        } else if upper.starts_with("{SMD5}") {
            Some(HashMethod::Smd5)
        } else if upper.starts_with("{MD5}") {
            Some(HashMethod::Md5)
        } else {
            None
        }
    }
}

impl Default for HashMethod {
    fn default() -> Self {
        HashMethod::Ssha
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

fn strip_scheme<'a>(hash: &'a str, method: HashMethod) -> &'a str {
    let scheme = method.scheme();
    if hash.len() >= scheme.len() && hash[..scheme.len()].eq_ignore_ascii_case(scheme) {
        &hash[scheme.len()..]
    } else {
        hash
    }
}

fn digest(algo: HashMethod, password: &[u8], salt: &[u8]) -> Vec<u8> {
    match algo {
        HashMethod::Ssha => {
            let mut h = Sha1::new();
            h.update(password);
            h.update(salt);
            h.finalize().to_vec()
        }
        HashMethod::Ssha256 | HashMethod::Sha256 => {
            let mut h = Sha256::new();
            h.update(password);
            h.update(salt);
            h.finalize().to_vec()
        }
        HashMethod::Ssha512 | HashMethod::Sha512 => {
            let mut h = Sha512::new();
            h.update(password);
            h.update(salt);
            h.finalize().to_vec()
        }
        HashMethod::Smd5 | HashMethod::Md5 => {
            let mut h = md5::Md5::new();
            h.update(password);
            h.update(salt);
            h.finalize().to_vec()
        }
        _ => unreachable!("digest called for non-digest scheme"),
    }
}

fn digest_len(method: HashMethod) -> usize {
    match method {
        HashMethod::Ssha => 20,
        HashMethod::Ssha256 | HashMethod::Sha256 => 32,
        HashMethod::Ssha512 | HashMethod::Sha512 => 64,
        HashMethod::Smd5 | HashMethod::Md5 => 16,
        _ => 0,
    }
}

fn salt_len(method: HashMethod) -> usize {
    match method {
        HashMethod::Ssha | HashMethod::Smd5 => 8,
        _ => 16,
    }
}

fn hash_salted(method: HashMethod, password: &str) -> String {
    let mut salt = vec![0u8; salt_len(method)];
    rand::thread_rng().fill_bytes(&mut salt);

    let digest = digest(method, password.as_bytes(), &salt);
    let mut hash_with_salt = Vec::with_capacity(digest.len() + salt.len());
    hash_with_salt.extend_from_slice(&digest);
    hash_with_salt.extend_from_slice(&salt);

    format!("{}{}", method.scheme(), BASE64.encode(&hash_with_salt))
}

fn verify_salted(method: HashMethod, password: &str, hash: &str) -> Result<bool> {
    let decoded = BASE64
        .decode(strip_scheme(hash, method))
        .map_err(|e| ApiError::bad_request(format!("invalid password hash: {}", e)))?;

    let dlen = digest_len(method);
    if decoded.len() < dlen {
        return Err(ApiError::bad_request("invalid password hash length"));
    }
    let (stored, salt) = decoded.split_at(dlen);
    let computed = digest(method, password.as_bytes(), salt);
    Ok(constant_time_eq(&computed, stored))
}

fn hash_plain_digest(method: HashMethod, password: &str) -> String {
    let digest = digest(method, password.as_bytes(), &[]);
    format!("{}{}", method.scheme(), BASE64.encode(&digest))
}

fn verify_plain_digest(method: HashMethod, password: &str, hash: &str) -> bool {
    let computed = BASE64.encode(digest(method, password.as_bytes(), &[]));
    strip_scheme(hash, method) == computed
}

/// Hashes a password with the given scheme.
pub fn hash_password(password: &str, method: HashMethod) -> Result<String> {
    match method {
        HashMethod::Ssha | HashMethod::Ssha256 | HashMethod::Ssha512 | HashMethod::Smd5 => {
            Ok(hash_salted(method, password))
        }
        HashMethod::Sha256 | HashMethod::Sha512 | HashMethod::Md5 => {
            Ok(hash_plain_digest(method, password))
        }
        HashMethod::Argon2id => {
            let salt = SaltString::generate(&mut OsRng);
            let hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| ApiError::Config(format!("argon2 hash failed: {}", e)))?
                .to_string();
            Ok(format!("{{ARGON2}}{}", hash))
        }
        HashMethod::Bcrypt => {
            let hash = bcrypt_hash(password, DEFAULT_COST)
                .map_err(|e| ApiError::Config(format!("bcrypt hash failed: {}", e)))?;
            Ok(format!("{{BCRYPT}}{}", hash))
        }
        HashMethod::Plain => Ok(password.to_string()),
    }
}

/// Verifies a password against a stored `{SCHEME}` hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let method = match HashMethod::detect(hash) {
        Some(m) => m,
        None => return Ok(password == hash),
    };
    match method {
        HashMethod::Ssha | HashMethod::Ssha256 | HashMethod::Ssha512 | HashMethod::Smd5 => {
            verify_salted(method, password, hash)
        }
        HashMethod::Sha256 | HashMethod::Sha512 | HashMethod::Md5 => {
            Ok(verify_plain_digest(method, password, hash))
        }
        HashMethod::Argon2id => {
            let parsed = argon2::PasswordHash::new(strip_scheme(hash, method))
                .map_err(|e| ApiError::bad_request(format!("invalid argon2 hash: {}", e)))?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        }
        HashMethod::Bcrypt => bcrypt_verify(password, strip_scheme(hash, method))
            .map_err(|e| ApiError::bad_request(format!("bcrypt verify failed: {}", e))),
        HashMethod::Plain => Ok(password == hash),
    }
}

const SECRET_CHARSET: &[u8] = b"abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SECRET_LEN: usize = 24;

/// Generates a cryptographically strong random secret, used when a
/// password field with `autoGenerate` receives an empty assignment.
pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    (0..SECRET_LEN)
        .map(|_| SECRET_CHARSET[rng.gen_range(0..SECRET_CHARSET.len())] as char)
        .collect()
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
