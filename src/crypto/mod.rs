//! Cryptographic helpers for dirview.
//!
//! Password hashing and verification in the LDAP `{SCHEME}` formats used
//! by the userPassword attribute, plus random secret generation for
//! auto-generated passwords.
//!
//! Supported schemes:
//! - SSHA / SSHA256 / SSHA512 - salted SHA variants
//! - SHA256 / SHA512 - unsalted digests
//! - Argon2id / bcrypt - modern KDFs
//! - MD5 / SMD5 - legacy support only (not recommended)

pub mod password;

pub use password::{generate_secret, hash_password, verify_password, HashMethod};
