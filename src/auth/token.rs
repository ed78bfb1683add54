//! Bearer token signing and verification.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::errors::{ApiError, Result};
use crate::view::JsonMap;

/// Token payload: the auth-projection record plus expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user: JsonMap,
    pub exp: i64,
}

/// Issues and verifies bearer tokens with a configurable header prefix.
/// Login and auto-login tokens share the signing key and differ only in
/// lifetime.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    header_prefix: String,
    expiration: i64,
    auto_login_expiration: i64,
}

impl TokenSigner {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret_key.as_bytes()),
            header_prefix: config.header_prefix.clone(),
            expiration: config.expiration,
            auto_login_expiration: config.auto_login_expiration,
        }
    }

    fn issue(&self, user: &JsonMap, lifetime: i64) -> Result<String> {
        let claims = Claims {
            user: user.clone(),
            exp: Utc::now().timestamp() + lifetime,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Config(format!("token signing failed: {}", e)))
    }

    pub fn issue_login(&self, user: &JsonMap) -> Result<String> {
        self.issue(user, self.expiration)
    }

    pub fn issue_auto_login(&self, user: &JsonMap) -> Result<String> {
        self.issue(user, self.auto_login_expiration)
    }

    /// Decodes and validates a token; any failure is `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }

    /// Extracts the token from an Authorization header value with the
    /// configured prefix.
    pub fn strip_header<'a>(&self, header_value: &'a str) -> Option<&'a str> {
        let rest = header_value.strip_prefix(&self.header_prefix)?;
        let token = rest.strip_prefix(' ')?;
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}
