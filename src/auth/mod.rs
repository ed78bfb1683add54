//! Authentication.
//!
//! Login binds against the directory with a transient connection, then
//! builds the user record from the configured view's auth projection and
//! issues a signed bearer token. A `timestamp` attribute in the auth
//! projection invalidates older tokens whenever that field changes.

pub mod anti_spam;
pub mod token;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::AuthConfig;
use crate::errors::{ApiError, DirectoryError, Result};
use crate::ldap::DirectoryHandle;
use crate::view::registry::ViewRegistry;
use crate::view::{AuthUser, JsonMap, View};

pub use anti_spam::AntiSpam;
pub use token::{Claims, TokenSigner};

/// Body of a successful login, refresh, or self-update response.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: JsonMap,
}

pub struct Auth {
    signer: TokenSigner,
    anti_spam: AntiSpam,
    view_key: String,
    directory: DirectoryHandle,
}

impl Auth {
    pub fn new(config: &AuthConfig, directory: DirectoryHandle) -> Result<Self> {
        Ok(Self {
            signer: TokenSigner::new(config),
            anti_spam: AntiSpam::new(&config.anti_spam)?,
            view_key: config.view.clone(),
            directory,
        })
    }

    pub fn anti_spam(&self) -> &AntiSpam {
        &self.anti_spam
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Key of the view whose auth projection builds user records.
    pub fn view_key(&self) -> &str {
        &self.view_key
    }

    fn auth_view<'a>(&self, views: &'a ViewRegistry) -> Result<&'a View> {
        views
            .get(&self.view_key)
            .ok_or_else(|| ApiError::Config(format!("unknown auth view {}", self.view_key)))
    }

    /// Username + password to a fresh token. Failures never reveal
    /// whether the subject exists.
    #[instrument(skip(self, views, password), fields(username = %username))]
    pub async fn login(
        &self,
        views: &ViewRegistry,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse> {
        let view = self.auth_view(views)?;
        let dn = view.try_dn(username).ok_or(ApiError::Unauthorized)?;

        match self.directory.bind(&dn, password).await {
            Ok(()) => {}
            Err(DirectoryError::InvalidCredentials) | Err(DirectoryError::NotFound) => {
                return Err(ApiError::Unauthorized)
            }
            Err(e) => return Err(e.into()),
        }

        debug!("Login bind succeeded");
        self.relogin(views, username).await
    }

    /// Reissues a token from the current auth record, so permission
    /// changes take effect on the next call.
    pub async fn relogin(&self, views: &ViewRegistry, primary_key: &str) -> Result<LoginResponse> {
        let view = self.auth_view(views)?;
        let user = view.get_auth_entry(primary_key).await?;
        let token = self.signer.issue_login(&user)?;
        Ok(LoginResponse { token, user })
    }

    /// Short-lived token for the e-mail recovery path.
    pub async fn auto_login(&self, views: &ViewRegistry, primary_key: &str) -> Result<String> {
        let view = self.auth_view(views)?;
        let user = view.get_auth_entry(primary_key).await?;
        self.signer.issue_auto_login(&user)
    }

    /// Resolves an e-mail address to the subject's primary key through the
    /// auth view.
    pub async fn resolve_mail(&self, views: &ViewRegistry, mail: &str) -> Result<String> {
        self.auth_view(views)?.resolve_primary_key_by_mail(mail).await
    }

    /// Verifies a bearer token and loads the current auth record. When
    /// the record carries a `timestamp`, a mismatch against the token's
    /// copy invalidates it.
    pub async fn authenticate(&self, views: &ViewRegistry, token: &str) -> Result<AuthUser> {
        let claims = self.signer.verify(token)?;
        let primary_key = claims
            .user
            .get("primaryKey")
            .and_then(|v| v.as_str())
            .ok_or(ApiError::Unauthorized)?;

        let view = self.auth_view(views)?;
        let record = view
            .get_auth_entry(primary_key)
            .await
            .map_err(|_| ApiError::Unauthorized)?;

        if let Some(current) = record.get("timestamp") {
            let token_copy = claims.user.get("timestamp").unwrap_or(&Value::Null);
            if current != token_copy {
                return Err(ApiError::Unauthorized);
            }
        }

        Ok(AuthUser(record))
    }
}
