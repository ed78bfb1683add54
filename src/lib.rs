//! # dirview
//!
//! Configuration-driven REST API for LDAP user and group administration.
//!
//! This crate provides:
//! - A declarative view engine projecting directory entries into typed
//!   JSON records and translating edits into directory write plans
//! - A directory gateway over LDAP with connection pooling
//! - JWT authentication with e-mail auto-login and anti-spam challenges
//! - Password hashing in LDAP `{SCHEME}` formats and a breached-password
//!   check
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dirview::config::AppConfig;
//! use dirview::ldap::{DirectoryHandle, LdapGateway};
//! use dirview::pwned::PwnedPasswords;
//! use dirview::view::registry::ViewRegistry;
//!
//! # async fn example() -> dirview::errors::Result<()> {
//! let config = AppConfig::load("config.yaml")?;
//! let directory: DirectoryHandle = Arc::new(LdapGateway::new(config.ldap.clone())?);
//! let views = ViewRegistry::new(
//!     &config.views,
//!     &config.ldap.prefix,
//!     directory,
//!     Arc::new(PwnedPasswords::new()),
//! )
//! .await?;
//! let users = views.get("users").expect("configured view");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod http;
pub mod ldap;
pub mod mail;
pub mod pwned;
pub mod view;

pub use errors::{ApiError, DirectoryError, Result};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
