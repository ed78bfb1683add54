//! Directory gateway for dirview.
//!
//! A thin boundary over the LDAP transport:
//! - the [`Directory`] trait with the five primitives the view engine uses
//! - a deadpool-backed production gateway over `ldap3`
//! - RDN and filter escaping
//! - write-plan data structures (addlist, modlist, fetch record)

pub mod config;
pub mod connection;
pub mod dn;
pub mod filter;
pub mod gateway;
pub mod operations;
pub mod pool;

pub use config::LdapConfig;
pub use connection::LdapConnection;
pub use dn::{escape_filter_value, escape_rdn_value, try_escape_rdn_value, unescape_rdn_value};
pub use filter::LdapFilter;
pub use gateway::{Directory, DirectoryHandle, LdapGateway};
pub use operations::{Addlist, Entry, FetchRecord, ModOp, Modlist, SearchScope};
pub use pool::{create_pool, LdapPool, LdapPoolExt, PooledConnection};
