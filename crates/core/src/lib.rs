//! stowage-core: Core library for the stowage storage client
//!
//! This crate provides the backend-independent pieces of stowage, including:
//! - Configuration management, including HTTP and retry tuning
//! - Alias management
//! - Path parsing and resolution
//! - Canned ACLs
//! - The ObjectStore trait implemented by the REST client
//!
//! Keeping these free of any HTTP machinery lets the CLI be tested against
//! mock stores.

pub mod acl;
pub mod alias;
pub mod config;
pub mod error;
pub mod path;
pub mod traits;

pub use acl::CannedAcl;
pub use alias::{Alias, AliasManager, Credentials};
pub use config::{Config, ConfigManager, HttpSettings};
pub use error::{Error, Result, ServiceError};
pub use path::{parse_path, ParsedPath, RemotePath};
pub use traits::{
    BucketStatus, GetOptions, ListOptions, ListResult, ObjectData, ObjectInfo, ObjectReader,
    ObjectSource, ObjectStore, ProgressFn, PutOptions,
};
