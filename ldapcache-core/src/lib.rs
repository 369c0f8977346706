//! ldapcache Core - Data Types
//!
//! Pure data structures shared by every other crate of the group membership
//! cache: shard descriptors, directory change events, DN helpers, the LDAP
//! filter evaluator, configuration and the error taxonomy. Nothing in here
//! touches storage.

pub mod config;
pub mod dn;
pub mod error;
pub mod event;
pub mod filter;
pub mod shard;

pub use config::{BackendKind, CacheConfig, LmdbConfig, OwnershipConfig, CONFIG_ENV};
pub use error::{CacheError, CacheResult, CatalogError, ConfigError, EventError, StorageError};
pub use event::{Attributes, ChangeEvent, Command, CommandParseError};
pub use filter::{Filter, FilterError};
pub use shard::{Shard, ShardEntry, DN_ATTRIBUTE, ENTRY_UUID, MEMBER_UIDS, UNIQUE_MEMBERS};
