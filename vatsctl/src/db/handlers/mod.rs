//! Repository implementations for instance, extension and call record storage.
//!
//! The traits in [`repository`] are the only thing the lifecycle manager depends on.
//! Two backends implement them:
//!
//! - [`InMemoryStore`] / [`InMemoryCdr`]: process-local, the default
//! - [`PgInstances`] / [`PgExtensions`] / [`PgCdr`]: PostgreSQL, behind the `postgres` feature
//!
//! # Common Pattern
//!
//! ```ignore
//! use vatsctl::db::handlers::{InMemoryStore, InstanceRepository};
//!
//! let store = InMemoryStore::new();
//! let instances = store.list().await?;
//! ```

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod repository;

pub use in_memory::{InMemoryCdr, InMemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::{PgCdr, PgExtensions, PgInstances};
pub use repository::{CdrSource, ExtensionRepository, InstanceRepository};
