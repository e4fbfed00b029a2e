//! Repository traits consumed by the lifecycle manager.
//!
//! A repository is the data access layer for one entity. The manager only ever talks to
//! `dyn InstanceRepository` / `dyn ExtensionRepository` / `dyn CdrSource`, so the
//! backend (in-memory or PostgreSQL) is chosen at startup.
//!
//! Backends are expected to enforce the same constraints as the SQL schema in
//! `migrations/` (unique instance names, unique ports, unique usernames per instance,
//! extensions referencing an existing instance) and report violations through
//! [`crate::db::errors::DbError`] using the names in [`crate::db::errors::constraints`].

use crate::db::errors::Result;
use crate::db::models::{
    cdr::{CdrFilter, CdrRecord},
    extensions::{ExtensionCreateDBRequest, ExtensionDBResponse},
    instances::{InstanceCreateDBRequest, InstanceDBResponse, InstanceUpdateDBRequest},
};
use crate::ports::PortClaim;
use crate::types::{ExtensionId, InstanceId};

/// Durable store of PBX instances.
#[async_trait::async_trait]
pub trait InstanceRepository: Send + Sync {
    /// All instances in creation order
    async fn list(&self) -> Result<Vec<InstanceDBResponse>>;

    /// Get an instance by ID
    async fn get(&self, id: InstanceId) -> Result<Option<InstanceDBResponse>>;

    /// Get an instance by its exact name
    async fn get_by_name(&self, name: &str) -> Result<Option<InstanceDBResponse>>;

    /// Every port pair currently held, with its owner
    async fn list_ports_in_use(&self) -> Result<Vec<PortClaim>>;

    /// Insert a new instance, reserving its ports
    async fn insert(&self, request: &InstanceCreateDBRequest) -> Result<InstanceDBResponse>;

    /// Apply the supplied fields; `DbError::NotFound` if the instance is gone
    async fn update(&self, id: InstanceId, request: &InstanceUpdateDBRequest) -> Result<InstanceDBResponse>;

    /// Remove an instance and release its ports. Returns false if it did not exist.
    async fn delete(&self, id: InstanceId) -> Result<bool>;
}

/// Durable store of SIP extensions, scoped by owning instance.
#[async_trait::async_trait]
pub trait ExtensionRepository: Send + Sync {
    /// Extensions of one instance in creation order
    async fn list_by_instance(&self, instance_id: InstanceId) -> Result<Vec<ExtensionDBResponse>>;

    /// Get an extension by ID, whatever instance owns it
    async fn get(&self, id: ExtensionId) -> Result<Option<ExtensionDBResponse>>;

    /// Look up a username inside one instance
    async fn get_by_username(&self, instance_id: InstanceId, username: &str) -> Result<Option<ExtensionDBResponse>>;

    /// Insert a new extension
    async fn insert(&self, request: &ExtensionCreateDBRequest) -> Result<ExtensionDBResponse>;

    /// Delete one extension. Returns false if it did not exist.
    async fn delete(&self, id: ExtensionId) -> Result<bool>;

    /// Delete every extension of an instance, returning how many were removed.
    /// Idempotent: a second call removes nothing.
    async fn delete_by_instance(&self, instance_id: InstanceId) -> Result<u64>;

    /// Put previously deleted records back with their original IDs and timestamps.
    /// Used to compensate a cascade whose instance delete failed.
    async fn restore(&self, records: &[ExtensionDBResponse]) -> Result<()>;

    /// Distinct owner IDs of all stored extensions, for integrity checks
    async fn list_owner_ids(&self) -> Result<Vec<InstanceId>>;
}

/// Read-only access to call detail records.
#[async_trait::async_trait]
pub trait CdrSource: Send + Sync {
    /// Records matching the filter, newest first
    async fn query(&self, filter: &CdrFilter) -> Result<Vec<CdrRecord>>;
}
