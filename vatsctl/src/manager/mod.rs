//! Instance lifecycle: creation with port assignment, partial updates, cascading
//! deletes and the integrity check over extension ownership.
//!
//! # Locking
//!
//! - The *registry lock* serializes every check-then-reserve over names and ports:
//!   create, and updates that touch the name or a port.
//! - The per-instance lock ([`locks::InstanceLocks`]) serializes update, delete, extension
//!   listing and extension create/delete for one instance.
//!
//! When both are needed the instance lock is taken first.
//!
//! # Cancellation
//!
//! Mutations run on a spawned task. A caller that stops waiting (a dropped HTTP
//! request, a timeout) does not interrupt them halfway; the operation runs to
//! completion or not at all.

pub mod extensions;
pub mod integrity;
pub mod locks;
pub mod validation;

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use rand::prelude::RngExt;
use rand::rng;
use tokio::sync::Mutex;
use tracing::{Instrument, instrument};
use uuid::Uuid;

use crate::config::SeedExtension;
use crate::db::errors::{DbError, constraints};
use crate::db::handlers::{ExtensionRepository, InstanceRepository};
use crate::db::models::{
    extensions::{ExtensionDBResponse, SipSecret},
    instances::{InstanceCreateDBRequest, InstanceDBResponse, InstanceStatus, InstanceUpdateDBRequest},
};
use crate::errors::{Error, Result};
use crate::ports::{PortAllocator, PortPair, PortPolicy};
use crate::types::{InstanceId, abbrev_uuid};

pub use extensions::{ExtensionProvisioner, NewExtension};
pub use integrity::{IntegrityReport, OrphanGroup};
pub use locks::InstanceLocks;

const SEED_PASSWORD_LEN: usize = 16;
const SEED_PASSWORD_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Run a mutation on its own task so it completes even if the caller goes away.
pub(crate) async fn run_detached<T, F>(operation: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    match tokio::spawn(operation.in_current_span()).await {
        Ok(result) => result,
        Err(e) => Err(Error::Other(anyhow!("mutation task failed: {e}"))),
    }
}

fn generate_password() -> String {
    let mut rng = rng();
    (0..SEED_PASSWORD_LEN)
        .map(|_| SEED_PASSWORD_CHARSET[rng.random_range(0..SEED_PASSWORD_CHARSET.len())] as char)
        .collect()
}

/// Caller intent for a new instance.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub name: String,
    pub sip_port: i64,
    /// Accepted only when it matches the configured offset from `sip_port`
    pub http_port: Option<i64>,
    pub seed_default_extensions: bool,
}

/// Partial update. Outer `None` leaves a field alone; `Some(None)` is an explicit null
/// and is rejected.
#[derive(Debug, Clone, Default)]
pub struct InstancePatch {
    pub name: Option<Option<String>>,
    pub sip_port: Option<Option<i64>>,
    pub http_port: Option<Option<i64>>,
    pub status: Option<Option<String>>,
}

/// Result of a create: the instance plus whatever seeding produced.
#[derive(Debug, Clone)]
pub struct CreatedInstance {
    pub instance: InstanceDBResponse,
    pub seeded: Vec<ExtensionDBResponse>,
    /// One entry per starter extension that could not be provisioned
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct LifecycleManager {
    instances: Arc<dyn InstanceRepository>,
    extensions: Arc<dyn ExtensionRepository>,
    allocator: PortAllocator,
    registry: Arc<Mutex<()>>,
    locks: InstanceLocks,
    provisioner: ExtensionProvisioner,
    seed: Arc<[SeedExtension]>,
}

impl LifecycleManager {
    pub fn new(
        instances: Arc<dyn InstanceRepository>,
        extensions: Arc<dyn ExtensionRepository>,
        policy: PortPolicy,
        seed: Vec<SeedExtension>,
    ) -> Self {
        let locks = InstanceLocks::new();
        let provisioner = ExtensionProvisioner::new(instances.clone(), extensions.clone(), locks.clone());
        Self {
            instances,
            extensions,
            allocator: PortAllocator::new(policy),
            registry: Arc::new(Mutex::new(())),
            locks,
            provisioner,
            seed: seed.into(),
        }
    }

    /// Extension operations, sharing this manager's instance locks.
    pub fn extensions(&self) -> &ExtensionProvisioner {
        &self.provisioner
    }

    pub fn port_policy(&self) -> &PortPolicy {
        self.allocator.policy()
    }

    #[instrument(skip(self), err)]
    pub async fn list_instances(&self) -> Result<Vec<InstanceDBResponse>> {
        Ok(self.instances.list().await?)
    }

    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&id)), err)]
    pub async fn get_instance(&self, id: InstanceId) -> Result<InstanceDBResponse> {
        self.instances.get(id).await?.ok_or_else(|| instance_not_found(id))
    }

    #[instrument(skip(self, request), fields(name = %request.name, sip_port = request.sip_port), err)]
    pub async fn create_instance(&self, request: NewInstance) -> Result<CreatedInstance> {
        let this = self.clone();
        run_detached(async move { this.create_inner(request).await }).await
    }

    async fn create_inner(&self, request: NewInstance) -> Result<CreatedInstance> {
        let name = validation::instance_name(&request.name)?;

        let registry = self.registry.lock().await;
        if self.instances.get_by_name(&name).await?.is_some() {
            return Err(name_taken(&name));
        }

        let claims = self.instances.list_ports_in_use().await?;
        let ports = self.allocator.allocate(request.sip_port, &claims)?;
        if let Some(http_port) = request.http_port
            && http_port != i64::from(ports.http_port)
        {
            return Err(Error::InvalidPort {
                port: http_port,
                message: format!(
                    "http_port must be sip_port + {} ({})",
                    self.allocator.policy().http_offset,
                    ports.http_port
                ),
            });
        }

        let insert = InstanceCreateDBRequest {
            name: name.clone(),
            ports,
            status: InstanceStatus::Running,
        };
        let instance = match self.instances.insert(&insert).await {
            Ok(instance) => instance,
            Err(e) => return Err(self.backstop_error(e, &name, ports).await),
        };
        drop(registry);

        tracing::info!(
            instance_id = %abbrev_uuid(&instance.id),
            sip_port = instance.sip_port,
            http_port = instance.http_port,
            "Created instance"
        );

        let (seeded, warnings) = if request.seed_default_extensions {
            self.seed_extensions(instance.id).await
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(CreatedInstance {
            instance,
            seeded,
            warnings,
        })
    }

    /// Best-effort provisioning of the configured starter extensions.
    async fn seed_extensions(&self, instance_id: InstanceId) -> (Vec<ExtensionDBResponse>, Vec<String>) {
        let _guard = self.locks.lock(instance_id).await;
        let mut seeded = Vec::with_capacity(self.seed.len());
        let mut warnings = Vec::new();

        for starter in self.seed.iter() {
            let input = NewExtension {
                username: starter.username.clone(),
                password: SipSecret::new(starter.password.clone().unwrap_or_else(generate_password)),
                caller_id: starter.caller_id.clone().unwrap_or_else(|| starter.username.clone()),
                account_code: None,
                context: starter.context.clone(),
            };
            match self.provisioner.create_locked(instance_id, input).await {
                Ok(extension) => seeded.push(extension),
                Err(e) => {
                    tracing::warn!(username = %starter.username, error = %e, "Failed to seed extension");
                    warnings.push(format!("failed to seed extension {}: {}", starter.username, e.user_message()));
                }
            }
        }
        (seeded, warnings)
    }

    #[instrument(skip(self, patch), fields(instance_id = %abbrev_uuid(&id)), err)]
    pub async fn update_instance(&self, id: InstanceId, patch: InstancePatch) -> Result<InstanceDBResponse> {
        let this = self.clone();
        run_detached(async move { this.update_inner(id, patch).await }).await
    }

    async fn update_inner(&self, id: InstanceId, patch: InstancePatch) -> Result<InstanceDBResponse> {
        let _guard = self.locks.lock(id).await;
        let current = self.instances.get(id).await?.ok_or_else(|| instance_not_found(id))?;

        let name = match patch.name {
            None => None,
            Some(None) => {
                return Err(Error::InvalidName {
                    name: String::new(),
                    reason: "name cannot be null".to_string(),
                });
            }
            Some(Some(raw)) => Some(validation::instance_name(&raw)?).filter(|name| *name != current.name),
        };
        let sip_port = reject_null_port(patch.sip_port, "sip_port")?;
        let http_port = reject_null_port(patch.http_port, "http_port")?;
        let status = match patch.status {
            None => None,
            Some(None) => return Err(Error::invalid_input("status", "status cannot be null")),
            Some(Some(raw)) => Some(
                raw.parse::<InstanceStatus>()
                    .map_err(|message| Error::invalid_input("status", message))?,
            ),
        };

        let mut update = InstanceUpdateDBRequest {
            name,
            ports: None,
            status,
        };
        let touches_ports = sip_port.is_some() || http_port.is_some();

        if update.name.is_none() && !touches_ports {
            if update.is_empty() {
                return Ok(current);
            }
            return self.apply_update(id, &update, &current.name, current.ports()).await;
        }

        let _registry = self.registry.lock().await;
        if let Some(name) = &update.name
            && self.instances.get_by_name(name).await?.is_some_and(|other| other.id != id)
        {
            return Err(name_taken(name));
        }
        if touches_ports {
            let claims = self.instances.list_ports_in_use().await?;
            let ports = self.allocator.validate(
                sip_port.unwrap_or(i64::from(current.sip_port)),
                http_port.unwrap_or(i64::from(current.http_port)),
                &claims,
                Some(id),
            )?;
            update.ports = Some(ports).filter(|ports| *ports != current.ports());
        }
        if update.is_empty() {
            return Ok(current);
        }
        let name = update.name.clone().unwrap_or_else(|| current.name.clone());
        let ports = update.ports.unwrap_or_else(|| current.ports());
        self.apply_update(id, &update, &name, ports).await
    }

    async fn apply_update(
        &self,
        id: InstanceId,
        update: &InstanceUpdateDBRequest,
        name: &str,
        ports: PortPair,
    ) -> Result<InstanceDBResponse> {
        match self.instances.update(id, update).await {
            Ok(instance) => {
                tracing::info!(
                    instance_id = %abbrev_uuid(&instance.id),
                    status = %instance.status,
                    "Updated instance"
                );
                Ok(instance)
            }
            Err(DbError::NotFound) => Err(instance_not_found(id)),
            Err(e) => Err(self.backstop_error(e, name, ports).await),
        }
    }

    /// Delete an instance together with all of its extensions.
    ///
    /// The repository removes the instance and its extensions in one step, so readers
    /// see the instance with all of its extensions or neither. If the instance delete
    /// fails, any extension a backend removed anyway is put back from a snapshot.
    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&id)), err)]
    pub async fn delete_instance(&self, id: InstanceId) -> Result<()> {
        let this = self.clone();
        run_detached(async move { this.delete_inner(id).await }).await
    }

    async fn delete_inner(&self, id: InstanceId) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        if self.instances.get(id).await?.is_none() {
            return Err(instance_not_found(id));
        }

        let snapshot = self.extensions.list_by_instance(id).await?;
        let err = match self.instances.delete(id).await {
            Ok(true) => {
                self.sweep_extensions(id).await;
                tracing::info!(extensions_removed = snapshot.len(), "Deleted instance");
                return Ok(());
            }
            Ok(false) => instance_not_found(id),
            Err(e) => Error::from(e),
        };

        // restore skips records that are still present
        if let Err(restore_err) = self.extensions.restore(&snapshot).await {
            tracing::error!(
                error = %restore_err,
                extensions = snapshot.len(),
                "Failed to restore extensions after instance delete failed"
            );
        }
        Err(err)
    }

    /// Remove extensions a backend left behind after their instance was deleted.
    async fn sweep_extensions(&self, id: InstanceId) {
        match self.extensions.delete_by_instance(id).await {
            Ok(0) => {}
            Ok(leftover) => tracing::warn!(leftover, "Removed extensions left behind by instance delete"),
            Err(e) => tracing::error!(error = %e, "Failed to sweep extensions of deleted instance"),
        }
    }

    /// Translate a storage constraint violation that slipped past the registry checks.
    async fn backstop_error(&self, err: DbError, name: &str, ports: PortPair) -> Error {
        match err {
            DbError::UniqueViolation {
                constraint,
                conflicting_value,
                ..
            } => match constraint.as_deref() {
                Some(constraints::INSTANCE_NAME) => name_taken(name),
                Some(constraints::INSTANCE_PORT) => {
                    let port = conflicting_value
                        .and_then(|value| value.parse::<u16>().ok())
                        .unwrap_or(ports.sip_port);
                    let holder = match self.instances.list_ports_in_use().await {
                        Ok(claims) => claims.into_iter().find(|claim| claim.ports.contains(port)).map(|c| c.instance_id),
                        Err(_) => None,
                    };
                    Error::PortConflict {
                        port,
                        instance_id: holder.unwrap_or_else(Uuid::nil),
                    }
                }
                _ => Error::Other(anyhow!("unexpected unique violation on {constraint:?}")),
            },
            DbError::CheckViolation { constraint, message, .. }
                if constraint.as_deref() == Some(constraints::INSTANCE_DISTINCT_PORTS) =>
            {
                Error::InvalidPort {
                    port: i64::from(ports.sip_port),
                    message,
                }
            }
            other => other.into(),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn integrity_report(&self) -> Result<IntegrityReport> {
        integrity::check(self.instances.as_ref(), self.extensions.as_ref()).await
    }
}

fn instance_not_found(id: InstanceId) -> Error {
    Error::NotFound {
        resource: "Instance".to_string(),
        id: id.to_string(),
    }
}

fn name_taken(name: &str) -> Error {
    Error::InvalidName {
        name: name.to_string(),
        reason: "an instance with this name already exists".to_string(),
    }
}

fn reject_null_port(value: Option<Option<i64>>, field: &str) -> Result<Option<i64>> {
    match value {
        None => Ok(None),
        Some(None) => Err(Error::InvalidPort {
            port: 0,
            message: format!("{field} cannot be null"),
        }),
        Some(Some(port)) => Ok(Some(port)),
    }
}
