//! Provisioning of SIP extensions under a live instance.

use std::sync::Arc;

use tracing::instrument;

use super::{locks::InstanceLocks, run_detached, validation};
use crate::db::errors::{DbError, constraints};
use crate::db::handlers::{ExtensionRepository, InstanceRepository};
use crate::db::models::extensions::{ExtensionCreateDBRequest, ExtensionDBResponse, SipSecret};
use crate::errors::{Error, Result};
use crate::types::{ExtensionId, InstanceId, abbrev_uuid};

/// Caller input for a new extension, before validation.
#[derive(Debug, Clone)]
pub struct NewExtension {
    pub username: String,
    pub password: SipSecret,
    pub caller_id: String,
    pub account_code: Option<String>,
    pub context: Option<String>,
}

impl NewExtension {
    fn validate(self, instance_id: InstanceId) -> Result<ExtensionCreateDBRequest> {
        let username = validation::username(&self.username)?;
        validation::password(self.password.expose())?;
        Ok(ExtensionCreateDBRequest {
            instance_id,
            username,
            secret: self.password,
            caller_id: validation::caller_id(&self.caller_id)?,
            account_code: validation::optional_field(
                "account_code",
                self.account_code.as_deref(),
                validation::MAX_ACCOUNT_CODE_LEN,
            )?,
            context: validation::optional_field("context", self.context.as_deref(), validation::MAX_CONTEXT_LEN)?,
        })
    }
}

#[derive(Clone)]
pub struct ExtensionProvisioner {
    instances: Arc<dyn InstanceRepository>,
    extensions: Arc<dyn ExtensionRepository>,
    locks: InstanceLocks,
}

impl ExtensionProvisioner {
    pub fn new(instances: Arc<dyn InstanceRepository>, extensions: Arc<dyn ExtensionRepository>, locks: InstanceLocks) -> Self {
        Self {
            instances,
            extensions,
            locks,
        }
    }

    async fn require_instance(&self, instance_id: InstanceId) -> Result<()> {
        match self.instances.get(instance_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::InstanceNotFound { id: instance_id }),
        }
    }

    /// Extensions of a live instance, in creation order.
    ///
    /// Holds the instance lock so the existence check and the listing see the same state.
    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&instance_id)), err)]
    pub async fn list(&self, instance_id: InstanceId) -> Result<Vec<ExtensionDBResponse>> {
        let _guard = self.locks.lock(instance_id).await;
        self.require_instance(instance_id).await?;
        Ok(self.extensions.list_by_instance(instance_id).await?)
    }

    #[instrument(skip(self, input), fields(instance_id = %abbrev_uuid(&instance_id), username = %input.username), err)]
    pub async fn create(&self, instance_id: InstanceId, input: NewExtension) -> Result<ExtensionDBResponse> {
        let this = self.clone();
        run_detached(async move {
            let _guard = this.locks.lock(instance_id).await;
            this.create_locked(instance_id, input).await
        })
        .await
    }

    /// Create an extension while the caller already holds the instance lock.
    pub(crate) async fn create_locked(&self, instance_id: InstanceId, input: NewExtension) -> Result<ExtensionDBResponse> {
        let request = input.validate(instance_id)?;
        self.require_instance(instance_id).await?;

        if self
            .extensions
            .get_by_username(instance_id, &request.username)
            .await?
            .is_some()
        {
            return Err(Error::DuplicateUsername {
                instance_id,
                username: request.username,
            });
        }

        match self.extensions.insert(&request).await {
            Ok(extension) => {
                tracing::info!(
                    extension_id = %abbrev_uuid(&extension.id),
                    username = %extension.username,
                    "Provisioned extension"
                );
                Ok(extension)
            }
            Err(DbError::UniqueViolation { constraint, .. }) if constraint.as_deref() == Some(constraints::EXTENSION_USERNAME) => {
                Err(Error::DuplicateUsername {
                    instance_id,
                    username: request.username,
                })
            }
            Err(DbError::ForeignKeyViolation { .. }) => Err(Error::InstanceNotFound { id: instance_id }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove one extension. An extension owned by another instance is reported as
    /// not found.
    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&instance_id), extension_id = %abbrev_uuid(&extension_id)), err)]
    pub async fn delete(&self, instance_id: InstanceId, extension_id: ExtensionId) -> Result<()> {
        let this = self.clone();
        run_detached(async move {
            let _guard = this.locks.lock(instance_id).await;
            let not_found = || Error::NotFound {
                resource: "Extension".to_string(),
                id: extension_id.to_string(),
            };

            match this.extensions.get(extension_id).await? {
                Some(extension) if extension.instance_id == instance_id => {}
                _ => return Err(not_found()),
            }
            if !this.extensions.delete(extension_id).await? {
                return Err(not_found());
            }
            tracing::info!("Removed extension");
            Ok(())
        })
        .await
    }
}
