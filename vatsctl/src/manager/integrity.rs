//! Read-only check that every stored extension still has an owner.
//!
//! Orphans should never exist; if one is found it is reported and logged, never
//! repaired here.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::handlers::{ExtensionRepository, InstanceRepository};
use crate::errors::Result;
use crate::types::{ExtensionId, InstanceId, abbrev_uuid};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrphanGroup {
    /// Owner referenced by the extensions but absent from the instance store
    #[schema(value_type = String, format = "uuid")]
    pub missing_instance_id: InstanceId,
    #[schema(value_type = Vec<String>)]
    pub extension_ids: Vec<ExtensionId>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntegrityReport {
    pub checked_at: DateTime<Utc>,
    pub instance_count: usize,
    pub orphaned_extensions: usize,
    pub orphans: Vec<OrphanGroup>,
}

pub(crate) async fn check(instances: &dyn InstanceRepository, extensions: &dyn ExtensionRepository) -> Result<IntegrityReport> {
    let live: HashSet<InstanceId> = instances.list().await?.into_iter().map(|i| i.id).collect();

    let mut orphans = Vec::new();
    for owner in extensions.list_owner_ids().await? {
        if live.contains(&owner) {
            continue;
        }
        let extension_ids: Vec<ExtensionId> = extensions
            .list_by_instance(owner)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        if extension_ids.is_empty() {
            continue;
        }
        tracing::warn!(
            instance_id = %abbrev_uuid(&owner),
            count = extension_ids.len(),
            "Found extensions whose instance no longer exists"
        );
        orphans.push(OrphanGroup {
            missing_instance_id: owner,
            extension_ids,
        });
    }
    orphans.sort_by_key(|group| group.missing_instance_id);

    Ok(IntegrityReport {
        checked_at: Utc::now(),
        instance_count: live.len(),
        orphaned_extensions: orphans.iter().map(|g| g.extension_ids.len()).sum(),
        orphans,
    })
}
