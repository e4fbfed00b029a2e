//! API request/response models for PBX instances.

use super::extensions::ExtensionResponse;
use crate::db::models::instances::{InstanceDBResponse, InstanceStatus};
use crate::manager::{CreatedInstance, InstancePatch, NewInstance};
use crate::types::InstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::rust::double_option;
use utoipa::ToSchema;

/// Request body for creating an instance.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InstanceCreate {
    /// Display name, unique among existing instances
    #[schema(example = "office-pbx")]
    pub name: String,
    /// Requested SIP port; the HTTP port is derived from it
    #[schema(example = 5060)]
    pub sip_port: i64,
    /// Optional; must equal `sip_port + http_offset` when supplied
    #[serde(default)]
    #[schema(example = 6060)]
    pub http_port: Option<i64>,
    /// Provision the configured starter extensions
    #[serde(default, alias = "create_test_users")]
    pub seed_default_extensions: bool,
}

impl From<InstanceCreate> for NewInstance {
    fn from(body: InstanceCreate) -> Self {
        Self {
            name: body.name,
            sip_port: body.sip_port,
            http_port: body.http_port,
            seed_default_extensions: body.seed_default_extensions,
        }
    }
}

/// Request body for updating an instance. Omitted fields are left unchanged;
/// explicit `null` values are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct InstanceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    #[schema(value_type = Option<String>, example = "office-pbx-2")]
    pub name: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    #[schema(value_type = Option<i64>, example = 5070)]
    pub sip_port: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    #[schema(value_type = Option<i64>, example = 6070)]
    pub http_port: Option<Option<i64>>,
    /// `running` or `stopped`
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    #[schema(value_type = Option<String>, example = "stopped")]
    pub status: Option<Option<String>>,
}

impl From<InstanceUpdate> for InstancePatch {
    fn from(body: InstanceUpdate) -> Self {
        Self {
            name: body.name,
            sip_port: body.sip_port,
            http_port: body.http_port,
            status: body.status,
        }
    }
}

/// A PBX instance as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstanceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: InstanceId,
    pub name: String,
    pub sip_port: u16,
    pub http_port: u16,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<InstanceDBResponse> for InstanceResponse {
    fn from(db: InstanceDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            sip_port: db.sip_port,
            http_port: db.http_port,
            status: db.status,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Response to a create: the instance, plus the starter extensions and any seeding
/// warnings when seeding was requested.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstanceCreateResponse {
    #[serde(flatten)]
    pub instance: InstanceResponse,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<CreatedInstance> for InstanceCreateResponse {
    fn from(created: CreatedInstance) -> Self {
        Self {
            instance: created.instance.into(),
            extensions: created.seeded.into_iter().map(Into::into).collect(),
            warnings: created.warnings,
        }
    }
}
