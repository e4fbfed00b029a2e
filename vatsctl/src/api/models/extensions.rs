//! API request/response models for SIP extensions.

use crate::db::models::extensions::{ExtensionDBResponse, SipSecret};
use crate::manager::NewExtension;
use crate::types::{ExtensionId, InstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for provisioning an extension.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExtensionCreate {
    /// Extension number or SIP username, unique within the instance
    #[schema(example = "101")]
    pub username: String,
    /// SIP digest password. Write-only: never returned.
    #[schema(example = "s3cretPass", write_only)]
    pub password: String,
    /// Display identity presented on outbound calls
    #[schema(example = "Reception")]
    pub caller_id: String,
    #[serde(default)]
    pub account_code: Option<String>,
    /// Dial-plan context
    #[serde(default)]
    #[schema(example = "from-internal")]
    pub context: Option<String>,
}

impl From<ExtensionCreate> for NewExtension {
    fn from(body: ExtensionCreate) -> Self {
        Self {
            username: body.username,
            password: SipSecret::new(body.password),
            caller_id: body.caller_id,
            account_code: body.account_code,
            context: body.context,
        }
    }
}

/// An extension as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExtensionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ExtensionId,
    #[schema(value_type = String, format = "uuid")]
    pub instance_id: InstanceId,
    pub username: String,
    pub caller_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ExtensionDBResponse> for ExtensionResponse {
    fn from(db: ExtensionDBResponse) -> Self {
        Self {
            id: db.id,
            instance_id: db.instance_id,
            username: db.username,
            caller_id: db.caller_id,
            account_code: db.account_code,
            context: db.context,
            created_at: db.created_at,
        }
    }
}
