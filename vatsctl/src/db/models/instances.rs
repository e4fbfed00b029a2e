use crate::ports::PortPair;
use crate::types::InstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

/// Run state of a PBX instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
}

impl InstanceStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    /// Unknown values are rejected rather than mapped to a default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "stopped" => Ok(InstanceStatus::Stopped),
            other => Err(format!("unknown instance status '{other}'")),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Storage request for creating a new instance
#[derive(Debug, Clone)]
pub struct InstanceCreateDBRequest {
    pub name: String,
    pub ports: PortPair,
    pub status: InstanceStatus,
}

/// Storage request for updating an instance. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct InstanceUpdateDBRequest {
    pub name: Option<String>,
    pub ports: Option<PortPair>,
    pub status: Option<InstanceStatus>,
}

impl InstanceUpdateDBRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.ports.is_none() && self.status.is_none()
    }
}

/// Storage response for an instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDBResponse {
    pub id: InstanceId,
    pub name: String,
    pub sip_port: u16,
    pub http_port: u16,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceDBResponse {
    pub fn ports(&self) -> PortPair {
        PortPair::new(self.sip_port, self.http_port)
    }
}
