use crate::types::{ExtensionId, InstanceId};
use chrono::{DateTime, Utc};
use std::fmt;

/// SIP digest secret of an extension.
///
/// Never serialized and redacted from `Debug`; only the storage layer and the PBX
/// configuration writer read it through [`SipSecret::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SipSecret(String);

impl SipSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SipSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SipSecret(***)")
    }
}

/// Storage request for creating an extension
#[derive(Debug, Clone)]
pub struct ExtensionCreateDBRequest {
    pub instance_id: InstanceId,
    pub username: String,
    pub secret: SipSecret,
    pub caller_id: String,
    pub account_code: Option<String>,
    pub context: Option<String>,
}

/// Storage response for an extension
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionDBResponse {
    pub id: ExtensionId,
    pub instance_id: InstanceId,
    pub username: String,
    pub secret: SipSecret,
    pub caller_id: String,
    pub account_code: Option<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}
