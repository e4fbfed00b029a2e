use crate::db::errors::DbError;
use crate::ports::PortError;
use crate::types::{InstanceId, abbrev_uuid};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Name is empty, malformed, or already used by a live instance
    #[error("Invalid instance name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Port out of range, or a pair that breaks the port convention
    #[error("Invalid port {port}: {message}")]
    InvalidPort { port: i64, message: String },

    /// Port held by another live instance
    #[error("Port {port} is already in use by instance {}", abbrev_uuid(.instance_id))]
    PortConflict { port: u16, instance_id: InstanceId },

    /// Username already provisioned in this instance
    #[error("Extension '{username}' already exists in instance {}", abbrev_uuid(.instance_id))]
    DuplicateUsername { instance_id: InstanceId, username: String },

    /// Request field failed validation
    #[error("Invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The instance an operation is scoped to does not exist
    #[error("Instance {id} not found")]
    InstanceNotFound { id: InstanceId },

    /// Storage could not be reached; the request may be retried
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Storage operation error
    #[error(transparent)]
    Database(DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Unavailable { message } => Error::Unavailable { message },
            other => Error::Database(other),
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::InvalidInput {
            field: "body".to_string(),
            message: rejection.body_text(),
        }
    }
}

impl From<PortError> for Error {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Invalid { port, message } => Error::InvalidPort { port, message },
            PortError::Conflict { port, instance_id } => Error::PortConflict { port, instance_id },
        }
    }
}

impl Error {
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable error kind, sent as `kind` in response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidName { .. } => "invalid_name",
            Error::InvalidPort { .. } => "invalid_port",
            Error::PortConflict { .. } => "port_conflict",
            Error::DuplicateUsername { .. } => "duplicate_username",
            Error::InvalidInput { .. } => "invalid_input",
            Error::NotFound { .. } => "not_found",
            Error::InstanceNotFound { .. } => "instance_not_found",
            Error::Unavailable { .. } => "unavailable",
            Error::Database(DbError::NotFound) => "not_found",
            Error::Database(DbError::UniqueViolation { .. }) => "conflict",
            Error::Database(_) | Error::Other(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidName { .. } | Error::InvalidPort { .. } | Error::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Error::PortConflict { .. } | Error::DuplicateUsername { .. } => StatusCode::CONFLICT,
            Error::NotFound { .. } | Error::InstanceNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Unavailable { .. } => "Storage is temporarily unavailable".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Unavailable { .. } => "Storage is temporarily unavailable".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Structured fields added to the response body next to `kind` and `message`
    fn details(&self) -> Map<String, Value> {
        let details = match self {
            Error::InvalidName { name, .. } => json!({ "name": name }),
            Error::InvalidPort { port, .. } => json!({ "port": port }),
            Error::PortConflict { port, instance_id } => json!({ "port": port, "instance_id": instance_id }),
            Error::DuplicateUsername { instance_id, username } => {
                json!({ "instance_id": instance_id, "username": username })
            }
            Error::InvalidInput { field, .. } => json!({ "field": field }),
            Error::NotFound { resource, id } => json!({ "resource": resource, "id": id }),
            Error::InstanceNotFound { id } => json!({ "instance_id": id }),
            _ => json!({}),
        };
        match details {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Unavailable { .. } => {
                tracing::error!("Storage unavailable: {}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::PortConflict { .. } | Error::DuplicateUsername { .. } => {
                tracing::info!("Conflict error: {}", self);
            }
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let mut body = self.details();
        body.insert("kind".to_string(), Value::from(self.kind()));
        body.insert("message".to_string(), Value::from(self.user_message()));

        (self.status_code(), Json(Value::Object(body))).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
