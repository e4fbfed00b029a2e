//! HTTP request handlers for all API endpoints.
//!
//! Handlers are thin: they convert API models into manager inputs, call the
//! [`crate::manager::LifecycleManager`] or the CDR source, and convert the result back.
//! Errors are returned as [`crate::errors::Error`], which renders the status code and
//! JSON body.
//!
//! - [`instances`]: instance CRUD
//! - [`extensions`]: extension provisioning under an instance
//! - [`cdr`]: call detail record query and export
//! - [`integrity`]: orphaned extension report

pub mod cdr;
pub mod extensions;
pub mod instances;
pub mod integrity;

use axum::extract::{FromRequest, Request, rejection::JsonRejection};

use crate::errors::Error;

/// JSON request body. Malformed or incomplete bodies are rejected as `invalid_input`
/// with the same error body as every other validation failure.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}
