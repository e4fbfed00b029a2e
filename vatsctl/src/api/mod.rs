//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Instances** (`/instances/*`): PBX instance lifecycle
//! - **Extensions** (`/instances/{id}/users/*`): SIP accounts under an instance
//! - **Call records** (`/cdr`, `/cdr/export`): call detail record search and download
//! - **Integrity** (`/integrity`): orphaned extension report
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The rendered documentation is
//! served at `/docs`.

pub mod handlers;
pub mod models;
