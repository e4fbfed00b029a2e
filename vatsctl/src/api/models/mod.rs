//! API request and response data models.
//!
//! API models are distinct from the storage records in [`crate::db::models`], so the
//! wire format can evolve independently. Extension responses never carry the SIP
//! password.
//!
//! - [`instances`]: instance create/update bodies and responses
//! - [`extensions`]: extension create bodies and responses
//! - [`cdr`]: call record query parameters and export requests

pub mod cdr;
pub mod extensions;
pub mod instances;
