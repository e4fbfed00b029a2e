//! Storage record models.
//!
//! These structs are what repositories accept and return. They are distinct from the
//! API models in [`crate::api::models`] so storage and wire representations can evolve
//! independently; in particular extension records carry the SIP secret, which the API
//! models never do.
//!
//! - [`instances`]: PBX instances and their run state
//! - [`extensions`]: SIP extensions owned by an instance
//! - [`cdr`]: call detail records and the filter used to query them

pub mod cdr;
pub mod extensions;
pub mod instances;
