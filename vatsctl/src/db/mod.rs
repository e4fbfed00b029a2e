//! Storage layer for instances, extensions and call detail records.
//!
//! ```text
//! ┌─────────────┐
//! │   Manager   │  (lifecycle rules, locking, cascades)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - trait objects chosen at startup)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - storage records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌──────────────────────┐
//! │ memory | PostgreSQL  │
//! └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository traits and their backends
//! - [`models`]: Storage record structures
//! - [`errors`]: Storage error type and the constraint names both backends report
//!
//! # Migrations
//!
//! With the `postgres` feature, migrations in `migrations/` are embedded and run at
//! startup through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
