//! # Fixture Core
//!
//! Shared types and traits for disposable PostgreSQL fixtures.
//!
//! This crate provides:
//! - The [`Provisioner`] seam the lifecycle coordinator launches processes
//!   through
//! - The [`Catalog`] read path the schema validator inspects
//! - Launch and exec value types passed across those seams

pub mod traits;
pub mod types;

pub use traits::{Catalog, Provisioner};
pub use types::{ExecOutput, LaunchSpec, Mount};
