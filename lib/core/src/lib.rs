//! Core domain types and utilities for the gridwork orchestrator.
//!
//! This crate provides the foundational identifiers and error-handling
//! conventions shared by every other gridwork crate.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::WorkflowId;

/// Re-exports consumed by the `define_id!` macro from crates that invoke it.
///
/// Not part of the public API; the leading underscore module name keeps it
/// out of generated documentation's item list.
#[doc(hidden)]
pub mod __private {
    pub use ulid::Ulid;
}
