//! # waggle-id
//!
//! Typed ID types for the waggle coordination hub.
//!
//! ## Design Principles
//!
//! - Generated IDs are stable and system-assigned; agent names, resource
//!   paths, zone ids, and claim keys are caller-controlled strings and stay
//!   untyped
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different entity kinds
//!
//! ## ID Format
//!
//! All generated IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `task_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `soul_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `xfer_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! The ULID payload keeps IDs time-ordered, which the stores rely on for
//! "most recent first" listings.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
