//! storeshift common library
//!
//! Shared types, utilities, and error handling for the storeshift workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `CommonError` and the `Result` alias
//! - **Checksums**: SHA-256 digests of blobs, files and directory trees
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: store kinds and roles
//!
//! # Example
//!
//! ```no_run
//! use storeshift_common::checksum;
//!
//! fn audit(path: &str) -> storeshift_common::Result<()> {
//!     let digest = checksum::digest_file(path)?;
//!     println!("{path}: {digest}");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{StoreKind, StoreRole};
