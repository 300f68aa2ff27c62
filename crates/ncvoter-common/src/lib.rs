//! NCVoter Common Library
//!
//! Shared types, utilities, and error handling for the ncvoter workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`VoterError`] and the crate [`Result`] alias
//! - **Checksums**: MD5 fingerprints for snapshot files and byte buffers
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: the sparse row maps that flow through the ingestion pipeline
//!
//! # Example
//!
//! ```no_run
//! use ncvoter_common::{Result, VoterError};
//! use ncvoter_common::checksum::compute_file_md5;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let etag = compute_file_md5(path)?;
//!     println!("{path}: {etag}");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, VoterError};
pub use types::{FieldValue, RawRow, RowData};
