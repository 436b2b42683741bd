//! csvdrop Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the csvdrop workspace.
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Checksums**: SHA-256 content fingerprints used for idempotent loads
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use csvdrop_common::checksum::checksum_bytes;
//! use csvdrop_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> csvdrop_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let checksum = checksum_bytes(b"name,score\nAnn,90\n");
//!     tracing::info!(%checksum, "fingerprinted");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
