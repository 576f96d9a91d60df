//! Recall Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error types, logging setup and text utilities for the recall
//! ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`RecallError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber configuration driven by `LOG_*` variables
//! - **Text**: character-safe truncation and whitespace normalization
//! - **Fingerprints**: stable SHA-256 digests over field lists
//!
//! # Example
//!
//! ```no_run
//! use recall_common::logging::{init_logging, LogConfig};
//! use recall_common::text::truncate_chars;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     assert_eq!(truncate_chars("Infusion Pump", 8), "Infusion");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod text;

// Re-export commonly used types
pub use error::{RecallError, Result};
