//! redload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared pieces used by the redload loader binary and its library:
//!
//! - **Logging**: `tracing` subscriber setup (console, rolling file, JSON)
//! - **Secrets**: a string wrapper that never prints its value
//! - **Errors**: the error type for the above
//!
//! # Example
//!
//! ```no_run
//! use redload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> redload_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod secret;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use secret::Secret;
