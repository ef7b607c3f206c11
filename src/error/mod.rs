//! Error handling for the export pipeline.
//!
//! This module provides:
//! - A single top-level error type ([`RelayError`]) used across the crate
//! - Kind enums mirroring the failure classes of an export run
//! - Classification of MongoDB driver errors into short descriptions
//!
//! The reader's short-buffer signal is not an error; it is a
//! [`PullStatus`](crate::export::PullStatus).
//!
//! # Example
//!
//! ```rust,no_run
//! use mongobucket::error::{ConfigError, RelayError, Result};
//!
//! fn require_bucket(bucket: &str) -> Result<()> {
//!     if bucket.is_empty() {
//!         return Err(ConfigError::MissingField("bucket".to_string()).into());
//!     }
//!     Ok(())
//! }
//!
//! let err = require_bucket("").unwrap_err();
//! assert!(matches!(err, RelayError::Config(_)));
//! ```

pub mod kinds;
pub mod mongo;

pub use kinds::{
    AccessError, ConfigError, ConnectionError, ReadError, RelayError, Result, UploadError,
};
pub use mongo::{MongoErrorClass, classify_mongodb_error, describe_mongodb_error};
