//! mongobucket library
//!
//! Streams every collection of a MongoDB database into an S3-compatible
//! bucket as a series of bounded segments.
//!
//! # Modules
//!
//! - `access`: Bucket access capabilities (derived or serialized)
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Credential files and runtime settings
//! - `connection`: MongoDB source connection
//! - `error`: Error types and handling
//! - `executor`: The `parse`, `test` and `store` commands
//! - `export`: Collection-cursor reader and segment relay
//! - `storage`: Object writer and object store backends
//! - `utils`: Utility functions and helpers
//!
//! # Example
//!
//! ```no_run
//! use mongobucket::config::{DestinationConfig, Settings, SourceConfig};
//! use mongobucket::executor::{Executor, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = SourceConfig::load("./config/db_property.json")?;
//!     let destination = DestinationConfig::load("./config/storj_config.json")?;
//!
//!     let executor = Executor::new(
//!         Settings::default(),
//!         RunOptions::default(),
//!         CancellationToken::new(),
//!     );
//!     let report = executor.store(&source, &destination).await?;
//!     println!("{} segments", report.relay.segments.len());
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod export;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use access::{AccessGrant, Capability};
pub use config::{DestinationConfig, Settings, SourceConfig};
pub use connection::SourceConnection;
pub use error::{RelayError, Result};
pub use executor::{Executor, RunOptions};
pub use export::{ChunkFormat, CollectionCursorReader, SegmentMachine, UploadLoop};
pub use storage::{ObjectStore, ObjectWriter};
