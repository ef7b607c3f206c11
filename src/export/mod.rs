//! Database export pipeline
//!
//! - `source`: what the reader needs from a database
//! - `chunk`: per-document encoding
//! - `reader`: pull-based collection-cursor reader
//! - `relay`: segment state machine and upload loop
//! - `naming`: segment object keys
//! - `progress`: terminal progress reporting

pub mod chunk;
pub mod naming;
pub mod progress;
pub mod reader;
pub mod relay;
pub mod source;

pub use chunk::ChunkFormat;
pub use naming::SegmentNamer;
pub use progress::ProgressTracker;
pub use reader::{ChunkSource, CollectionCursorReader, Pull, PullStatus, ReadCursorState};
pub use relay::{AfterSeal, RelayAction, RelayReport, RelayState, SegmentMachine, UploadLoop};
pub use source::{DocumentSource, DocumentStream};
