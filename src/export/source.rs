//! Document source abstraction
//!
//! The reader only needs two things from a database: the ordered list of
//! collections and a way to iterate one collection from a given document
//! count. [`DocumentSource`] captures exactly that so the reader can be driven
//! by MongoDB in production and by an in-memory source in tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use mongodb::bson::Document;

use crate::error::{ReadError, Result};

/// Stream of documents from one collection
///
/// Item errors are transient read errors; the reader surfaces them as
/// [`PullStatus::Interrupted`](super::PullStatus::Interrupted).
pub type DocumentStream = BoxStream<'static, std::result::Result<Document, ReadError>>;

/// Trait for sources the collection-cursor reader can export
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Name of the database being exported
    fn database_name(&self) -> &str;

    /// Enumerate the collections, in export order
    ///
    /// # Returns
    /// * `Result<Vec<String>>` - Collection names, or
    ///   [`ReadError::EnumerationFailed`] wrapped in the crate error
    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Iterate a collection from the start, skipping the first `skip` documents
    ///
    /// The order must be the same on every call so that a count of emitted
    /// documents identifies a resumption point.
    ///
    /// # Arguments
    /// * `collection` - Collection name
    /// * `skip` - Number of leading documents already emitted
    async fn documents(
        &self,
        collection: &str,
        skip: u64,
    ) -> std::result::Result<DocumentStream, ReadError>;
}
