//! Collection-cursor reader
//!
//! Presents a whole database as one pull-based byte stream. Each pull fills
//! the caller's buffer with whole chunks (one chunk per document) until the
//! next chunk would not fit, the database is exhausted, or the cursor fails.
//!
//! Position is a collection queue plus a count of documents already emitted
//! from the head collection. A deferred document is not buffered; it is
//! fetched again on the next pull by reopening the collection and skipping
//! the emitted count. The source must therefore return documents in a stable
//! order.
//!
//! Every fetch from an open cursor is bounded by the fetch timeout; a stalled
//! cursor ends the pull as a transient [`ReadError::CursorTimeout`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunk::ChunkFormat;
use super::source::DocumentSource;
use crate::error::{ReadError, RelayError, Result};

/// Why a pull stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullStatus {
    /// The next chunk did not fit in the remaining capacity
    ShortBuffer,
    /// Every collection has been fully emitted
    EndOfStream,
    /// The cursor failed; the bytes written so far are still valid
    Interrupted(ReadError),
}

/// Outcome of one pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pull {
    /// Bytes appended to the caller's buffer
    pub written: usize,
    pub status: PullStatus,
}

/// Pull-based producer of serialized chunks
#[async_trait]
pub trait ChunkSource: Send {
    /// Append whole chunks to `buf`, writing strictly fewer than `capacity` bytes
    ///
    /// # Returns
    /// * `Result<Pull>` - Bytes written and why the pull stopped. `Err` is
    ///   reserved for failures that end the export (enumeration, encoding,
    ///   cancellation).
    async fn pull(&mut self, buf: &mut Vec<u8>, capacity: usize) -> Result<Pull>;
}

/// Resumable position of the reader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadCursorState {
    /// Collections still to emit; `None` until enumerated
    remaining: Option<VecDeque<String>>,
    /// Documents already emitted from the head collection
    offset: u64,
}

impl ReadCursorState {
    /// Collection currently being emitted
    pub fn current_collection(&self) -> Option<&str> {
        self.remaining.as_ref()?.front().map(String::as_str)
    }

    /// Documents already emitted from the current collection
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the collection list has been fetched
    pub fn is_enumerated(&self) -> bool {
        self.remaining.is_some()
    }

    /// Number of collections not yet fully emitted
    pub fn collections_remaining(&self) -> usize {
        self.remaining.as_ref().map_or(0, VecDeque::len)
    }

    fn advance_collection(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            remaining.pop_front();
        }
        self.offset = 0;
    }
}

/// Fetch timeout used unless [`CollectionCursorReader::fetch_timeout`] is set
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Reader over every collection of one database
pub struct CollectionCursorReader {
    source: Arc<dyn DocumentSource>,
    format: ChunkFormat,
    state: ReadCursorState,
    cancel: CancellationToken,
    fetch_timeout: Duration,
    documents_emitted: u64,
    bytes_emitted: u64,
    collections_completed: usize,
}

impl CollectionCursorReader {
    /// Create a reader positioned at the start of the database
    ///
    /// # Arguments
    /// * `source` - Database to read
    /// * `format` - Chunk encoding
    /// * `cancel` - Token checked before each document
    pub fn new(
        source: Arc<dyn DocumentSource>,
        format: ChunkFormat,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            format,
            state: ReadCursorState::default(),
            cancel,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            documents_emitted: 0,
            bytes_emitted: 0,
            collections_completed: 0,
        }
    }

    /// Bound on each fetch from an open cursor
    pub fn fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn state(&self) -> &ReadCursorState {
        &self.state
    }

    pub fn documents_emitted(&self) -> u64 {
        self.documents_emitted
    }

    pub fn bytes_emitted(&self) -> u64 {
        self.bytes_emitted
    }

    pub fn collections_completed(&self) -> usize {
        self.collections_completed
    }

    pub fn format(&self) -> ChunkFormat {
        self.format
    }

    async fn ensure_enumerated(&mut self) -> Result<()> {
        if self.state.remaining.is_some() {
            return Ok(());
        }
        let names = self.source.collection_names().await?;
        info!(
            "Exporting {} collection(s) from '{}'",
            names.len(),
            self.source.database_name()
        );
        self.state.remaining = Some(names.into());
        Ok(())
    }
}

#[async_trait]
impl ChunkSource for CollectionCursorReader {
    async fn pull(&mut self, buf: &mut Vec<u8>, capacity: usize) -> Result<Pull> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        self.ensure_enumerated().await?;

        let mut written = 0usize;

        loop {
            let Some(collection) = self.state.current_collection().map(str::to_string) else {
                return Ok(Pull {
                    written,
                    status: PullStatus::EndOfStream,
                });
            };

            let mut stream = match self.source.documents(&collection, self.state.offset).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Opening '{}' failed: {}", collection, e);
                    return Ok(Pull {
                        written,
                        status: PullStatus::Interrupted(e),
                    });
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(RelayError::Cancelled),
                    next = timeout(self.fetch_timeout, stream.next()) => next,
                };

                let Ok(next) = next else {
                    warn!(
                        "Cursor on '{}' stalled at offset {} for {:?}",
                        collection, self.state.offset, self.fetch_timeout
                    );
                    return Ok(Pull {
                        written,
                        status: PullStatus::Interrupted(ReadError::CursorTimeout { collection }),
                    });
                };

                match next {
                    Some(Ok(doc)) => {
                        let chunk = self.format.encode(&doc)?;
                        if written + chunk.len() >= capacity {
                            debug!(
                                "Deferring {} byte chunk from '{}' at offset {}",
                                chunk.len(),
                                collection,
                                self.state.offset
                            );
                            return Ok(Pull {
                                written,
                                status: PullStatus::ShortBuffer,
                            });
                        }
                        buf.extend_from_slice(&chunk);
                        written += chunk.len();
                        self.state.offset += 1;
                        self.documents_emitted += 1;
                        self.bytes_emitted += chunk.len() as u64;
                    }
                    Some(Err(e)) => {
                        warn!(
                            "Cursor on '{}' failed at offset {}: {}",
                            collection, self.state.offset, e
                        );
                        return Ok(Pull {
                            written,
                            status: PullStatus::Interrupted(e),
                        });
                    }
                    None => break,
                }
            }

            debug!(
                "Collection '{}' complete ({} documents)",
                collection, self.state.offset
            );
            self.state.advance_collection();
            self.collections_completed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::source::DocumentStream;
    use crate::export::source::testing::{Fault, MemorySource, sized_doc, sized_docs};
    use mongodb::bson::{Document, doc};

    fn reader(source: MemorySource) -> CollectionCursorReader {
        CollectionCursorReader::new(
            Arc::new(source),
            ChunkFormat::Bson,
            CancellationToken::new(),
        )
    }

    /// Split a buffer of concatenated BSON documents, failing on a torn tail
    fn split_documents(mut bytes: &[u8]) -> Vec<Document> {
        let mut docs = Vec::new();
        while !bytes.is_empty() {
            let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            assert!(len <= bytes.len(), "chunk split across pulls");
            docs.push(Document::from_reader(&bytes[..len]).unwrap());
            bytes = &bytes[len..];
        }
        docs
    }

    /// Drain the reader with a repeating pattern of capacities
    async fn drain(reader: &mut CollectionCursorReader, capacities: &[usize]) -> Vec<u8> {
        let mut all = Vec::new();
        for i in 0.. {
            let mut buf = Vec::new();
            let pull = reader
                .pull(&mut buf, capacities[i % capacities.len()])
                .await
                .unwrap();
            assert_eq!(pull.written, buf.len());
            split_documents(&buf);
            all.extend_from_slice(&buf);
            match pull.status {
                PullStatus::EndOfStream => break,
                PullStatus::ShortBuffer | PullStatus::Interrupted(_) => {}
            }
        }
        all
    }

    #[tokio::test]
    async fn test_two_collection_scenario() {
        let source = MemorySource::new("shop")
            .collection("a", sized_docs("a", 3, 100))
            .collection("b", sized_docs("b", 1, 100));
        let mut reader = reader(source);

        let mut first = Vec::new();
        let pull = reader.pull(&mut first, 250).await.unwrap();
        assert_eq!(pull.written, 200);
        assert_eq!(pull.status, PullStatus::ShortBuffer);
        assert_eq!(reader.state().current_collection(), Some("a"));
        assert_eq!(reader.state().offset(), 2);

        let mut second = Vec::new();
        let pull = reader.pull(&mut second, 250).await.unwrap();
        assert_eq!(pull.written, 200);
        assert_eq!(pull.status, PullStatus::EndOfStream);

        let tags: Vec<String> = split_documents(&second)
            .iter()
            .map(|d| d.get_str("p").unwrap().trim_end_matches('.').to_string())
            .collect();
        assert_eq!(tags, vec!["a-2", "b-0"]);
    }

    #[tokio::test]
    async fn test_fit_check_is_strict() {
        let source = MemorySource::new("shop").collection("a", sized_docs("a", 2, 100));
        let mut reader = reader(source);

        let mut buf = Vec::new();
        let pull = reader.pull(&mut buf, 200).await.unwrap();
        assert_eq!(pull.written, 100);
        assert_eq!(pull.status, PullStatus::ShortBuffer);
    }

    #[tokio::test]
    async fn test_empty_database_is_end_of_stream() {
        let mut reader = reader(MemorySource::new("empty"));

        let mut buf = Vec::new();
        let pull = reader.pull(&mut buf, 1024).await.unwrap();
        assert_eq!(pull.written, 0);
        assert_eq!(pull.status, PullStatus::EndOfStream);
        assert!(reader.state().is_enumerated());

        // stays exhausted
        let pull = reader.pull(&mut buf, 1024).await.unwrap();
        assert_eq!(pull.status, PullStatus::EndOfStream);
    }

    #[tokio::test]
    async fn test_empty_collections_are_skipped() {
        let source = MemorySource::new("shop")
            .collection("empty", Vec::new())
            .collection("a", sized_docs("a", 1, 50));
        let mut reader = reader(source);

        let mut buf = Vec::new();
        let pull = reader.pull(&mut buf, 1024).await.unwrap();
        assert_eq!(pull.written, 50);
        assert_eq!(pull.status, PullStatus::EndOfStream);
        assert_eq!(reader.collections_completed(), 2);
    }

    #[tokio::test]
    async fn test_oversized_chunk_returns_zero_progress() {
        let source = MemorySource::new("shop").collection("a", vec![sized_doc("big", 500)]);
        let mut reader = reader(source);

        let mut buf = Vec::new();
        let pull = reader.pull(&mut buf, 100).await.unwrap();
        assert_eq!(pull.written, 0);
        assert_eq!(pull.status, PullStatus::ShortBuffer);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_resumption_matches_unbounded_read() {
        let docs = |name: &str| {
            (0..12)
                .map(|i| sized_doc(&format!("{name}-{i}"), 40 + (i * 37) % 90))
                .collect::<Vec<_>>()
        };
        let build = || {
            MemorySource::new("shop")
                .collection("users", docs("users"))
                .collection("empty", Vec::new())
                .collection("orders", docs("orders"))
        };

        let mut unbounded = reader(build());
        let expected = drain(&mut unbounded, &[usize::MAX]).await;
        assert_eq!(split_documents(&expected).len(), 24);

        for capacities in [&[150usize][..], &[131, 400, 260], &[1000, 140]] {
            let mut bounded = reader(build());
            let actual = drain(&mut bounded, capacities).await;
            assert_eq!(actual, expected, "capacities {:?}", capacities);
            assert_eq!(bounded.documents_emitted(), 24);
        }
    }

    #[tokio::test]
    async fn test_interrupted_cursor_resumes_without_loss() {
        let source = MemorySource::new("shop")
            .collection("a", sized_docs("a", 5, 60))
            .with_fault(Fault::Iterate {
                collection: "a".to_string(),
                index: 3,
            });
        let mut reader = reader(source);

        let mut buf = Vec::new();
        let pull = reader.pull(&mut buf, 10_000).await.unwrap();
        assert_eq!(pull.written, 180);
        assert!(matches!(
            pull.status,
            PullStatus::Interrupted(ReadError::CursorFailed { .. })
        ));
        assert_eq!(reader.state().offset(), 3);

        let pull = reader.pull(&mut buf, 10_000).await.unwrap();
        assert_eq!(pull.written, 120);
        assert_eq!(pull.status, PullStatus::EndOfStream);
        assert_eq!(split_documents(&buf).len(), 5);
    }

    #[tokio::test]
    async fn test_open_failure_is_transient() {
        let source = MemorySource::new("shop")
            .collection("a", sized_docs("a", 1, 60))
            .with_fault(Fault::Open {
                collection: "a".to_string(),
            });
        let mut reader = reader(source);

        let mut buf = Vec::new();
        let pull = reader.pull(&mut buf, 1000).await.unwrap();
        assert_eq!(pull.written, 0);
        assert!(matches!(
            pull.status,
            PullStatus::Interrupted(ReadError::CursorTimeout { .. })
        ));

        let pull = reader.pull(&mut buf, 1000).await.unwrap();
        assert_eq!(pull.written, 60);
        assert_eq!(pull.status, PullStatus::EndOfStream);
    }

    /// Source whose cursor yields one document and then never answers again
    struct StalledSource;

    #[async_trait]
    impl DocumentSource for StalledSource {
        fn database_name(&self) -> &str {
            "shop"
        }

        async fn collection_names(&self) -> Result<Vec<String>> {
            Ok(vec!["a".to_string()])
        }

        async fn documents(
            &self,
            _collection: &str,
            _skip: u64,
        ) -> std::result::Result<DocumentStream, ReadError> {
            let first = futures::stream::iter(vec![Ok(sized_doc("a-0", 60))]);
            Ok(first.chain(futures::stream::pending()).boxed())
        }
    }

    #[tokio::test]
    async fn test_stalled_cursor_times_out() {
        let mut reader = CollectionCursorReader::new(
            Arc::new(StalledSource),
            ChunkFormat::Bson,
            CancellationToken::new(),
        )
        .fetch_timeout(Duration::from_millis(50));

        let mut buf = Vec::new();
        let pull = tokio::time::timeout(Duration::from_secs(5), reader.pull(&mut buf, 1000))
            .await
            .expect("pull did not return")
            .unwrap();

        assert_eq!(pull.written, 60);
        assert_eq!(
            pull.status,
            PullStatus::Interrupted(ReadError::CursorTimeout {
                collection: "a".to_string()
            })
        );
        assert_eq!(reader.state().offset(), 1);
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let mut reader = reader(MemorySource::new("shop").failing_enumeration());

        let mut buf = Vec::new();
        let err = reader.pull(&mut buf, 1000).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Read(ReadError::EnumerationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_reader_stops() {
        let cancel = CancellationToken::new();
        let source = MemorySource::new("shop").collection("a", vec![doc! { "x": 1 }]);
        let mut reader =
            CollectionCursorReader::new(Arc::new(source), ChunkFormat::Bson, cancel.clone());

        cancel.cancel();
        let mut buf = Vec::new();
        assert!(matches!(
            reader.pull(&mut buf, 1000).await,
            Err(RelayError::Cancelled)
        ));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_reader_emits_lines() {
        let source =
            MemorySource::new("shop").collection("a", vec![doc! { "x": 1 }, doc! { "x": 2 }]);
        let mut reader = CollectionCursorReader::new(
            Arc::new(source),
            ChunkFormat::JsonLines,
            CancellationToken::new(),
        );

        let mut buf = Vec::new();
        let pull = reader.pull(&mut buf, 1000).await.unwrap();
        assert_eq!(pull.status, PullStatus::EndOfStream);
        assert_eq!(String::from_utf8(buf).unwrap(), "{\"x\":1}\n{\"x\":2}\n");
    }
}
