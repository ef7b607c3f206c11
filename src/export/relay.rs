//! Chunk relay
//!
//! Moves bytes from a [`ChunkSource`] into fixed-capacity segments and hands
//! each full segment to a [`SegmentWriter`]. The control flow lives in
//! [`SegmentMachine`], a synchronous state machine that decides what to do
//! after every pull or seal; [`UploadLoop`] performs the I/O it asks for.
//!
//! Segment rules:
//! - a short-buffer pull seals the current segment and starts a new one
//! - end of stream seals the final segment, which may be empty when the
//!   database has no documents
//! - a transient read error is retried within the same segment; once the
//!   retry budget is spent, whatever was buffered is sealed and the run fails
//! - a short-buffer pull that leaves an empty segment empty means a single
//!   chunk exceeds the segment capacity, which no amount of rolling over fixes

use std::time::Instant;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::naming::SegmentNamer;
use super::progress::ProgressTracker;
use super::reader::{ChunkSource, Pull, PullStatus};
use crate::error::{ReadError, RelayError, Result, UploadError};
use crate::storage::{SegmentReceipt, SegmentWriter};

/// What happens once the segment being sealed is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterSeal {
    /// Start a new segment and keep pulling
    Continue,
    /// The stream is exhausted; the run is complete
    Finish,
    /// Retries were exhausted; fail with this error
    Abort(ReadError),
}

/// Relay state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    Pulling,
    SegmentSealing { after: AfterSeal },
    Done,
    Failed,
}

/// Next step the driver should take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    /// Pull into the current segment with this much room left
    Pull { capacity: usize },
    /// Write the current segment
    Seal,
    /// Stop; the run succeeded
    Finish,
    /// Stop; the run failed
    Fail,
}

/// Segment bookkeeping for one export run
#[derive(Debug)]
pub struct SegmentMachine {
    capacity: usize,
    filled: usize,
    max_retries: u32,
    retries_left: u32,
    state: RelayState,
    failure: Option<RelayError>,
}

impl SegmentMachine {
    /// Create a machine with an empty first segment
    ///
    /// # Arguments
    /// * `capacity` - Segment capacity in bytes
    /// * `max_retries` - Transient read errors tolerated per segment
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            capacity,
            filled: 0,
            max_retries,
            retries_left: max_retries,
            state: RelayState::Pulling,
            failure: None,
        }
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Bytes in the current segment
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn next_action(&self) -> RelayAction {
        match self.state {
            RelayState::Pulling => RelayAction::Pull {
                capacity: self.capacity - self.filled,
            },
            RelayState::SegmentSealing { .. } => RelayAction::Seal,
            RelayState::Done => RelayAction::Finish,
            RelayState::Failed => RelayAction::Fail,
        }
    }

    /// Account for a completed pull
    pub fn on_pull(&mut self, pull: Pull) {
        if self.state != RelayState::Pulling {
            return;
        }
        self.filled += pull.written;

        match pull.status {
            PullStatus::ShortBuffer if self.filled == 0 => {
                self.fail(UploadError::OversizedChunk {
                    capacity: self.capacity,
                }
                .into());
            }
            PullStatus::ShortBuffer => {
                self.state = RelayState::SegmentSealing {
                    after: AfterSeal::Continue,
                };
            }
            PullStatus::EndOfStream => {
                self.state = RelayState::SegmentSealing {
                    after: AfterSeal::Finish,
                };
            }
            PullStatus::Interrupted(err) if !err.is_transient() => self.fail(err.into()),
            PullStatus::Interrupted(err) => {
                if self.retries_left > 0 {
                    self.retries_left -= 1;
                    debug!(
                        "Retrying read ({} of {} retries left): {}",
                        self.retries_left, self.max_retries, err
                    );
                } else if self.filled > 0 {
                    self.state = RelayState::SegmentSealing {
                        after: AfterSeal::Abort(err),
                    };
                } else {
                    self.fail(err.into());
                }
            }
        }
    }

    /// Account for a successfully written segment
    pub fn on_sealed(&mut self) {
        let RelayState::SegmentSealing { after } = &self.state else {
            return;
        };
        match after.clone() {
            AfterSeal::Continue => {
                self.filled = 0;
                self.retries_left = self.max_retries;
                self.state = RelayState::Pulling;
            }
            AfterSeal::Finish => self.state = RelayState::Done,
            AfterSeal::Abort(err) => self.fail(err.into()),
        }
    }

    /// Account for a segment that could not be written
    pub fn on_seal_failed(&mut self, err: RelayError) {
        self.fail(err);
    }

    /// Error that moved the machine to [`RelayState::Failed`]
    pub fn take_failure(&mut self) -> Option<RelayError> {
        self.failure.take()
    }

    fn fail(&mut self, err: RelayError) {
        self.failure = Some(err);
        self.state = RelayState::Failed;
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Default)]
pub struct RelayReport {
    pub segments: Vec<SegmentReceipt>,
    pub total_bytes: u64,
    pub elapsed_ms: u64,
}

/// Drives a [`SegmentMachine`] against a chunk source and a segment writer
pub struct UploadLoop<'a> {
    source: &'a mut dyn ChunkSource,
    writer: &'a mut dyn SegmentWriter,
    namer: SegmentNamer,
    max_retries: u32,
    cancel: CancellationToken,
    progress: ProgressTracker,
}

impl<'a> UploadLoop<'a> {
    pub fn new(
        source: &'a mut dyn ChunkSource,
        writer: &'a mut dyn SegmentWriter,
        namer: SegmentNamer,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            writer,
            namer,
            max_retries: 3,
            cancel,
            progress: ProgressTracker::hidden(),
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// Relay the whole stream into sealed segments
    ///
    /// # Returns
    /// * `Result<RelayReport>` - Every segment written, or the first fatal error.
    ///   Segments sealed before a failure stay in the bucket.
    pub async fn run(self) -> Result<RelayReport> {
        let Self {
            source,
            writer,
            mut namer,
            max_retries,
            cancel,
            progress,
        } = self;

        let start = Instant::now();
        let capacity = writer.transfer_capacity();
        let mut machine = SegmentMachine::new(capacity, max_retries);
        let mut buffer: Vec<u8> = Vec::new();
        let mut report = RelayReport::default();

        info!("Relaying into segments of {} bytes", capacity);

        let outcome = loop {
            match machine.next_action() {
                RelayAction::Pull { capacity } => {
                    if cancel.is_cancelled() {
                        break Err(RelayError::Cancelled);
                    }
                    match source.pull(&mut buffer, capacity).await {
                        Ok(pull) => {
                            debug!("Pulled {} bytes ({:?})", pull.written, pull.status);
                            machine.on_pull(pull);
                        }
                        Err(e) => break Err(e),
                    }
                }
                RelayAction::Seal => {
                    let key = namer.next_name();
                    let data = Bytes::from(std::mem::take(&mut buffer));
                    let size = data.len() as u64;
                    match writer.write_segment(&key, data).await {
                        Ok(receipt) => {
                            info!("Sealed segment {} ({} bytes)", receipt.key, receipt.bytes);
                            progress.segment_sealed(size);
                            report.total_bytes += size;
                            report.segments.push(receipt);
                            machine.on_sealed();
                        }
                        Err(e) => {
                            warn!("Writing segment {} failed: {}", key, e);
                            machine.on_seal_failed(e);
                        }
                    }
                }
                RelayAction::Finish => break Ok(()),
                RelayAction::Fail => {
                    break Err(machine
                        .take_failure()
                        .unwrap_or_else(|| RelayError::Generic("relay failed".to_string())));
                }
            }
        };

        progress.finish();
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        outcome.map(|()| report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::chunk::ChunkFormat;
    use crate::export::reader::CollectionCursorReader;
    use crate::export::source::testing::{Fault, MemorySource, sized_doc, sized_docs};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Writer that keeps segments in memory and can fail chosen writes
    struct RecordingWriter {
        capacity: usize,
        segments: Vec<(String, Bytes)>,
        fail_on: Option<usize>,
    }

    impl RecordingWriter {
        fn new(capacity: usize) -> Self {
            Self {
                capacity,
                segments: Vec::new(),
                fail_on: None,
            }
        }

        fn sizes(&self) -> Vec<usize> {
            self.segments.iter().map(|(_, b)| b.len()).collect()
        }
    }

    #[async_trait]
    impl SegmentWriter for RecordingWriter {
        fn transfer_capacity(&self) -> usize {
            self.capacity
        }

        async fn write_segment(&mut self, key: &str, data: Bytes) -> Result<SegmentReceipt> {
            if self.fail_on == Some(self.segments.len()) {
                return Err(UploadError::WriteFailed {
                    key: key.to_string(),
                    message: "gateway unavailable".to_string(),
                }
                .into());
            }
            let receipt = SegmentReceipt {
                key: key.to_string(),
                bytes: data.len(),
                verified: false,
            };
            self.segments.push((key.to_string(), data));
            Ok(receipt)
        }
    }

    /// Source replaying scripted pulls
    struct ScriptedSource {
        pulls: VecDeque<Pull>,
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn pull(&mut self, buf: &mut Vec<u8>, capacity: usize) -> Result<Pull> {
            let pull = self.pulls.pop_front().unwrap_or(Pull {
                written: 0,
                status: PullStatus::EndOfStream,
            });
            assert!(pull.written < capacity);
            buf.extend(std::iter::repeat_n(0u8, pull.written));
            Ok(pull)
        }
    }

    fn pull(written: usize, status: PullStatus) -> Pull {
        Pull { written, status }
    }

    fn transient() -> ReadError {
        ReadError::CursorFailed {
            collection: "a".to_string(),
            message: "reset".to_string(),
        }
    }

    fn reader(source: MemorySource) -> CollectionCursorReader {
        CollectionCursorReader::new(Arc::new(source), ChunkFormat::Bson, CancellationToken::new())
    }

    #[test]
    fn test_machine_rolls_over_on_short_buffer() {
        let mut m = SegmentMachine::new(250, 3);
        assert_eq!(m.next_action(), RelayAction::Pull { capacity: 250 });

        m.on_pull(pull(200, PullStatus::ShortBuffer));
        assert_eq!(m.next_action(), RelayAction::Seal);
        m.on_sealed();
        assert_eq!(m.next_action(), RelayAction::Pull { capacity: 250 });

        m.on_pull(pull(200, PullStatus::EndOfStream));
        m.on_sealed();
        assert_eq!(m.state(), &RelayState::Done);
        assert_eq!(m.next_action(), RelayAction::Finish);
    }

    #[test]
    fn test_machine_retries_with_remaining_capacity() {
        let mut m = SegmentMachine::new(1000, 2);
        m.on_pull(pull(300, PullStatus::Interrupted(transient())));
        assert_eq!(m.next_action(), RelayAction::Pull { capacity: 700 });
        m.on_pull(pull(100, PullStatus::Interrupted(transient())));
        assert_eq!(m.next_action(), RelayAction::Pull { capacity: 600 });

        // budget spent: seal what we have, then fail
        m.on_pull(pull(0, PullStatus::Interrupted(transient())));
        assert_eq!(
            m.state(),
            &RelayState::SegmentSealing {
                after: AfterSeal::Abort(transient())
            }
        );
        m.on_sealed();
        assert_eq!(m.next_action(), RelayAction::Fail);
        assert!(matches!(m.take_failure(), Some(RelayError::Read(_))));
    }

    #[test]
    fn test_machine_retry_budget_resets_per_segment() {
        let mut m = SegmentMachine::new(1000, 1);
        m.on_pull(pull(10, PullStatus::Interrupted(transient())));
        m.on_pull(pull(10, PullStatus::ShortBuffer));
        m.on_sealed();

        m.on_pull(pull(10, PullStatus::Interrupted(transient())));
        assert_eq!(m.next_action(), RelayAction::Pull { capacity: 990 });
    }

    #[test]
    fn test_machine_does_not_retry_encoding_errors() {
        let mut m = SegmentMachine::new(1000, 3);
        m.on_pull(pull(0, PullStatus::Interrupted(ReadError::Encode("bad".into()))));
        assert_eq!(m.next_action(), RelayAction::Fail);
    }

    #[test]
    fn test_machine_fails_without_sealing_empty_segment() {
        let mut m = SegmentMachine::new(1000, 0);
        m.on_pull(pull(0, PullStatus::Interrupted(transient())));
        assert_eq!(m.next_action(), RelayAction::Fail);
    }

    #[test]
    fn test_machine_detects_oversized_chunk() {
        let mut m = SegmentMachine::new(100, 3);
        m.on_pull(pull(0, PullStatus::ShortBuffer));
        assert_eq!(m.next_action(), RelayAction::Fail);
        assert!(matches!(
            m.take_failure(),
            Some(RelayError::Upload(UploadError::OversizedChunk { capacity: 100 }))
        ));
    }

    #[test]
    fn test_machine_seal_failure_is_fatal() {
        let mut m = SegmentMachine::new(100, 3);
        m.on_pull(pull(50, PullStatus::EndOfStream));
        m.on_seal_failed(RelayError::Generic("boom".to_string()));
        assert_eq!(m.next_action(), RelayAction::Fail);
    }

    #[tokio::test]
    async fn test_loop_two_collection_scenario() {
        let source = MemorySource::new("shop")
            .collection("a", sized_docs("a", 3, 100))
            .collection("b", sized_docs("b", 1, 100));
        let mut reader = reader(source);
        let mut writer = RecordingWriter::new(250);

        let report = UploadLoop::new(
            &mut reader,
            &mut writer,
            SegmentNamer::new("", "shop", "bson"),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(writer.sizes(), vec![200, 200]);
        assert_eq!(report.total_bytes, 400);
        assert_eq!(report.segments.len(), 2);
        assert_ne!(report.segments[0].key, report.segments[1].key);
        assert!(report.segments[0].key.starts_with("shop/"));
    }

    #[tokio::test]
    async fn test_loop_empty_database_writes_one_empty_segment() {
        let mut reader = reader(MemorySource::new("empty"));
        let mut writer = RecordingWriter::new(250);

        let report = UploadLoop::new(
            &mut reader,
            &mut writer,
            SegmentNamer::new("", "empty", "bson"),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(writer.sizes(), vec![0]);
        assert_eq!(report.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_loop_segments_concatenate_to_stream() {
        let docs: Vec<_> = (0..20)
            .map(|i| sized_doc(&format!("d-{i}"), 30 + i * 7))
            .collect();
        let mut expected = Vec::new();
        for d in &docs {
            expected.extend(ChunkFormat::Bson.encode(d).unwrap());
        }

        let mut reader = reader(MemorySource::new("shop").collection("a", docs));
        let mut writer = RecordingWriter::new(400);
        UploadLoop::new(
            &mut reader,
            &mut writer,
            SegmentNamer::new("", "shop", "bson"),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        let joined: Vec<u8> = writer.segments.iter().flat_map(|(_, b)| b.to_vec()).collect();
        assert_eq!(joined, expected);
        assert!(writer.sizes().iter().all(|s| *s < 400));
    }

    #[tokio::test]
    async fn test_loop_recovers_from_transient_error() {
        let source = MemorySource::new("shop")
            .collection("a", sized_docs("a", 4, 100))
            .with_fault(Fault::Iterate {
                collection: "a".to_string(),
                index: 1,
            });
        let mut reader = reader(source);
        let mut writer = RecordingWriter::new(1000);

        UploadLoop::new(
            &mut reader,
            &mut writer,
            SegmentNamer::new("", "shop", "bson"),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(writer.sizes(), vec![400]);
    }

    #[tokio::test]
    async fn test_loop_seals_partial_segment_when_retries_exhausted() {
        let mut source = ScriptedSource {
            pulls: VecDeque::from(vec![
                pull(120, PullStatus::Interrupted(transient())),
                pull(0, PullStatus::Interrupted(transient())),
            ]),
        };
        let mut writer = RecordingWriter::new(1000);

        let err = UploadLoop::new(
            &mut source,
            &mut writer,
            SegmentNamer::new("", "shop", "bson"),
            CancellationToken::new(),
        )
        .max_retries(1)
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Read(ReadError::CursorFailed { .. })));
        assert_eq!(writer.sizes(), vec![120]);
    }

    #[tokio::test]
    async fn test_loop_oversized_document_fails() {
        let source = MemorySource::new("shop")
            .collection("a", vec![sized_doc("a", 50), sized_doc("big", 600)]);
        let mut reader = reader(source);
        let mut writer = RecordingWriter::new(500);

        let err = UploadLoop::new(
            &mut reader,
            &mut writer,
            SegmentNamer::new("", "shop", "bson"),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Upload(UploadError::OversizedChunk { capacity: 500 })
        ));
        assert_eq!(writer.sizes(), vec![50]);
    }

    #[tokio::test]
    async fn test_loop_write_failure_is_fatal() {
        let mut reader = reader(
            MemorySource::new("shop").collection("a", sized_docs("a", 3, 100)),
        );
        let mut writer = RecordingWriter::new(150);
        writer.fail_on = Some(1);

        let err = UploadLoop::new(
            &mut reader,
            &mut writer,
            SegmentNamer::new("", "shop", "bson"),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Upload(UploadError::WriteFailed { .. })));
        assert_eq!(writer.sizes(), vec![100]);
    }

    #[tokio::test]
    async fn test_loop_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader = reader(MemorySource::new("shop").collection("a", sized_docs("a", 1, 50)));
        let mut writer = RecordingWriter::new(150);

        let err = UploadLoop::new(
            &mut reader,
            &mut writer,
            SegmentNamer::new("", "shop", "bson"),
            cancel,
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::Cancelled));
        assert!(writer.segments.is_empty());
    }
}
