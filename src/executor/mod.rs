//! Command execution for mongobucket
//!
//! Wires configuration, the source connection, the export pipeline and the
//! object writer together for the three commands:
//! - `parse`: read the whole database and report its size
//! - `test`: upload one sample object
//! - `store`: export the database into bucket segments

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use mongodb::bson::doc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::{AccessGrant, Capability};
use crate::config::{DestinationConfig, Settings, SourceConfig};
use crate::connection::SourceConnection;
use crate::error::{Result, UploadError};
use crate::export::{
    ChunkSource, CollectionCursorReader, DocumentSource, ProgressTracker, PullStatus,
    RelayReport, SegmentNamer, UploadLoop,
};
use crate::storage::s3::S3Store;
use crate::storage::{ObjectWriter, SegmentReceipt, SegmentWriter};

/// Database name used for the sample upload
const SAMPLE_DATABASE: &str = "testdb";

/// Per-run switches that come from the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Verbose output; also disables the progress spinner
    pub debug: bool,

    /// Print the serialized capability after a successful upload
    pub share_access: bool,

    /// Print the restricted capability instead of the full one
    pub restrict: bool,
}

/// Result of `parse`
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub bytes: u64,
    pub documents: u64,
    pub collections: usize,
    pub elapsed_ms: u64,
}

/// Result of `test` and `store`
#[derive(Debug, Clone, Default)]
pub struct StoreReport {
    pub relay: RelayReport,
    pub documents: u64,
    /// Serialized capability, when sharing was requested
    pub shared_access: Option<String>,
}

/// Runs commands with one set of settings
pub struct Executor {
    settings: Settings,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Executor {
    /// Create an executor
    ///
    /// # Arguments
    /// * `settings` - Runtime settings, with command-line overrides applied
    /// * `options` - Command-line switches
    /// * `cancel` - Token cancelled on Ctrl-C
    pub fn new(settings: Settings, options: RunOptions, cancel: CancellationToken) -> Self {
        Self {
            settings,
            options,
            cancel,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Read every collection and report the export size
    ///
    /// # Arguments
    /// * `source` - Source credentials
    /// * `output` - Optional file receiving the exported bytes
    pub async fn parse(&self, source: &SourceConfig, output: Option<&Path>) -> Result<ParseReport> {
        let connection = Arc::new(
            SourceConnection::connect(source, self.settings.export.cursor_timeout()).await?,
        );
        let result = self.parse_source(connection.clone(), output).await;
        connection.disconnect().await;
        result
    }

    /// Upload a small sample object to check the destination
    pub async fn test_upload(&self, destination: &DestinationConfig) -> Result<StoreReport> {
        let (grant, capability) = self.resolve_access(destination)?;
        let mut writer = self.object_writer(&capability).await?;

        let receipt = self.upload_sample(&mut writer, &capability.prefix).await?;
        let shared_access = self.shared_access(&grant, &capability)?;

        Ok(StoreReport {
            relay: RelayReport {
                total_bytes: receipt.bytes as u64,
                segments: vec![receipt],
                elapsed_ms: 0,
            },
            documents: 1,
            shared_access,
        })
    }

    /// Export the database into segments in the destination bucket
    pub async fn store(
        &self,
        source: &SourceConfig,
        destination: &DestinationConfig,
    ) -> Result<StoreReport> {
        let (grant, capability) = self.resolve_access(destination)?;
        let mut writer = self.object_writer(&capability).await?;

        let connection = Arc::new(
            SourceConnection::connect(source, self.settings.export.cursor_timeout()).await?,
        );
        let result = self
            .relay(connection.clone(), &mut writer, &capability.prefix)
            .await;
        connection.disconnect().await;
        let (relay, documents) = result?;

        info!(
            "Stored {} document(s) in {} segment(s), {} bytes",
            documents,
            relay.segments.len(),
            relay.total_bytes
        );

        Ok(StoreReport {
            relay,
            documents,
            shared_access: self.shared_access(&grant, &capability)?,
        })
    }

    fn resolve_access(&self, destination: &DestinationConfig) -> Result<(AccessGrant, Capability)> {
        let grant = AccessGrant::from_config(destination);
        debug!("Access grant: {:?}", grant);
        let capability = grant.resolve(destination)?;
        Ok((grant, capability))
    }

    async fn object_writer(&self, capability: &Capability) -> Result<ObjectWriter<S3Store>> {
        let capacity = self.settings.export.segment_capacity()?;
        let store = S3Store::new(capability).await;
        Ok(ObjectWriter::new(store, capability.clone(), capacity)
            .with_verify(self.settings.export.verify))
    }

    /// Relay every collection of `source` through `writer`
    ///
    /// # Returns
    /// * `Result<(RelayReport, u64)>` - Segments written and documents exported
    pub async fn relay(
        &self,
        source: Arc<dyn DocumentSource>,
        writer: &mut dyn SegmentWriter,
        prefix: &str,
    ) -> Result<(RelayReport, u64)> {
        let format = self.settings.export.format;
        let namer = SegmentNamer::new(prefix, source.database_name(), format.extension());
        debug!("Segment run id {}", namer.run_id());

        let mut reader = CollectionCursorReader::new(source, format, self.cancel.clone())
            .fetch_timeout(self.settings.export.cursor_timeout());
        let progress = ProgressTracker::new(self.settings.export.progress && !self.options.debug);

        let report = UploadLoop::new(&mut reader, writer, namer, self.cancel.clone())
            .max_retries(self.settings.export.read_retries)
            .progress(progress)
            .run()
            .await?;

        Ok((report, reader.documents_emitted()))
    }

    /// Pull the whole source in segment-sized reads without uploading
    pub async fn parse_source(
        &self,
        source: Arc<dyn DocumentSource>,
        output: Option<&Path>,
    ) -> Result<ParseReport> {
        let start = Instant::now();
        let capacity = self.settings.export.segment_capacity()?;
        let retries = self.settings.export.read_retries;
        let mut reader =
            CollectionCursorReader::new(source, self.settings.export.format, self.cancel.clone())
                .fetch_timeout(self.settings.export.cursor_timeout());

        let mut file = match output {
            Some(path) => Some(tokio::fs::File::create(path).await?),
            None => None,
        };

        let mut buffer = Vec::new();
        let mut failures = 0u32;
        loop {
            buffer.clear();
            let pull = reader.pull(&mut buffer, capacity).await?;
            if let Some(file) = file.as_mut() {
                file.write_all(&buffer).await?;
            }
            if pull.written > 0 {
                failures = 0;
            }

            match pull.status {
                PullStatus::EndOfStream => break,
                PullStatus::ShortBuffer if pull.written == 0 => {
                    return Err(UploadError::OversizedChunk { capacity }.into());
                }
                PullStatus::ShortBuffer => {}
                PullStatus::Interrupted(err) => {
                    failures += 1;
                    if failures > retries {
                        return Err(err.into());
                    }
                    warn!("Read interrupted, retrying ({}/{})", failures, retries);
                }
            }
        }

        if let Some(file) = file.as_mut() {
            file.flush().await?;
        }

        Ok(ParseReport {
            bytes: reader.bytes_emitted(),
            documents: reader.documents_emitted(),
            collections: reader.collections_completed(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Write the sample document as a one-chunk segment
    pub async fn upload_sample(
        &self,
        writer: &mut dyn SegmentWriter,
        prefix: &str,
    ) -> Result<SegmentReceipt> {
        let format = self.settings.export.format;
        let chunk = format.encode(&doc! { "testKey": "testValue" })?;
        let key = SegmentNamer::new(prefix, SAMPLE_DATABASE, format.extension()).next_name();

        let receipt = writer.write_segment(&key, chunk.into()).await?;
        info!("Uploaded sample object {}", receipt.key);
        Ok(receipt)
    }

    /// Serialized capability to print, if sharing was requested
    fn shared_access(
        &self,
        grant: &AccessGrant,
        capability: &Capability,
    ) -> Result<Option<String>> {
        if self.options.restrict {
            let restricted = capability.restricted(grant.restrictions());
            return restricted.serialize().map(Some);
        }
        if self.options.share_access {
            return capability.serialize().map(Some);
        }
        Ok(None)
    }
}
