//! # Shard Readers
//!
//! A [`ShardFactory`] exists for every shard of an active stream. Opening it
//! registers a new [`ShardReader`] and starts a task that pages through the
//! shard with `get_records`, forwarding non-empty batches.
//!
//! A reader stops when
//! - it is closed ([`ShardReader::close`], dropping it, or the registry
//!   closing every reader before deletion),
//! - the backend reports the end of the shard, or
//! - a read fails.
//!
//! Either way its task removes it from the registry first and then publishes
//! the terminal [`ReaderStatus`], so by the time anyone observes "closed" the
//! handle is no longer counted as open.

use crate::identity::StreamName;
use crate::registry::{HandleId, RegistryError, ShardRegistry, WeakRegistry};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use stream_emulator::{BackendError, ShardIteratorKind, StoredRecord, StreamBackend};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BATCH_BUFFER: usize = 16;

/// How a reader reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Where in the shard to start.
    pub iterator: ShardIteratorKind,
    /// Maximum records per `get_records` call.
    pub limit: Option<u32>,
    /// Pause between reads once the reader has caught up.
    #[serde(rename = "poll_interval_ms", with = "crate::config::millis")]
    pub poll_interval: Duration,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            iterator: ShardIteratorKind::TrimHorizon,
            limit: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Lifecycle of a reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderStatus {
    Open,
    /// Closed on request.
    Closed,
    /// The shard was closed by the backend and fully read.
    EndOfShard,
    Failed(BackendError),
}

impl ReaderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReaderStatus::Open)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("Reader on {shard_id} failed: {source}")]
    Read {
        shard_id: String,
        #[source]
        source: BackendError,
    },
    #[error("Reader on {shard_id} stopped without reporting a status")]
    Lost { shard_id: String },
}

/// Opens readers on one shard of the current stream generation.
#[derive(Clone)]
pub struct ShardFactory {
    stream: StreamName,
    shard_id: String,
    generation: u64,
    backend: Arc<dyn StreamBackend>,
    registry: ShardRegistry,
    defaults: ReaderOptions,
}

impl std::fmt::Debug for ShardFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardFactory")
            .field("stream", &self.stream)
            .field("shard_id", &self.shard_id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl ShardFactory {
    pub(crate) fn new(
        stream: StreamName,
        shard_id: String,
        generation: u64,
        backend: Arc<dyn StreamBackend>,
        registry: ShardRegistry,
        defaults: ReaderOptions,
    ) -> Self {
        Self {
            stream,
            shard_id,
            generation,
            backend,
            registry,
            defaults,
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open a reader with the harness's default options.
    pub fn open(&self) -> Result<ShardReader, RegistryError> {
        self.open_with(self.defaults.clone())
    }

    /// Open a reader. Fails once the stream this factory belongs to is being
    /// deleted or has been replaced by a new one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open_with(&self, options: ReaderOptions) -> Result<ShardReader, RegistryError> {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ReaderStatus::Open);
        let id = self.registry.register(
            self.generation,
            &self.shard_id,
            cancel.clone(),
            status_rx.clone(),
        )?;
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_BUFFER);

        let task = ReaderTask {
            id,
            stream: self.stream.clone(),
            shard_id: self.shard_id.clone(),
            backend: self.backend.clone(),
            registry: self.registry.downgrade(),
            options,
            cancel: cancel.clone(),
            batches: batch_tx,
            status: status_tx,
        };
        tokio::spawn(task.run());

        info!(stream = %self.stream, shard = %self.shard_id, %id, "Reader opened");
        Ok(ShardReader {
            id,
            shard_id: self.shard_id.clone(),
            batches: batch_rx,
            pending: VecDeque::new(),
            cancel,
            status: status_rx,
        })
    }
}

struct ReaderTask {
    id: HandleId,
    stream: StreamName,
    shard_id: String,
    backend: Arc<dyn StreamBackend>,
    registry: WeakRegistry,
    options: ReaderOptions,
    cancel: CancellationToken,
    batches: mpsc::Sender<Vec<StoredRecord>>,
    status: watch::Sender<ReaderStatus>,
}

impl ReaderTask {
    async fn run(self) {
        let status = self.read_shard().await;
        match &status {
            ReaderStatus::Failed(e) => {
                warn!(stream = %self.stream, shard = %self.shard_id, id = %self.id, error = %e, "Reader failed")
            }
            other => {
                debug!(stream = %self.stream, shard = %self.shard_id, id = %self.id, status = ?other, "Reader stopped")
            }
        }
        self.registry.deregister(self.id);
        self.status.send_replace(status);
    }

    async fn read_shard(&self) -> ReaderStatus {
        let iterator = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return ReaderStatus::Closed,
            result = self.backend.get_shard_iterator(
                self.stream.as_str(),
                &self.shard_id,
                self.options.iterator.clone(),
            ) => match result {
                Ok(iterator) => iterator,
                Err(e) => return ReaderStatus::Failed(e),
            },
        };

        let mut next = Some(iterator);
        while let Some(iterator) = next.take() {
            let output = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ReaderStatus::Closed,
                result = self.backend.get_records(&iterator, self.options.limit) => match result {
                    Ok(output) => output,
                    Err(e) => return ReaderStatus::Failed(e),
                },
            };

            let caught_up = output.records.is_empty();
            if !caught_up {
                debug!(shard = %self.shard_id, count = output.records.len(), "Batch read");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return ReaderStatus::Closed,
                    sent = self.batches.send(output.records) => {
                        if sent.is_err() {
                            // Nobody is listening any more.
                            return ReaderStatus::Closed;
                        }
                    }
                }
            }

            next = output.next_iterator;
            if next.is_some() && caught_up {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return ReaderStatus::Closed,
                    _ = tokio::time::sleep(self.options.poll_interval) => {}
                }
            }
        }

        ReaderStatus::EndOfShard
    }
}

/// An open read handle on one shard.
///
/// Dropping the reader closes it.
#[derive(Debug)]
pub struct ShardReader {
    id: HandleId,
    shard_id: String,
    batches: mpsc::Receiver<Vec<StoredRecord>>,
    pending: VecDeque<StoredRecord>,
    cancel: CancellationToken,
    status: watch::Receiver<ReaderStatus>,
}

impl ShardReader {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Current status of the reader task.
    pub fn status(&self) -> ReaderStatus {
        self.status.borrow().clone()
    }

    /// The next non-empty batch, or `None` once the reader has stopped and
    /// everything it read has been consumed.
    pub async fn next_batch(&mut self) -> Option<Vec<StoredRecord>> {
        if !self.pending.is_empty() {
            return Some(self.pending.drain(..).collect());
        }
        self.batches.recv().await
    }

    /// The next record, or `None` once the reader has stopped and been drained.
    pub async fn next_record(&mut self) -> Option<StoredRecord> {
        if self.pending.is_empty() {
            let batch = self.batches.recv().await?;
            self.pending.extend(batch);
        }
        self.pending.pop_front()
    }

    /// Ask the reader to stop and wait until it has.
    pub async fn close(&self) -> Result<ReaderStatus, ReaderError> {
        self.cancel.cancel();
        self.wait_closed().await
    }

    /// Wait for the reader to stop on its own (end of shard or failure) or
    /// because it was closed.
    pub async fn wait_closed(&self) -> Result<ReaderStatus, ReaderError> {
        let mut status = self.status.clone();
        let result = status
            .wait_for(ReaderStatus::is_terminal)
            .await
            .map(|s| s.clone());
        result.map_err(|_| ReaderError::Lost {
            shard_id: self.shard_id.clone(),
        })
    }

    /// Like [`wait_closed`](Self::wait_closed), but a failed read is an error.
    pub async fn finished(&self) -> Result<(), ReaderError> {
        match self.wait_closed().await? {
            ReaderStatus::Failed(source) => Err(ReaderError::Read {
                shard_id: self.shard_id.clone(),
                source,
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for ShardReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_emulator::mock::MockBackend;
    use stream_emulator::{EmulatorConfig, GetRecordsOutput, Record, StreamEmulator};
    use std::time::SystemTime;

    fn stored(data: &str, seq: u64) -> StoredRecord {
        StoredRecord {
            data: data.as_bytes().to_vec(),
            partition_key: "a".to_string(),
            sequence_number: format!("{seq:020}"),
            approximate_arrival: SystemTime::now(),
        }
    }

    fn factory(backend: Arc<dyn StreamBackend>, registry: &ShardRegistry, stream: &str) -> ShardFactory {
        let generation = registry.reset();
        ShardFactory {
            stream: StreamName::from(stream.to_string()),
            shard_id: "shardId-000000000000".to_string(),
            generation,
            backend,
            registry: registry.clone(),
            defaults: ReaderOptions {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn reads_until_end_of_shard() {
        let mock = MockBackend::new();
        mock.expect_shard_iterator().return_ok("it-1".into());
        mock.expect_records().return_ok(GetRecordsOutput {
            records: vec![stored("one", 1), stored("two", 2)],
            next_iterator: Some("it-2".into()),
            millis_behind_latest: 0,
        });
        mock.expect_records().return_ok(GetRecordsOutput {
            records: vec![],
            next_iterator: None,
            millis_behind_latest: 0,
        });

        let registry = ShardRegistry::new();
        let factory = factory(Arc::new(mock.clone()), &registry, "s");
        let mut reader = factory.open().unwrap();

        let batch = reader.next_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].data, b"two");
        assert!(reader.next_batch().await.is_none());
        assert_eq!(reader.wait_closed().await.unwrap(), ReaderStatus::EndOfShard);
        assert!(registry.is_empty());
        mock.verify();
    }

    #[tokio::test]
    async fn read_failures_are_reported() {
        let mock = MockBackend::new();
        mock.expect_shard_iterator()
            .return_err(BackendError::NotFound("s".into()));

        let registry = ShardRegistry::new();
        let reader = factory(Arc::new(mock), &registry, "s").open().unwrap();

        let err = reader.finished().await.unwrap_err();
        assert!(matches!(err, ReaderError::Read { source: BackendError::NotFound(_), .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_stops_a_caught_up_reader() {
        let client = StreamEmulator::spawn(EmulatorConfig::default());
        client.create_stream("idle", 1).await.unwrap();

        let registry = ShardRegistry::new();
        let reader = factory(Arc::new(client), &registry, "idle").open().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.len(), 1);

        assert_eq!(reader.close().await.unwrap(), ReaderStatus::Closed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn records_arrive_one_by_one() {
        let client = StreamEmulator::spawn(EmulatorConfig::default());
        client.create_stream("rec", 1).await.unwrap();
        client
            .put_records("rec", vec![Record::new("x", "k"), Record::new("y", "k")])
            .await
            .unwrap();

        let registry = ShardRegistry::new();
        let mut reader = factory(Arc::new(client), &registry, "rec").open().unwrap();
        assert_eq!(reader.next_record().await.unwrap().data, b"x");
        assert_eq!(reader.next_record().await.unwrap().data, b"y");
    }

    #[tokio::test]
    async fn stale_factories_cannot_open() {
        let registry = ShardRegistry::new();
        let factory = factory(Arc::new(MockBackend::new()), &registry, "s");
        registry.reset();

        let err = factory.open().unwrap_err();
        assert!(matches!(err, RegistryError::Stale { .. }));
    }
}
