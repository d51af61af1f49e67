//! # Lifecycle Controller
//!
//! Owns the state of one test stream and moves it through
//!
//! ```text
//! NotStarted --start--> Pending --(status ACTIVE)--> Active
//!     ^                                                 |
//!     +----(describe: not found)---- Deleting <--delete-+
//! ```
//!
//! Every transition takes the controller's async mutex, so `start`, `delete`
//! and `load` never interleave. The current state can be read at any time
//! through [`state`](LifecycleController::state) without waiting for it.
//!
//! Deletion drains the [`ShardRegistry`] before the backend is asked to delete
//! the stream: no reader is still polling a shard when the stream goes away.

use crate::error::HarnessError;
use crate::identity::StreamName;
use crate::poll::{poll_until, PollPolicy};
use crate::reader::{ReaderOptions, ShardFactory};
use crate::registry::ShardRegistry;
use std::fmt;
use std::sync::Arc;
use stream_emulator::{PutRecordsOutput, PutRecordResult, Record, StreamBackend, StreamStatus};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    NotStarted,
    /// Create issued, waiting for the stream to become active.
    Pending,
    Active,
    /// Delete in progress.
    Deleting,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::NotStarted => "not started",
            LifecycleState::Pending => "pending",
            LifecycleState::Active => "active",
            LifecycleState::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The stream was created (or finished creating) and is now active.
    Activated { shards: usize, generation: u64 },
    /// Nothing to do.
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { readers_closed: usize },
    /// Nothing was running; no backend call was made.
    AlreadyAbsent,
}

/// Drives one stream through its lifecycle against a [`StreamBackend`].
pub struct LifecycleController {
    name: StreamName,
    shard_count: u32,
    backend: Arc<dyn StreamBackend>,
    registry: ShardRegistry,
    poll: PollPolicy,
    reader: ReaderOptions,
    state: watch::Sender<LifecycleState>,
    /// Shard factories of the active generation; `None` unless `Active`.
    shards: Mutex<Option<Vec<ShardFactory>>>,
}

impl LifecycleController {
    pub fn new(
        name: StreamName,
        shard_count: u32,
        backend: Arc<dyn StreamBackend>,
        poll: PollPolicy,
        reader: ReaderOptions,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::NotStarted);
        Self {
            name,
            shard_count,
            backend,
            registry: ShardRegistry::new(),
            poll,
            reader,
            state,
            shards: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &StreamName {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn StreamBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Shard factories of the active stream, or `None` unless `Active`.
    pub async fn shards(&self) -> Option<Vec<ShardFactory>> {
        self.shards.lock().await.clone()
    }

    fn set_state(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(stream = %self.name, from = %previous, to = %next, "State changed");
        }
    }

    /// Create the stream and wait until it is active.
    ///
    /// Idempotent: an active stream is left alone. A stream left `Pending` by
    /// an earlier failed wait is not created again; the wait resumes.
    #[instrument(skip(self), fields(stream = %self.name))]
    pub async fn start(&self) -> Result<StartOutcome, HarnessError> {
        let mut shards = self.shards.lock().await;
        self.start_locked(&mut shards).await
    }

    async fn start_locked(
        &self,
        shards: &mut Option<Vec<ShardFactory>>,
    ) -> Result<StartOutcome, HarnessError> {
        match self.state() {
            LifecycleState::Active => {
                debug!("Stream already active");
                return Ok(StartOutcome::AlreadyActive);
            }
            LifecycleState::Deleting => {
                warn!("Start requested while a delete is unfinished");
                return Err(HarnessError::InvalidState {
                    operation: "start",
                    state: LifecycleState::Deleting,
                });
            }
            LifecycleState::NotStarted => {
                info!(shard_count = self.shard_count, "Creating stream");
                if let Err(e) = self
                    .backend
                    .create_stream(self.name.as_str(), self.shard_count)
                    .await
                {
                    error!(error = %e, "Create failed");
                    return Err(e.into());
                }
                self.set_state(LifecycleState::Pending);
            }
            LifecycleState::Pending => {
                info!("Resuming wait for a pending stream");
            }
        }

        let this = self;
        let description = poll_until(&self.poll, None, self.name.as_str(), move || async move {
            match this.backend.describe_stream(this.name.as_str()).await {
                Ok(desc) if desc.status == StreamStatus::Active => Ok(Some(desc)),
                Ok(desc) => {
                    debug!(status = %desc.status, "Stream not active yet");
                    Ok(None)
                }
                // Creation may not be visible yet.
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .inspect_err(|e| error!(error = %e, "Waiting for the stream to become active failed"))?;

        let generation = self.registry.reset();
        let factories: Vec<ShardFactory> = description
            .shard_ids()
            .into_iter()
            .map(|shard_id| {
                ShardFactory::new(
                    self.name.clone(),
                    shard_id,
                    generation,
                    self.backend.clone(),
                    self.registry.clone(),
                    self.reader.clone(),
                )
            })
            .collect();
        let count = factories.len();
        *shards = Some(factories);
        self.set_state(LifecycleState::Active);

        info!(shards = count, generation, "Stream active");
        Ok(StartOutcome::Activated {
            shards: count,
            generation,
        })
    }

    /// Close every open reader, delete the stream and wait until it is gone.
    ///
    /// Idempotent: with nothing running no backend call is made.
    #[instrument(skip(self), fields(stream = %self.name))]
    pub async fn delete(&self) -> Result<DeleteOutcome, HarnessError> {
        let mut shards = self.shards.lock().await;

        let mut readers_closed = 0;
        match self.state() {
            LifecycleState::NotStarted => {
                debug!("Nothing to delete");
                return Ok(DeleteOutcome::AlreadyAbsent);
            }
            LifecycleState::Pending | LifecycleState::Active => {
                readers_closed = self
                    .registry
                    .close_all()
                    .await
                    .inspect_err(|e| error!(error = %e, "Closing readers failed"))?;
                *shards = None;
                self.set_state(LifecycleState::Deleting);
            }
            LifecycleState::Deleting => {
                info!("Retrying an unfinished delete");
            }
        }

        info!(readers_closed, "Deleting stream");
        match self.backend.delete_stream(self.name.as_str()).await {
            Ok(()) => {}
            // Already gone, e.g. a retry after the first delete went through.
            Err(e) if e.is_not_found() => debug!("Stream already absent"),
            Err(e) => {
                error!(error = %e, "Delete failed");
                return Err(e.into());
            }
        }

        let this = self;
        poll_until(&self.poll, None, self.name.as_str(), move || async move {
            match this.backend.describe_stream(this.name.as_str()).await {
                Ok(desc) => {
                    debug!(status = %desc.status, "Stream still present");
                    Ok(None)
                }
                Err(e) if e.is_not_found() => Ok(Some(())),
                Err(e) => Err(e),
            }
        })
        .await
        .inspect_err(|e| error!(error = %e, "Waiting for the stream to disappear failed"))?;

        self.set_state(LifecycleState::NotStarted);
        info!("Stream deleted");
        Ok(DeleteOutcome::Deleted { readers_closed })
    }

    /// Write `records` in one batch, starting the stream first if needed.
    ///
    /// Any per-record failure fails the whole load. An empty batch writes
    /// nothing.
    #[instrument(skip(self, records), fields(stream = %self.name, count = records.len()))]
    pub async fn load(&self, records: Vec<Record>) -> Result<PutRecordsOutput, HarnessError> {
        let mut shards = self.shards.lock().await;
        self.start_locked(&mut shards).await?;

        if records.is_empty() {
            debug!("No records to load");
            return Ok(PutRecordsOutput::default());
        }

        let total = records.len();
        let output = self
            .backend
            .put_records(self.name.as_str(), records)
            .await
            .inspect_err(|e| error!(error = %e, "Load failed"))?;

        if output.failed_record_count > 0 {
            let first_error = output
                .records
                .iter()
                .find_map(|r| match r {
                    PutRecordResult::Failed {
                        error_code,
                        error_message,
                    } => Some(format!("{error_code}: {error_message}")),
                    PutRecordResult::Written { .. } => None,
                })
                .unwrap_or_else(|| "unknown".to_string());
            error!(failed = output.failed_record_count, total, %first_error, "Partial load");
            return Err(HarnessError::PartialLoad {
                failed: output.failed_record_count,
                total,
                first_error,
            });
        }

        info!(total, "Records loaded");
        Ok(output)
    }
}
