//! # Stream Harness
//!
//! The facade tests use. A [`StreamHarness`] owns one uniquely named stream
//! and runs every step on it as a reported case:
//!
//! | Step | Case name |
//! |------|-----------|
//! | [`start`](StreamHarness::start) | `[stream-fixture] create stream` |
//! | [`load`](StreamHarness::load) | `[stream-fixture] load fixtures` |
//! | [`delete`](StreamHarness::delete) | `[stream-fixture] delete stream` |
//! | [`close`](StreamHarness::close) | `[stream-fixture] close emulator` |
//!
//! [`test`](StreamHarness::test) strings them together around a test body:
//! delete (clean up leftovers), start, load the fixtures, run the body,
//! delete again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stream_fixture::{Record, StreamHarness};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stream_fixture::HarnessError> {
//!     let harness = StreamHarness::builder("orders").shards(2).build().await?;
//!
//!     harness
//!         .test("reads what was loaded", vec![Record::new("hello", "a")], |ctx| async move {
//!             let mut reader = ctx.shards()[0].open().unwrap();
//!             let record = reader.next_record().await.unwrap();
//!             assert_eq!(record.data, b"hello");
//!         })
//!         .await?;
//!
//!     harness.close().await
//! }
//! ```

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::identity::StreamName;
use crate::lifecycle::{DeleteOutcome, LifecycleController, LifecycleState, StartOutcome};
use crate::poll::PollPolicy;
use crate::reader::{ReaderOptions, ShardFactory, ShardReader};
use crate::registry::RegistryError;
use crate::report::{
    panic_message, CaseOutcome, CaseReport, CaseReporter, TracingReporter, CASE_PREFIX,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use stream_emulator::{
    BackendError, EmulatorClient, EmulatorConfig, EmulatorLease, PutRecordsOutput, Record,
    SharedEmulator, StreamBackend,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// What a test body may return: `()` or any `Result<(), E: Display>`.
pub trait CaseResult {
    fn into_case_result(self) -> Result<(), String>;
}

impl CaseResult for () {
    fn into_case_result(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: fmt::Display> CaseResult for Result<(), E> {
    fn into_case_result(self) -> Result<(), String> {
        self.map_err(|e| e.to_string())
    }
}

/// What a test body gets to work with.
#[derive(Clone)]
pub struct CaseContext {
    stream: StreamName,
    backend: Arc<dyn StreamBackend>,
    shards: Vec<ShardFactory>,
}

impl CaseContext {
    pub fn stream_name(&self) -> &StreamName {
        &self.stream
    }

    pub fn client(&self) -> &Arc<dyn StreamBackend> {
        &self.backend
    }

    pub fn shards(&self) -> &[ShardFactory] {
        &self.shards
    }

    /// One reader per shard, in shard order.
    pub fn open_all(&self) -> Result<Vec<ShardReader>, RegistryError> {
        self.shards.iter().map(ShardFactory::open).collect()
    }
}

enum Target {
    /// The process-wide emulator; `None` once closed.
    Shared(Option<EmulatorLease>),
    Private(EmulatorClient),
    Custom,
    Live,
}

enum TargetChoice {
    Default,
    Emulator(EmulatorClient),
    Backend(Arc<dyn StreamBackend>),
}

/// Builder for [`StreamHarness`].
pub struct StreamHarnessBuilder {
    config: HarnessConfig,
    emulator_config: EmulatorConfig,
    target: TargetChoice,
    reporter: Arc<dyn CaseReporter>,
}

impl StreamHarnessBuilder {
    pub fn shards(mut self, shard_count: u32) -> Self {
        self.config.shard_count = shard_count;
        self
    }

    /// Target a live Kinesis region. Requires the `live` feature.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = Some(region.into());
        self
    }

    /// Use a private emulator instead of the shared one.
    pub fn emulator(mut self, client: EmulatorClient) -> Self {
        self.target = TargetChoice::Emulator(client);
        self
    }

    /// Settings for the shared emulator if this harness is the one starting it.
    pub fn emulator_config(mut self, config: EmulatorConfig) -> Self {
        self.emulator_config = config;
        self
    }

    /// Use any backend, e.g. a mock.
    pub fn backend(mut self, backend: Arc<dyn StreamBackend>) -> Self {
        self.target = TargetChoice::Backend(backend);
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.config.poll = policy;
        self
    }

    pub fn reader_options(mut self, options: ReaderOptions) -> Self {
        self.config.reader = options;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn CaseReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub async fn build(self) -> Result<StreamHarness, HarnessError> {
        if self.config.shard_count == 0 {
            return Err(HarnessError::Config("shard count must be at least 1".into()));
        }

        let (backend, target): (Arc<dyn StreamBackend>, Target) = match self.target {
            TargetChoice::Emulator(client) => (Arc::new(client.clone()), Target::Private(client)),
            TargetChoice::Backend(backend) => (backend, Target::Custom),
            TargetChoice::Default => match &self.config.region {
                Some(region) => (connect_live(region).await?, Target::Live),
                None => {
                    let lease = SharedEmulator::acquire(&self.emulator_config)?;
                    (Arc::new(lease.client().clone()), Target::Shared(Some(lease)))
                }
            },
        };

        let name = StreamName::generate(&self.config.project);
        info!(stream = %name, shard_count = self.config.shard_count, live = self.config.is_live(), "Harness ready");

        let controller = LifecycleController::new(
            name,
            self.config.shard_count,
            backend,
            self.config.effective_poll(),
            self.config.reader.clone(),
        );
        Ok(StreamHarness {
            controller,
            reporter: self.reporter,
            target: Mutex::new(target),
        })
    }
}

#[cfg(feature = "live")]
async fn connect_live(region: &str) -> Result<Arc<dyn StreamBackend>, HarnessError> {
    Ok(Arc::new(crate::live::KinesisBackend::connect(region).await))
}

#[cfg(not(feature = "live"))]
async fn connect_live(region: &str) -> Result<Arc<dyn StreamBackend>, HarnessError> {
    Err(HarnessError::Config(format!(
        "region {region} requested but stream-fixture was built without the `live` feature"
    )))
}

/// One test stream and the cases run against it.
pub struct StreamHarness {
    controller: LifecycleController,
    reporter: Arc<dyn CaseReporter>,
    target: Mutex<Target>,
}

impl StreamHarness {
    pub fn builder(project: impl Into<String>) -> StreamHarnessBuilder {
        Self::from_config(HarnessConfig::new(project))
    }

    pub fn from_config(config: HarnessConfig) -> StreamHarnessBuilder {
        StreamHarnessBuilder {
            config,
            emulator_config: EmulatorConfig::default(),
            target: TargetChoice::Default,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn stream_name(&self) -> &StreamName {
        self.controller.name()
    }

    pub fn client(&self) -> Arc<dyn StreamBackend> {
        self.controller.backend().clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Shard factories of the active stream; `None` unless it is active.
    pub async fn shards(&self) -> Option<Vec<ShardFactory>> {
        self.controller.shards().await
    }

    pub async fn start(&self) -> Result<StartOutcome, HarnessError> {
        self.run_case(&case_name("create stream"), self.controller.start())
            .await
    }

    pub async fn delete(&self) -> Result<DeleteOutcome, HarnessError> {
        self.run_case(&case_name("delete stream"), self.controller.delete())
            .await
    }

    pub async fn load(&self, records: Vec<Record>) -> Result<PutRecordsOutput, HarnessError> {
        self.run_case(&case_name("load fixtures"), self.controller.load(records))
            .await
    }

    /// Stop using the emulator: release the shared lease, or shut a private
    /// emulator down. Live targets have nothing to close.
    pub async fn close(&self) -> Result<(), HarnessError> {
        let mut target = self.target.lock().await;
        if matches!(*target, Target::Live) {
            warn!("close() called on a live target");
            return Err(HarnessError::NotEmulated);
        }

        self.run_case(&case_name("close emulator"), async {
            match &mut *target {
                Target::Shared(lease) => {
                    if let Some(lease) = lease.take() {
                        lease.release().await?;
                    }
                    Ok(())
                }
                Target::Private(client) => match client.shutdown().await {
                    Ok(()) | Err(BackendError::EmulatorClosed) | Err(BackendError::EmulatorDropped) => {
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                },
                Target::Custom | Target::Live => Ok(()),
            }
        })
        .await
    }

    /// Run `body` against a fresh stream.
    ///
    /// Order: delete, start, load `fixtures` (if any), `body`, delete. A
    /// failing setup step stops the sequence. The body runs on its own task;
    /// if it panics the stream is still deleted and the panic is then resumed.
    pub async fn test<F, Fut>(
        &self,
        name: &str,
        fixtures: Vec<Record>,
        body: F,
    ) -> Result<(), HarnessError>
    where
        F: FnOnce(CaseContext) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: CaseResult + Send + 'static,
    {
        self.delete().await?;
        self.start().await?;
        if !fixtures.is_empty() {
            self.load(fixtures).await?;
        }

        let context = CaseContext {
            stream: self.stream_name().clone(),
            backend: self.client(),
            shards: self.shards().await.unwrap_or_default(),
        };

        self.reporter.case_started(name);
        let started = Instant::now();
        let (outcome, panic) = match tokio::spawn(body(context)).await {
            Ok(output) => match output.into_case_result() {
                Ok(()) => (CaseOutcome::Passed, None),
                Err(message) => (CaseOutcome::Failed(message), None),
            },
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                (
                    CaseOutcome::Panicked(panic_message(payload.as_ref())),
                    Some(payload),
                )
            }
            Err(e) => (CaseOutcome::Failed(e.to_string()), None),
        };
        self.reporter.case_finished(&CaseReport {
            name: name.to_string(),
            outcome: outcome.clone(),
            elapsed: started.elapsed(),
        });

        let cleanup = self.delete().await;
        if let Err(e) = &cleanup {
            error!(case = name, error = %e, "Deleting the stream after the case failed");
        }

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        if let CaseOutcome::Failed(message) = outcome {
            return Err(HarnessError::CaseFailed {
                name: name.to_string(),
                message,
                cleanup: cleanup.err().map(Box::new),
            });
        }
        cleanup.map(|_| ())
    }

    async fn run_case<T>(
        &self,
        name: &str,
        step: impl Future<Output = Result<T, HarnessError>>,
    ) -> Result<T, HarnessError> {
        self.reporter.case_started(name);
        let started = Instant::now();
        let result = step.await;
        let outcome = match &result {
            Ok(_) => CaseOutcome::Passed,
            Err(e) => CaseOutcome::Failed(e.to_string()),
        };
        self.reporter.case_finished(&CaseReport {
            name: name.to_string(),
            outcome,
            elapsed: started.elapsed(),
        });
        result
    }
}

impl Drop for StreamHarness {
    fn drop(&mut self) {
        let state = self.controller.state();
        if state != LifecycleState::NotStarted {
            warn!(stream = %self.controller.name(), %state, "Harness dropped without deleting its stream");
        }
    }
}

fn case_name(step: &str) -> String {
    format!("{CASE_PREFIX} {step}")
}
