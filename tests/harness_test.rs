use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_fixture::stream_emulator::{
    GetRecordsOutput, PutRecordsOutput, ShardIteratorKind, StreamDescription,
};
use stream_fixture::{
    init_tracing, BackendError, DeleteOutcome, EmulatorConfig, HarnessError, LifecycleState,
    PollPolicy, ReaderError, ReaderOptions, ReaderStatus, Record, RecordingReporter, RegistryError,
    ShardRegistry, StartOutcome, StreamBackend, StreamEmulator, StreamHarness,
};

fn fast_poll() -> PollPolicy {
    PollPolicy::every(Duration::from_millis(5)).with_deadline(Duration::from_secs(5))
}

fn fast_reader() -> ReaderOptions {
    ReaderOptions {
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

async fn private_harness(project: &str, shards: u32) -> StreamHarness {
    init_tracing();
    StreamHarness::builder(project)
        .shards(shards)
        .emulator(StreamEmulator::spawn(EmulatorConfig::default()))
        .poll_policy(fast_poll())
        .reader_options(fast_reader())
        .build()
        .await
        .expect("harness")
}

/// Forwards to the emulator and records how many readers were still open
/// whenever a delete reaches the backend.
struct DrainCheck {
    inner: Arc<dyn StreamBackend>,
    registry: Mutex<Option<ShardRegistry>>,
    open_at_delete: AtomicUsize,
    deletes: AtomicUsize,
}

#[async_trait]
impl StreamBackend for DrainCheck {
    async fn create_stream(&self, name: &str, shard_count: u32) -> Result<(), BackendError> {
        self.inner.create_stream(name, shard_count).await
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BackendError> {
        let open = self
            .registry
            .lock()
            .unwrap()
            .as_ref()
            .map(ShardRegistry::len)
            .unwrap_or(0);
        self.open_at_delete.fetch_add(open, Ordering::SeqCst);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_stream(name).await
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, BackendError> {
        self.inner.describe_stream(name).await
    }

    async fn put_records(
        &self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<PutRecordsOutput, BackendError> {
        self.inner.put_records(name, records).await
    }

    async fn list_streams(&self) -> Result<Vec<String>, BackendError> {
        self.inner.list_streams().await
    }

    async fn get_shard_iterator(
        &self,
        name: &str,
        shard_id: &str,
        kind: ShardIteratorKind,
    ) -> Result<String, BackendError> {
        self.inner.get_shard_iterator(name, shard_id, kind).await
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<u32>,
    ) -> Result<GetRecordsOutput, BackendError> {
        self.inner.get_records(iterator, limit).await
    }
}

/// Forwards to the emulator, except that every reader task crashes before
/// it can report a status.
struct CrashingReaders {
    inner: Arc<dyn StreamBackend>,
}

#[async_trait]
impl StreamBackend for CrashingReaders {
    async fn create_stream(&self, name: &str, shard_count: u32) -> Result<(), BackendError> {
        self.inner.create_stream(name, shard_count).await
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BackendError> {
        self.inner.delete_stream(name).await
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, BackendError> {
        self.inner.describe_stream(name).await
    }

    async fn put_records(
        &self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<PutRecordsOutput, BackendError> {
        self.inner.put_records(name, records).await
    }

    async fn list_streams(&self) -> Result<Vec<String>, BackendError> {
        self.inner.list_streams().await
    }

    async fn get_shard_iterator(
        &self,
        _name: &str,
        shard_id: &str,
        _kind: ShardIteratorKind,
    ) -> Result<String, BackendError> {
        panic!("reader on {shard_id} crashed");
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<u32>,
    ) -> Result<GetRecordsOutput, BackendError> {
        self.inner.get_records(iterator, limit).await
    }
}

#[tokio::test]
async fn test_stream_name_is_stable() {
    let harness = private_harness("naming", 1).await;
    let name = harness.stream_name().clone();

    let suffix = name.as_str().strip_prefix("test-naming-").expect("prefix");
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    harness.start().await.unwrap();
    harness.delete().await.unwrap();
    harness.start().await.unwrap();
    assert_eq!(harness.stream_name(), &name);
    harness.delete().await.unwrap();
}

#[tokio::test]
async fn test_start_twice_keeps_the_same_shards() {
    let harness = private_harness("twice", 3).await;

    let first = harness.start().await.unwrap();
    assert!(matches!(first, StartOutcome::Activated { shards: 3, .. }));
    let ids: Vec<String> = harness
        .shards()
        .await
        .unwrap()
        .iter()
        .map(|s| s.shard_id().to_string())
        .collect();

    assert_eq!(harness.start().await.unwrap(), StartOutcome::AlreadyActive);
    let again: Vec<String> = harness
        .shards()
        .await
        .unwrap()
        .iter()
        .map(|s| s.shard_id().to_string())
        .collect();
    assert_eq!(ids, again);

    harness.delete().await.unwrap();
}

#[tokio::test]
async fn test_loaded_record_can_be_read_back() {
    let harness = private_harness("roundtrip", 1).await;

    harness
        .load(vec![Record::new("hello", "a")])
        .await
        .unwrap();
    assert_eq!(harness.state(), LifecycleState::Active);

    let shards = harness.shards().await.unwrap();
    let mut reader = shards[0].open().unwrap();
    let record = tokio::time::timeout(Duration::from_secs(5), reader.next_record())
        .await
        .expect("record in time")
        .expect("record");

    assert_eq!(record.data, b"hello");
    assert_eq!(record.partition_key, "a");
    assert!(!record.sequence_number.is_empty());

    harness.delete().await.unwrap();
    assert_eq!(reader.status(), ReaderStatus::Closed);
}

#[tokio::test]
async fn test_readers_are_closed_before_the_delete_call() {
    init_tracing();
    let check = Arc::new(DrainCheck {
        inner: Arc::new(StreamEmulator::spawn(EmulatorConfig::default())),
        registry: Mutex::new(None),
        open_at_delete: AtomicUsize::new(0),
        deletes: AtomicUsize::new(0),
    });
    let harness = StreamHarness::builder("drain")
        .shards(2)
        .backend(check.clone())
        .poll_policy(fast_poll())
        .reader_options(fast_reader())
        .build()
        .await
        .unwrap();
    *check.registry.lock().unwrap() = Some(harness.controller().registry().clone());

    harness.start().await.unwrap();
    let shards = harness.shards().await.unwrap();
    let readers: Vec<_> = (0..5)
        .map(|i| shards[i % shards.len()].open().unwrap())
        .collect();
    assert_eq!(harness.controller().registry().len(), 5);

    let outcome = harness.delete().await.unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted { readers_closed: 5 });
    assert_eq!(check.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(check.open_at_delete.load(Ordering::SeqCst), 0);
    for reader in &readers {
        assert_eq!(reader.status(), ReaderStatus::Closed);
    }
}

#[tokio::test]
async fn test_delete_discards_the_shard_generation() {
    let harness = private_harness("generations", 2).await;

    harness.start().await.unwrap();
    let old = harness.shards().await.unwrap();
    harness.delete().await.unwrap();
    assert!(harness.shards().await.is_none());

    // Factories of a deleted stream cannot open readers.
    assert!(matches!(
        old[0].open().unwrap_err(),
        RegistryError::Closed { .. }
    ));

    harness.start().await.unwrap();
    let fresh = harness.shards().await.unwrap();
    assert!(fresh[0].generation() > old[0].generation());
    assert!(matches!(
        old[0].open().unwrap_err(),
        RegistryError::Stale { .. }
    ));
    assert!(fresh[0].open().is_ok());

    harness.delete().await.unwrap();
}

#[tokio::test]
async fn test_full_scenario_recreates_an_empty_stream() {
    let harness = private_harness("scenario", 1).await;
    let name = harness.stream_name().to_string();

    harness.start().await.unwrap();
    harness
        .load(vec![Record::new("one", "a"), Record::new("two", "b")])
        .await
        .unwrap();

    let mut reader = harness.shards().await.unwrap()[0].open().unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(5), reader.next_batch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 2);

    harness.delete().await.unwrap();
    let listed = harness.client().list_streams().await.unwrap();
    assert!(!listed.contains(&name));

    harness.start().await.unwrap();
    let client = harness.client();
    let shard = harness.shards().await.unwrap()[0].shard_id().to_string();
    let iterator = client
        .get_shard_iterator(&name, &shard, ShardIteratorKind::TrimHorizon)
        .await
        .unwrap();
    let output = client.get_records(&iterator, None).await.unwrap();
    assert!(output.records.is_empty());

    harness.delete().await.unwrap();
}

#[tokio::test]
async fn test_case_sequence_is_reported_in_order() {
    let reporter = RecordingReporter::new();
    let harness = StreamHarness::builder("sequence")
        .emulator(StreamEmulator::spawn(EmulatorConfig::default()))
        .poll_policy(fast_poll())
        .reader_options(fast_reader())
        .reporter(Arc::new(reporter.clone()))
        .build()
        .await
        .unwrap();

    harness
        .test(
            "reads fixtures",
            vec![Record::new("fixture", "k")],
            |ctx| async move {
                let mut readers = ctx.open_all()?;
                let record = readers[0]
                    .next_record()
                    .await
                    .ok_or_else(|| anyhow::anyhow!("no record"))?;
                anyhow::ensure!(record.data == b"fixture", "unexpected data");
                Ok::<(), anyhow::Error>(())
            },
        )
        .await
        .unwrap();

    assert_eq!(
        reporter.names(),
        vec![
            "[stream-fixture] delete stream",
            "[stream-fixture] create stream",
            "[stream-fixture] load fixtures",
            "reads fixtures",
            "[stream-fixture] delete stream",
        ]
    );
    assert!(reporter.reports().iter().all(|r| r.outcome.is_passed()));
    assert_eq!(harness.state(), LifecycleState::NotStarted);
}

#[tokio::test]
async fn test_panicking_body_still_deletes_the_stream() {
    let client = StreamEmulator::spawn(EmulatorConfig::default());
    let harness = Arc::new(
        StreamHarness::builder("panics")
            .emulator(client.clone())
            .poll_policy(fast_poll())
            .build()
            .await
            .unwrap(),
    );
    let name = harness.stream_name().to_string();

    let runner = harness.clone();
    let joined = tokio::spawn(async move {
        runner
            .test("explodes", Vec::new(), |_| async {
                panic!("body exploded");
                #[allow(unreachable_code)]
                ()
            })
            .await
    })
    .await;

    let err = joined.unwrap_err();
    assert!(err.is_panic());
    assert_eq!(harness.state(), LifecycleState::NotStarted);
    assert!(!client.list_streams().await.unwrap().contains(&name));
}

#[tokio::test]
async fn test_load_failure_is_reported_as_error() {
    let harness = private_harness("badload", 1).await;

    // An empty partition key is rejected by the service.
    let err = harness
        .load(vec![Record::new("x", "")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Backend(BackendError::InvalidArgument(_))
    ));
    assert_eq!(harness.state(), LifecycleState::Active);

    harness.delete().await.unwrap();
}

#[tokio::test]
async fn test_slow_creation_is_polled_until_active() {
    init_tracing();
    let client = StreamEmulator::spawn(EmulatorConfig {
        create_delay: Duration::from_millis(60),
        delete_delay: Duration::from_millis(60),
        ..Default::default()
    });
    let harness = StreamHarness::builder("slow")
        .emulator(client)
        .poll_policy(fast_poll())
        .build()
        .await
        .unwrap();

    let mut states = harness.controller().subscribe();
    harness.start().await.unwrap();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Active);

    harness.delete().await.unwrap();
    assert_eq!(harness.state(), LifecycleState::NotStarted);
}

#[tokio::test]
async fn test_deadline_bounds_the_wait() {
    let client = StreamEmulator::spawn(EmulatorConfig {
        create_delay: Duration::from_secs(3600),
        ..Default::default()
    });
    let harness = StreamHarness::builder("deadline")
        .emulator(client)
        .poll_policy(PollPolicy::every(Duration::from_millis(5)).with_deadline(Duration::from_millis(50)))
        .build()
        .await
        .unwrap();

    let err = harness.start().await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Poll(stream_fixture::PollError::Timeout { .. })
    ));
    assert_eq!(harness.state(), LifecycleState::Pending);
}

#[tokio::test]
async fn test_crashed_reader_does_not_block_deletion() {
    init_tracing();
    let client = StreamEmulator::spawn(EmulatorConfig::default());
    let harness = StreamHarness::builder("crash")
        .backend(Arc::new(CrashingReaders {
            inner: Arc::new(client.clone()),
        }))
        .poll_policy(fast_poll())
        .reader_options(fast_reader())
        .build()
        .await
        .unwrap();
    let name = harness.stream_name().to_string();

    harness.start().await.unwrap();
    let reader = harness.shards().await.unwrap()[0].open().unwrap();
    assert!(matches!(
        reader.wait_closed().await,
        Err(ReaderError::Lost { .. })
    ));

    // The first delete reports the reader that never confirmed its closure.
    let err = harness.delete().await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Registry(RegistryError::CloseFailed { id, .. }) if id == reader.id()
    ));
    assert_eq!(harness.state(), LifecycleState::Active);
    assert!(harness.controller().registry().is_empty());

    // It is forgotten afterwards, so a retry deletes the stream.
    let outcome = harness.delete().await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted { readers_closed: 0 });
    assert_eq!(harness.state(), LifecycleState::NotStarted);
    assert!(!client.list_streams().await.unwrap().contains(&name));
}

#[tokio::test]
async fn test_delete_waits_for_a_start_in_progress() {
    init_tracing();
    let client = StreamEmulator::spawn(EmulatorConfig {
        create_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let harness = Arc::new(
        StreamHarness::builder("overlap")
            .emulator(client.clone())
            .poll_policy(fast_poll())
            .build()
            .await
            .unwrap(),
    );
    let name = harness.stream_name().to_string();

    let mut states = harness.controller().subscribe();
    let starter = harness.clone();
    let start = tokio::spawn(async move { starter.start().await });
    states
        .wait_for(|s| *s == LifecycleState::Pending)
        .await
        .unwrap();

    let deleted = harness.delete().await.unwrap();
    let started = start.await.unwrap().unwrap();

    assert!(matches!(started, StartOutcome::Activated { .. }));
    assert_eq!(deleted, DeleteOutcome::Deleted { readers_closed: 0 });
    assert_eq!(harness.state(), LifecycleState::NotStarted);
    assert!(!client.list_streams().await.unwrap().contains(&name));
}
