//! # Mock Backend & Testing Guide
//!
//! `MockBackend` implements [`StreamBackend`] entirely in memory from a queue
//! of scripted answers. It lets lifecycle code be tested deterministically
//! (exact call counts, injected failures) without running the emulator.
//!
//! ## When to use the Mock vs the Emulator
//!
//! | Feature | MockBackend | StreamEmulator |
//! |---------|-------------|----------------|
//! | **State** | None, answers are scripted | Real streams, shards and records |
//! | **Call assertions** | Every call is recorded | Not recorded |
//! | **Error Injection** | Easy (`return_err`) | Only what the service would do |
//! | **Use Case** | Ordering and idempotence of callers | Round-trips, readers, full scenarios |
//!
//! ## Example
//!
//! ```rust
//! use stream_emulator::mock::{BackendCall, MockBackend};
//! use stream_emulator::{BackendError, StreamBackend, StreamStatus};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockBackend::new();
//!     mock.expect_create().return_ok(());
//!     mock.expect_describe()
//!         .return_ok(MockBackend::description("s", StreamStatus::Active, 1));
//!     mock.expect_delete()
//!         .return_err(BackendError::InUse("s".into()));
//!
//!     mock.create_stream("s", 1).await.unwrap();
//!     assert_eq!(mock.describe_stream("s").await.unwrap().shards.len(), 1);
//!     assert!(mock.delete_stream("s").await.is_err());
//!
//!     assert_eq!(mock.count(|c| matches!(c, BackendCall::CreateStream { .. })), 1);
//!     mock.verify();
//! }
//! ```

use crate::backend::StreamBackend;
use crate::error::BackendError;
use crate::model::{
    GetRecordsOutput, PutRecordsOutput, Record, ShardInfo, ShardIteratorKind, StreamDescription,
    StreamStatus,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// =============================================================================
// RECORDED CALLS
// =============================================================================

/// A call the mock received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateStream { name: String, shard_count: u32 },
    DeleteStream { name: String },
    DescribeStream { name: String },
    PutRecords { name: String, count: usize },
    ListStreams,
    GetShardIterator { name: String, shard_id: String },
    GetRecords { iterator: String },
}

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

/// A scripted answer for the next call of a given kind.
enum Expectation {
    Create(Result<(), BackendError>),
    Delete(Result<(), BackendError>),
    Describe(Result<StreamDescription, BackendError>),
    Put(Result<PutRecordsOutput, BackendError>),
    List(Result<Vec<String>, BackendError>),
    Iterator(Result<String, BackendError>),
    Records(Result<GetRecordsOutput, BackendError>),
}

#[derive(Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    calls: Vec<BackendCall>,
    mismatches: Vec<String>,
}

/// A scripted [`StreamBackend`].
///
/// Answers are consumed in the order they were queued, regardless of kind;
/// a call whose kind does not match the next answer fails with a
/// `Service { code: "UnexpectedCall" }` error and is reported by
/// [`verify`](Self::verify).
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

/// Builder returned by the `expect_*` methods.
pub struct ExpectationBuilder<T> {
    state: Arc<Mutex<MockState>>,
    wrap: fn(Result<T, BackendError>) -> Expectation,
}

impl<T> ExpectationBuilder<T> {
    /// Answer with a successful result.
    pub fn return_ok(self, value: T) {
        let mut state = self.state.lock().unwrap();
        state.expectations.push_back((self.wrap)(Ok(value)));
    }

    /// Answer with an error.
    pub fn return_err(self, error: BackendError) {
        let mut state = self.state.lock().unwrap();
        state.expectations.push_back((self.wrap)(Err(error)));
    }
}

impl MockBackend {
    /// Creates a new mock with no expectations.
    pub fn new() -> Self {
        Self::default()
    }

    fn builder<T>(&self, wrap: fn(Result<T, BackendError>) -> Expectation) -> ExpectationBuilder<T> {
        ExpectationBuilder {
            state: self.state.clone(),
            wrap,
        }
    }

    /// Expects a `create_stream` call.
    pub fn expect_create(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Create)
    }

    /// Expects a `delete_stream` call.
    pub fn expect_delete(&self) -> ExpectationBuilder<()> {
        self.builder(Expectation::Delete)
    }

    /// Expects a `describe_stream` call.
    pub fn expect_describe(&self) -> ExpectationBuilder<StreamDescription> {
        self.builder(Expectation::Describe)
    }

    /// Expects a `put_records` call.
    pub fn expect_put(&self) -> ExpectationBuilder<PutRecordsOutput> {
        self.builder(Expectation::Put)
    }

    /// Expects a `list_streams` call.
    pub fn expect_list(&self) -> ExpectationBuilder<Vec<String>> {
        self.builder(Expectation::List)
    }

    /// Expects a `get_shard_iterator` call.
    pub fn expect_shard_iterator(&self) -> ExpectationBuilder<String> {
        self.builder(Expectation::Iterator)
    }

    /// Expects a `get_records` call.
    pub fn expect_records(&self) -> ExpectationBuilder<GetRecordsOutput> {
        self.builder(Expectation::Records)
    }

    /// Convenience: a description with `shard_count` evenly spread shards.
    pub fn description(name: &str, status: StreamStatus, shard_count: u32) -> StreamDescription {
        let shards = (0..shard_count)
            .map(|i| ShardInfo {
                shard_id: format!("shardId-{i:012}"),
                starting_hash_key: 0,
                ending_hash_key: u128::MAX,
            })
            .collect();
        StreamDescription {
            name: name.to_string(),
            status,
            shards,
        }
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of received calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| predicate(c))
            .count()
    }

    /// Verifies that all expectations were met and no call was unexpected.
    pub fn verify(&self) {
        let state = self.state.lock().unwrap();
        if !state.mismatches.is_empty() {
            panic!("Unexpected calls: {:?}", state.mismatches);
        }
        if !state.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining",
                state.expectations.len()
            );
        }
    }

    fn next<T>(
        &self,
        call: BackendCall,
        take: fn(Expectation) -> Result<Result<T, BackendError>, Expectation>,
    ) -> Result<T, BackendError> {
        let mut state = self.state.lock().unwrap();
        let description = format!("{call:?}");
        state.calls.push(call);
        let Some(expectation) = state.expectations.pop_front() else {
            state.mismatches.push(format!("{description} with no expectation left"));
            return Err(unexpected(&description));
        };
        match take(expectation) {
            Ok(response) => response,
            Err(other) => {
                // Put it back so the caller the answer was meant for still gets it.
                state.expectations.push_front(other);
                state.mismatches.push(description.clone());
                Err(unexpected(&description))
            }
        }
    }
}

fn unexpected(description: &str) -> BackendError {
    BackendError::Service {
        code: "UnexpectedCall".to_string(),
        message: description.to_string(),
    }
}

#[async_trait]
impl StreamBackend for MockBackend {
    async fn create_stream(&self, name: &str, shard_count: u32) -> Result<(), BackendError> {
        let call = BackendCall::CreateStream {
            name: name.to_string(),
            shard_count,
        };
        self.next(call, |e| match e {
            Expectation::Create(r) => Ok(r),
            other => Err(other),
        })
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BackendError> {
        let call = BackendCall::DeleteStream {
            name: name.to_string(),
        };
        self.next(call, |e| match e {
            Expectation::Delete(r) => Ok(r),
            other => Err(other),
        })
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, BackendError> {
        let call = BackendCall::DescribeStream {
            name: name.to_string(),
        };
        self.next(call, |e| match e {
            Expectation::Describe(r) => Ok(r),
            other => Err(other),
        })
    }

    async fn put_records(
        &self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<PutRecordsOutput, BackendError> {
        let call = BackendCall::PutRecords {
            name: name.to_string(),
            count: records.len(),
        };
        self.next(call, |e| match e {
            Expectation::Put(r) => Ok(r),
            other => Err(other),
        })
    }

    async fn list_streams(&self) -> Result<Vec<String>, BackendError> {
        self.next(BackendCall::ListStreams, |e| match e {
            Expectation::List(r) => Ok(r),
            other => Err(other),
        })
    }

    async fn get_shard_iterator(
        &self,
        name: &str,
        shard_id: &str,
        _kind: ShardIteratorKind,
    ) -> Result<String, BackendError> {
        let call = BackendCall::GetShardIterator {
            name: name.to_string(),
            shard_id: shard_id.to_string(),
        };
        self.next(call, |e| match e {
            Expectation::Iterator(r) => Ok(r),
            other => Err(other),
        })
    }

    async fn get_records(
        &self,
        iterator: &str,
        _limit: Option<u32>,
    ) -> Result<GetRecordsOutput, BackendError> {
        let call = BackendCall::GetRecords {
            iterator: iterator.to_string(),
        };
        self.next(call, |e| match e {
            Expectation::Records(r) => Ok(r),
            other => Err(other),
        })
    }
}
