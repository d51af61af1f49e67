//! # Stream Fixture
//!
//! > **Ephemeral Kinesis streams for integration tests.**
//!
//! This crate gives every test suite its own uniquely named stream, waits
//! until it is usable, hands out per-shard readers for assertions and tears
//! everything down again, as often as the suite needs, against either the
//! in-process emulator or a live Kinesis region.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### One harness, one stream
//! A [`StreamHarness`] owns exactly one stream name (`test-<project>-<hex>`)
//! for its whole life. Starting, loading and deleting are idempotent, so a
//! test can always begin with "delete whatever is left" and end the same way.
//!
//! ### Drain before delete
//! Readers are tracked in a [`ShardRegistry`]. Deleting the stream first
//! closes every reader and waits until each has confirmed, so no task is
//! still polling a shard that is about to disappear.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Backend ([`stream_emulator`])
//! The [`StreamBackend`] trait, the shared data model, the emulator actor
//! and a scripted mock.
//!
//! ### 2. The State Machine ([`lifecycle`])
//! - **Role**: create -> poll -> active, delete -> poll -> gone, load.
//! - **Key items**: [`LifecycleController`], [`LifecycleState`].
//!
//! ### 3. The Readers ([`registry`], [`reader`])
//! - **Role**: open-handle bookkeeping and the tasks that page through shards.
//! - **Key items**: [`ShardFactory`], [`ShardReader`].
//!
//! ### 4. The Facade ([`harness`], [`report`])
//! - **Role**: what tests call. Each step is a reported case.
//! - **Key items**: [`StreamHarness`], [`CaseReporter`].
//!
//! ### 5. Plumbing ([`poll`], [`config`], [`telemetry`])
//! Fixed-interval polling, `STREAM_FIXTURE_*` configuration, tracing setup.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Emulator (default)
//! RUST_LOG=stream_fixture=debug cargo test
//!
//! # Live Kinesis
//! STREAM_FIXTURE_REGION=us-east-2 cargo test --features live -- --ignored
//! ```

pub mod config;
pub mod error;
pub mod harness;
pub mod identity;
pub mod lifecycle;
#[cfg(feature = "live")]
pub mod live;
pub mod poll;
pub mod reader;
pub mod registry;
pub mod report;
pub mod telemetry;

pub use config::HarnessConfig;
pub use error::HarnessError;
pub use harness::{CaseContext, CaseResult, StreamHarness, StreamHarnessBuilder};
pub use identity::StreamName;
pub use lifecycle::{DeleteOutcome, LifecycleController, LifecycleState, StartOutcome};
pub use poll::{poll_until, PollError, PollPolicy};
pub use reader::{ReaderError, ReaderOptions, ReaderStatus, ShardFactory, ShardReader};
pub use registry::{HandleId, RegistryError, ShardRegistry};
pub use report::{CaseOutcome, CaseReport, CaseReporter, RecordingReporter, TracingReporter};
pub use telemetry::init_tracing;

pub use stream_emulator;
pub use stream_emulator::{
    BackendError, EmulatorClient, EmulatorConfig, Record, StoredRecord, StreamBackend,
    StreamEmulator,
};
