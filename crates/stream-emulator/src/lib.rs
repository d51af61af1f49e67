//! # Stream Emulator
//!
//! This crate provides the backend side of the stream fixture harness: the
//! [`StreamBackend`] trait every adapter implements, the data model shared by
//! all adapters, and an in-process emulator that behaves like a managed
//! streaming service (Kinesis) closely enough for lifecycle tests.
//!
//! ## Components
//!
//! - [`StreamBackend`] - create/delete/describe/put/list/read primitives.
//! - [`StreamEmulator`] - an actor that owns every emulated stream and
//!   processes requests sequentially. No locks, no shared state.
//! - [`EmulatorClient`] - the cloneable request side of the actor; implements
//!   [`StreamBackend`].
//! - [`shared`] - a process-wide emulator with reference-counted leases.
//! - [`mock`] - a scripted backend for asserting exact call sequences.
//!
//! ## Quick Start
//!
//! ```rust
//! use stream_emulator::{EmulatorConfig, Record, ShardIteratorKind, StreamBackend, StreamEmulator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = StreamEmulator::spawn(EmulatorConfig::default());
//!
//!     client.create_stream("test-docs-0badf00d", 1).await.unwrap();
//!     client
//!         .put_records("test-docs-0badf00d", vec![Record::new("hello", "a")])
//!         .await
//!         .unwrap();
//!
//!     let iterator = client
//!         .get_shard_iterator("test-docs-0badf00d", "shardId-000000000000", ShardIteratorKind::TrimHorizon)
//!         .await
//!         .unwrap();
//!     let batch = client.get_records(&iterator, None).await.unwrap();
//!     assert_eq!(batch.records[0].data, b"hello");
//! }
//! ```
//!
//! ## Status Transitions
//!
//! With [`EmulatorConfig::create_delay`] and [`EmulatorConfig::delete_delay`]
//! set, streams report `CREATING` / `DELETING` for that long, which is what
//! callers polling for readiness need to be exercised against.

pub mod backend;
pub mod client;
pub mod emulator;
pub mod error;
pub mod message;
pub mod mock;
pub mod model;
pub mod shared;

// Re-export core types for convenience
pub use backend::StreamBackend;
pub use client::EmulatorClient;
pub use emulator::{EmulatorConfig, StreamEmulator};
pub use error::BackendError;
pub use message::{EmulatorRequest, Response};
pub use model::{
    GetRecordsOutput, PutRecordResult, PutRecordsOutput, Record, ShardInfo, ShardIteratorKind,
    StoredRecord, StreamDescription, StreamStatus,
};
pub use shared::{EmulatorLease, SharedEmulator};
