//! # StreamBackend Trait
//!
//! The seam between the fixture harness and whatever actually hosts the
//! stream. The in-process [`EmulatorClient`](crate::EmulatorClient) implements
//! it, so does [`MockBackend`](crate::mock::MockBackend), and the harness crate
//! provides a Kinesis implementation behind its `live` feature.
use crate::error::BackendError;
use crate::model::{
    GetRecordsOutput, PutRecordsOutput, Record, ShardIteratorKind, StreamDescription,
};
use async_trait::async_trait;

/// Create/delete/describe/put/read primitives against a streaming service.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// from several tasks at once.
///
/// # Example
///
/// ```rust
/// use stream_emulator::{EmulatorConfig, StreamBackend, StreamEmulator, StreamStatus};
///
/// #[tokio::main]
/// async fn main() {
///     let (emulator, client) = StreamEmulator::new(EmulatorConfig::default());
///     tokio::spawn(emulator.run());
///
///     client.create_stream("test-docs-00000000", 1).await.unwrap();
///     let desc = client.describe_stream("test-docs-00000000").await.unwrap();
///     assert_eq!(desc.status, StreamStatus::Active);
///     assert_eq!(desc.shards.len(), 1);
/// }
/// ```
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Start creating a stream. Returns once the request is accepted; the
    /// stream reports `Creating` until it is usable.
    async fn create_stream(&self, name: &str, shard_count: u32) -> Result<(), BackendError>;

    /// Start deleting a stream. Returns once the request is accepted.
    async fn delete_stream(&self, name: &str) -> Result<(), BackendError>;

    /// Current status and shards. `BackendError::NotFound` once it is gone.
    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, BackendError>;

    /// Write a batch of records.
    async fn put_records(
        &self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<PutRecordsOutput, BackendError>;

    /// Names of every stream the backend knows about.
    async fn list_streams(&self) -> Result<Vec<String>, BackendError>;

    /// Obtain an iterator for reading a shard.
    async fn get_shard_iterator(
        &self,
        name: &str,
        shard_id: &str,
        kind: ShardIteratorKind,
    ) -> Result<String, BackendError>;

    /// Read the records available at `iterator`.
    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<u32>,
    ) -> Result<GetRecordsOutput, BackendError>;
}
