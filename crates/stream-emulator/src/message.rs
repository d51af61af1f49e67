//! # Emulator Messages
//!
//! This module defines the request type used for communication between the
//! [`EmulatorClient`](crate::EmulatorClient) and the
//! [`StreamEmulator`](crate::StreamEmulator) actor.

use crate::error::BackendError;
use crate::model::{
    GetRecordsOutput, PutRecordsOutput, Record, ShardIteratorKind, StreamDescription,
};
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the emulator.
pub type Response<T> = oneshot::Sender<Result<T, BackendError>>;

/// Requests understood by the emulator actor.
///
/// One variant per [`StreamBackend`](crate::StreamBackend) operation; each
/// carries the channel the actor answers on.
#[derive(Debug)]
pub enum EmulatorRequest {
    CreateStream {
        name: String,
        shard_count: u32,
        respond_to: Response<()>,
    },
    DeleteStream {
        name: String,
        respond_to: Response<()>,
    },
    DescribeStream {
        name: String,
        respond_to: Response<StreamDescription>,
    },
    PutRecords {
        name: String,
        records: Vec<Record>,
        respond_to: Response<PutRecordsOutput>,
    },
    ListStreams {
        respond_to: Response<Vec<String>>,
    },
    GetShardIterator {
        name: String,
        shard_id: String,
        kind: ShardIteratorKind,
        respond_to: Response<String>,
    },
    GetRecords {
        iterator: String,
        limit: Option<u32>,
        respond_to: Response<GetRecordsOutput>,
    },
    /// Stop the event loop. Requests already queued behind it are dropped.
    Shutdown {
        respond_to: Response<()>,
    },
}
