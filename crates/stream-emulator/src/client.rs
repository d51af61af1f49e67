//! # Emulator Client
//!
//! This module defines the client side of the emulator: a cloneable handle that
//! forwards every [`StreamBackend`] call to the [`StreamEmulator`](crate::StreamEmulator)
//! actor and waits for its answer.

use crate::backend::StreamBackend;
use crate::error::BackendError;
use crate::message::EmulatorRequest;
use crate::model::{
    GetRecordsOutput, PutRecordsOutput, Record, ShardIteratorKind, StreamDescription,
};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// ## EmulatorClient
///
/// The `EmulatorClient` provides the async [`StreamBackend`] API on top of a
/// Tokio mpsc channel; results come back over oneshot channels. The client is
/// cheap to clone and can be shared across tasks and across runtimes.
///
/// * **Cloneable** – holds only a sender, so cloning is inexpensive.
/// * **Lifetime** – the emulator stops once every clone has been dropped.
#[derive(Clone, Debug)]
pub struct EmulatorClient {
    sender: mpsc::Sender<EmulatorRequest>,
}

impl EmulatorClient {
    pub fn new(sender: mpsc::Sender<EmulatorRequest>) -> Self {
        Self { sender }
    }

    /// Whether the emulator behind this client has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Ask the emulator to stop and wait for it to acknowledge.
    pub async fn shutdown(&self) -> Result<(), BackendError> {
        self.request(|respond_to| EmulatorRequest::Shutdown { respond_to })
            .await
    }

    /// Queue a shutdown without waiting; used from `Drop` where awaiting is impossible.
    pub(crate) fn try_shutdown(&self) -> bool {
        let (respond_to, _) = oneshot::channel();
        self.sender
            .try_send(EmulatorRequest::Shutdown { respond_to })
            .is_ok()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, BackendError>>) -> EmulatorRequest,
    ) -> Result<T, BackendError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackendError::EmulatorClosed)?;
        response.await.map_err(|_| BackendError::EmulatorDropped)?
    }
}

#[async_trait]
impl StreamBackend for EmulatorClient {
    async fn create_stream(&self, name: &str, shard_count: u32) -> Result<(), BackendError> {
        self.request(|respond_to| EmulatorRequest::CreateStream {
            name: name.to_string(),
            shard_count,
            respond_to,
        })
        .await
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BackendError> {
        self.request(|respond_to| EmulatorRequest::DeleteStream {
            name: name.to_string(),
            respond_to,
        })
        .await
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, BackendError> {
        self.request(|respond_to| EmulatorRequest::DescribeStream {
            name: name.to_string(),
            respond_to,
        })
        .await
    }

    async fn put_records(
        &self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<PutRecordsOutput, BackendError> {
        self.request(|respond_to| EmulatorRequest::PutRecords {
            name: name.to_string(),
            records,
            respond_to,
        })
        .await
    }

    async fn list_streams(&self) -> Result<Vec<String>, BackendError> {
        self.request(|respond_to| EmulatorRequest::ListStreams { respond_to })
            .await
    }

    async fn get_shard_iterator(
        &self,
        name: &str,
        shard_id: &str,
        kind: ShardIteratorKind,
    ) -> Result<String, BackendError> {
        self.request(|respond_to| EmulatorRequest::GetShardIterator {
            name: name.to_string(),
            shard_id: shard_id.to_string(),
            kind,
            respond_to,
        })
        .await
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<u32>,
    ) -> Result<GetRecordsOutput, BackendError> {
        self.request(|respond_to| EmulatorRequest::GetRecords {
            iterator: iterator.to_string(),
            limit,
            respond_to,
        })
        .await
    }
}
