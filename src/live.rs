//! Kinesis adapter, compiled with the `live` feature.
//!
//! Maps every [`StreamBackend`] call onto the AWS SDK and classifies service
//! errors by their error code.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_kinesis::error::ProvideErrorMetadata;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::{PutRecordsRequestEntry, ShardIteratorType};
use aws_sdk_kinesis::Client;
use std::future::Future;
use std::time::SystemTime;
use stream_emulator::{
    BackendError, GetRecordsOutput, PutRecordResult, PutRecordsOutput, Record, ShardInfo,
    ShardIteratorKind, StoredRecord, StreamBackend, StreamDescription, StreamStatus,
};
use tracing::debug;

/// A [`StreamBackend`] talking to Amazon Kinesis.
#[derive(Clone, Debug)]
pub struct KinesisBackend {
    client: Client,
    region: String,
}

impl KinesisBackend {
    /// Load credentials and settings from the environment for `region`.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        debug!(region, "Kinesis client configured");
        Self {
            client: Client::new(&config),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// One page of shards, plus whether the service has more.
    async fn describe_page(
        &self,
        name: &str,
        start: Option<String>,
    ) -> Result<(StreamDescription, bool), BackendError> {
        let output = self
            .client
            .describe_stream()
            .stream_name(name)
            .set_exclusive_start_shard_id(start)
            .send()
            .await
            .map_err(sdk_error)?;
        let description = output
            .stream_description()
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;

        let shards = description
            .shards()
            .iter()
            .map(|shard| {
                let range = shard.hash_key_range();
                ShardInfo {
                    shard_id: shard.shard_id().to_string(),
                    starting_hash_key: hash_key(range.map(|r| r.starting_hash_key())),
                    ending_hash_key: hash_key(range.map(|r| r.ending_hash_key())),
                }
            })
            .collect();

        Ok((
            StreamDescription {
                name: description.stream_name().to_string(),
                status: status_of(description.stream_status())?,
                shards,
            },
            description.has_more_shards(),
        ))
    }

    async fn list_page(&self, start: Option<String>) -> Result<(Vec<String>, bool), BackendError> {
        let output = self
            .client
            .list_streams()
            .set_exclusive_start_stream_name(start)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok((output.stream_names().to_vec(), output.has_more_streams()))
    }
}

/// Keep fetching while the service reports more, starting each page after
/// the key of the last item seen.
async fn drain_pages<T, K, F, Fut>(
    mut items: Vec<T>,
    mut more: bool,
    key: K,
    mut fetch: F,
) -> Result<Vec<T>, BackendError>
where
    K: Fn(&T) -> String,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, bool), BackendError>>,
{
    while more {
        let Some(start) = items.last().map(&key) else {
            break;
        };
        let (page, has_more) = fetch(start).await?;
        debug!(count = page.len(), has_more, "Fetched page");
        // An empty page cannot move the cursor forward.
        more = has_more && !page.is_empty();
        items.extend(page);
    }
    Ok(items)
}

fn sdk_error<E>(err: E) -> BackendError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    match err.code() {
        Some(_) => BackendError::from_code(err.code(), err.message()),
        None => BackendError::Service {
            code: "Sdk".to_string(),
            message: err.to_string(),
        },
    }
}

fn status_of(status: &aws_sdk_kinesis::types::StreamStatus) -> Result<StreamStatus, BackendError> {
    use aws_sdk_kinesis::types::StreamStatus as Kinesis;
    match status {
        Kinesis::Creating => Ok(StreamStatus::Creating),
        Kinesis::Active => Ok(StreamStatus::Active),
        Kinesis::Deleting => Ok(StreamStatus::Deleting),
        Kinesis::Updating => Ok(StreamStatus::Updating),
        other => Err(BackendError::Service {
            code: "UnknownStreamStatus".to_string(),
            message: other.as_str().to_string(),
        }),
    }
}

fn hash_key(raw: Option<&str>) -> u128 {
    raw.and_then(|k| k.parse().ok()).unwrap_or_default()
}

#[async_trait]
impl StreamBackend for KinesisBackend {
    async fn create_stream(&self, name: &str, shard_count: u32) -> Result<(), BackendError> {
        let shard_count = i32::try_from(shard_count)
            .map_err(|_| BackendError::InvalidArgument(format!("shard count {shard_count}")))?;
        self.client
            .create_stream()
            .stream_name(name)
            .shard_count(shard_count)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BackendError> {
        self.client
            .delete_stream()
            .stream_name(name)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn describe_stream(&self, name: &str) -> Result<StreamDescription, BackendError> {
        let (description, more) = self.describe_page(name, None).await?;
        let shards = drain_pages(
            description.shards,
            more,
            |shard| shard.shard_id.clone(),
            |start| async move {
                let (page, more) = self.describe_page(name, Some(start)).await?;
                Ok((page.shards, more))
            },
        )
        .await?;
        Ok(StreamDescription {
            shards,
            ..description
        })
    }

    async fn put_records(
        &self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<PutRecordsOutput, BackendError> {
        let entries = records
            .into_iter()
            .map(|record| {
                PutRecordsRequestEntry::builder()
                    .data(Blob::new(record.data))
                    .partition_key(record.partition_key)
                    .build()
                    .map_err(|e| BackendError::InvalidArgument(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_records()
            .stream_name(name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(sdk_error)?;

        let records = output
            .records()
            .iter()
            .map(|entry| match (entry.shard_id(), entry.sequence_number()) {
                (Some(shard_id), Some(sequence_number)) => PutRecordResult::Written {
                    shard_id: shard_id.to_string(),
                    sequence_number: sequence_number.to_string(),
                },
                _ => PutRecordResult::Failed {
                    error_code: entry.error_code().unwrap_or("Unknown").to_string(),
                    error_message: entry.error_message().unwrap_or_default().to_string(),
                },
            })
            .collect();

        Ok(PutRecordsOutput {
            failed_record_count: output.failed_record_count().unwrap_or(0).max(0) as usize,
            records,
        })
    }

    async fn list_streams(&self) -> Result<Vec<String>, BackendError> {
        let (names, more) = self.list_page(None).await?;
        drain_pages(names, more, String::clone, |start| self.list_page(Some(start))).await
    }

    async fn get_shard_iterator(
        &self,
        name: &str,
        shard_id: &str,
        kind: ShardIteratorKind,
    ) -> Result<String, BackendError> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(name)
            .shard_id(shard_id);
        let request = match kind {
            ShardIteratorKind::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            }
            ShardIteratorKind::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            ShardIteratorKind::AtSequenceNumber(seq) => request
                .shard_iterator_type(ShardIteratorType::AtSequenceNumber)
                .starting_sequence_number(seq),
            ShardIteratorKind::AfterSequenceNumber(seq) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(seq),
        };
        let output = request.send().await.map_err(sdk_error)?;
        output
            .shard_iterator()
            .map(str::to_string)
            .ok_or_else(|| BackendError::NotFound(format!("{name}/{shard_id}")))
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: Option<u32>,
    ) -> Result<GetRecordsOutput, BackendError> {
        let output = self
            .client
            .get_records()
            .shard_iterator(iterator)
            .set_limit(limit.map(|l| l.min(i32::MAX as u32) as i32))
            .send()
            .await
            .map_err(sdk_error)?;

        let records = output
            .records()
            .iter()
            .map(|record| StoredRecord {
                data: record.data().as_ref().to_vec(),
                partition_key: record.partition_key().to_string(),
                sequence_number: record.sequence_number().to_string(),
                approximate_arrival: record
                    .approximate_arrival_timestamp()
                    .and_then(|t| SystemTime::try_from(*t).ok())
                    .unwrap_or_else(SystemTime::now),
            })
            .collect();

        Ok(GetRecordsOutput {
            records,
            next_iterator: output.next_shard_iterator().map(str::to_string),
            millis_behind_latest: output.millis_behind_latest().unwrap_or(0).max(0) as u64,
        })
    }
}
