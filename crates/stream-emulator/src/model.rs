//! # Stream Model
//!
//! Plain data types shared by every [`StreamBackend`](crate::StreamBackend)
//! implementation: what a stream looks like when described, what a caller
//! writes, and what a shard reader gets back.
//!
//! The shapes follow the Kinesis API closely enough that a live adapter can
//! convert to and from them field by field.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Status reported by `describe_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Creating,
    Active,
    Deleting,
    Updating,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Creating => "CREATING",
            StreamStatus::Active => "ACTIVE",
            StreamStatus::Deleting => "DELETING",
            StreamStatus::Updating => "UPDATING",
        };
        f.write_str(s)
    }
}

/// One shard as reported by `describe_stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: String,
    /// Inclusive start of the shard's hash key range.
    pub starting_hash_key: u128,
    /// Inclusive end of the shard's hash key range.
    pub ending_hash_key: u128,
}

/// Result of `describe_stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub name: String,
    pub status: StreamStatus,
    pub shards: Vec<ShardInfo>,
}

impl StreamDescription {
    /// Shard identifiers in the order the backend reported them.
    pub fn shard_ids(&self) -> Vec<String> {
        self.shards.iter().map(|s| s.shard_id.clone()).collect()
    }
}

/// A record to be written with `put_records`.
///
/// Deserializable so that fixtures can be kept next to the tests in JSON:
///
/// ```json
/// [{ "data": "hello", "partition_key": "a" }]
/// ```
///
/// A string `data` field is taken as UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "data_as_text", alias = "Data")]
    pub data: Vec<u8>,
    #[serde(alias = "PartitionKey", alias = "partitionKey")]
    pub partition_key: String,
}

impl Record {
    pub fn new(data: impl Into<Vec<u8>>, partition_key: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            partition_key: partition_key.into(),
        }
    }
}

/// A record as read back from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub data: Vec<u8>,
    pub partition_key: String,
    pub sequence_number: String,
    pub approximate_arrival: SystemTime,
}

/// Per-record outcome of a `put_records` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutRecordResult {
    Written {
        shard_id: String,
        sequence_number: String,
    },
    Failed {
        error_code: String,
        error_message: String,
    },
}

/// Result of `put_records`. A non-zero `failed_record_count` means a partial
/// failure; the call itself still succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PutRecordsOutput {
    pub failed_record_count: usize,
    pub records: Vec<PutRecordResult>,
}

/// Where a shard iterator starts reading.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShardIteratorKind {
    /// Oldest record still in the shard.
    #[default]
    TrimHorizon,
    /// Only records written after the iterator was obtained.
    Latest,
    AtSequenceNumber(String),
    AfterSequenceNumber(String),
}

/// Result of `get_records`.
///
/// `next_iterator` is `None` once the shard has been closed and every record
/// in it has been returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRecordsOutput {
    pub records: Vec<StoredRecord>,
    pub next_iterator: Option<String>,
    pub millis_behind_latest: u64,
}

mod data_as_text {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Data {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(data) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => serializer.serialize_bytes(data),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Data::deserialize(deserializer)? {
            Data::Text(text) => text.into_bytes(),
            Data::Bytes(bytes) => bytes,
        })
    }
}
