//! # Stream Emulator Actor
//!
//! This module defines the `StreamEmulator`, an in-process stand-in for a
//! managed streaming service. It implements the "Server" side of the actor
//! model: it owns every emulated stream and processes requests sequentially,
//! so the store needs no locking.

use crate::client::EmulatorClient;
use crate::error::BackendError;
use crate::message::EmulatorRequest;
use crate::model::{
    GetRecordsOutput, PutRecordResult, PutRecordsOutput, Record, ShardInfo, ShardIteratorKind,
    StoredRecord, StreamDescription, StreamStatus,
};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MAX_BATCH_RECORDS: usize = 500;
const MAX_PARTITION_KEY_LEN: usize = 256;
const MAX_RECORD_BYTES: usize = 1024 * 1024;
const MAX_GET_RECORDS: usize = 10_000;
const MAX_SHARDS: u32 = 500;

/// Timing and capacity knobs for the emulator.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// How long a new stream reports `CREATING` before it becomes `ACTIVE`.
    pub create_delay: Duration,
    /// How long a deleted stream reports `DELETING` before it is gone.
    pub delete_delay: Duration,
    /// Capacity of the request channel.
    pub buffer_size: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            create_delay: Duration::ZERO,
            delete_delay: Duration::ZERO,
            buffer_size: 64,
        }
    }
}

#[derive(Debug)]
enum Phase {
    Creating { ready_at: Instant },
    Active,
    Deleting { gone_at: Instant },
}

#[derive(Debug)]
struct EmulatedShard {
    info: ShardInfo,
    records: Vec<StoredRecord>,
}

#[derive(Debug)]
struct EmulatedStream {
    /// Distinguishes a re-created stream from an earlier one with the same name.
    incarnation: u64,
    phase: Phase,
    shards: Vec<EmulatedShard>,
    next_sequence: u64,
}

impl EmulatedStream {
    fn status(&self) -> StreamStatus {
        match self.phase {
            Phase::Creating { .. } => StreamStatus::Creating,
            Phase::Active => StreamStatus::Active,
            Phase::Deleting { .. } => StreamStatus::Deleting,
        }
    }

    fn shard_index_for(&self, partition_key: &str) -> usize {
        let hash = hash_key(partition_key);
        self.shards
            .iter()
            .position(|s| s.info.starting_hash_key <= hash && hash <= s.info.ending_hash_key)
            .unwrap_or(0)
    }
}

/// Parsed form of the opaque iterator strings handed out by the emulator.
#[derive(Debug, PartialEq)]
struct IteratorToken {
    incarnation: u64,
    shard: usize,
    position: usize,
    name: String,
}

impl IteratorToken {
    fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.incarnation, self.shard, self.position, self.name
        )
    }

    fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(4, ':');
        Some(Self {
            incarnation: parts.next()?.parse().ok()?,
            shard: parts.next()?.parse().ok()?,
            position: parts.next()?.parse().ok()?,
            name: parts.next()?.to_string(),
        })
    }
}

/// The in-process stream service.
///
/// # Architecture Note
/// This struct is the "Server" half of the emulator. It owns the state
/// (`streams`) and the receiver end of the channel; [`EmulatorClient`] is the
/// cloneable request side.
///
/// Stream status transitions are time based rather than timer driven: a
/// stream created at `t` reports `CREATING` until `t + create_delay` and is
/// promoted lazily when the next request arrives. Deletion works the same
/// way with `delete_delay`.
pub struct StreamEmulator {
    receiver: mpsc::Receiver<EmulatorRequest>,
    config: EmulatorConfig,
    streams: HashMap<String, EmulatedStream>,
    next_incarnation: u64,
}

impl StreamEmulator {
    /// Creates a new emulator and its associated client.
    ///
    /// The emulator does nothing until [`run`](Self::run) is awaited,
    /// typically inside `tokio::spawn`.
    pub fn new(config: EmulatorConfig) -> (Self, EmulatorClient) {
        let (sender, receiver) = mpsc::channel(config.buffer_size.max(1));
        let emulator = Self {
            receiver,
            config,
            streams: HashMap::new(),
            next_incarnation: 1,
        };
        (emulator, EmulatorClient::new(sender))
    }

    /// Spawns the emulator on the current runtime and returns its client.
    pub fn spawn(config: EmulatorConfig) -> EmulatorClient {
        let (emulator, client) = Self::new(config);
        tokio::spawn(emulator.run());
        client
    }

    /// Runs the event loop until every client has been dropped.
    pub async fn run(mut self) {
        info!("Emulator started");

        while let Some(msg) = self.receiver.recv().await {
            if let EmulatorRequest::Shutdown { respond_to } = msg {
                info!(streams = self.streams.len(), "Shutdown requested");
                let _ = respond_to.send(Ok(()));
                break;
            }
            self.settle(Instant::now());
            self.handle(msg);
        }

        info!(streams = self.streams.len(), "Emulator stopped");
    }

    fn handle(&mut self, msg: EmulatorRequest) {
        match msg {
            EmulatorRequest::CreateStream {
                name,
                shard_count,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_stream(name, shard_count));
            }
            EmulatorRequest::DeleteStream { name, respond_to } => {
                let _ = respond_to.send(self.delete_stream(&name));
            }
            EmulatorRequest::DescribeStream { name, respond_to } => {
                let _ = respond_to.send(self.describe_stream(&name));
            }
            EmulatorRequest::PutRecords {
                name,
                records,
                respond_to,
            } => {
                let _ = respond_to.send(self.put_records(&name, records));
            }
            EmulatorRequest::ListStreams { respond_to } => {
                let mut names: Vec<String> = self.streams.keys().cloned().collect();
                names.sort();
                debug!(count = names.len(), "ListStreams");
                let _ = respond_to.send(Ok(names));
            }
            EmulatorRequest::GetShardIterator {
                name,
                shard_id,
                kind,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_shard_iterator(&name, &shard_id, kind));
            }
            EmulatorRequest::GetRecords {
                iterator,
                limit,
                respond_to,
            } => {
                let _ = respond_to.send(self.get_records(&iterator, limit));
            }
            EmulatorRequest::Shutdown { respond_to } => {
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    /// Promote streams whose creation finished and drop those whose deletion did.
    fn settle(&mut self, now: Instant) {
        for (name, stream) in self.streams.iter_mut() {
            if let Phase::Creating { ready_at } = stream.phase {
                if ready_at <= now {
                    stream.phase = Phase::Active;
                    info!(stream = %name, "Stream active");
                }
            }
        }
        self.streams.retain(|name, stream| match stream.phase {
            Phase::Deleting { gone_at } if gone_at <= now => {
                info!(stream = %name, "Stream gone");
                false
            }
            _ => true,
        });
    }

    fn create_stream(&mut self, name: String, shard_count: u32) -> Result<(), BackendError> {
        debug!(stream = %name, shard_count, "CreateStream");
        if name.is_empty() || name.len() > 128 {
            return Err(BackendError::InvalidArgument(format!(
                "invalid stream name '{name}'"
            )));
        }
        if shard_count == 0 || shard_count > MAX_SHARDS {
            return Err(BackendError::InvalidArgument(format!(
                "shard count must be between 1 and {MAX_SHARDS}, got {shard_count}"
            )));
        }
        if self.streams.contains_key(&name) {
            warn!(stream = %name, "Stream already exists");
            return Err(BackendError::InUse(name));
        }

        let incarnation = self.next_incarnation;
        self.next_incarnation += 1;
        let stream = EmulatedStream {
            incarnation,
            phase: Phase::Creating {
                ready_at: Instant::now() + self.config.create_delay,
            },
            shards: shard_layout(shard_count)
                .into_iter()
                .map(|info| EmulatedShard {
                    info,
                    records: Vec::new(),
                })
                .collect(),
            next_sequence: 1,
        };
        self.streams.insert(name.clone(), stream);
        info!(stream = %name, shard_count, size = self.streams.len(), "Stream creating");

        // A zero delay should be observable as ACTIVE on the very next describe.
        self.settle(Instant::now());
        Ok(())
    }

    fn delete_stream(&mut self, name: &str) -> Result<(), BackendError> {
        debug!(stream = %name, "DeleteStream");
        let stream = self
            .streams
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        match stream.phase {
            Phase::Creating { .. } => {
                warn!(stream = %name, "Delete while creating");
                Err(BackendError::InUse(name.to_string()))
            }
            Phase::Deleting { .. } => Ok(()),
            Phase::Active => {
                stream.phase = Phase::Deleting {
                    gone_at: Instant::now() + self.config.delete_delay,
                };
                info!(stream = %name, "Stream deleting");
                self.settle(Instant::now());
                Ok(())
            }
        }
    }

    fn describe_stream(&self, name: &str) -> Result<StreamDescription, BackendError> {
        let stream = self
            .streams
            .get(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        let status = stream.status();
        debug!(stream = %name, %status, "DescribeStream");
        let shards = match status {
            StreamStatus::Creating => Vec::new(),
            _ => stream.shards.iter().map(|s| s.info.clone()).collect(),
        };
        Ok(StreamDescription {
            name: name.to_string(),
            status,
            shards,
        })
    }

    fn put_records(
        &mut self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<PutRecordsOutput, BackendError> {
        debug!(stream = %name, count = records.len(), "PutRecords");
        validate_batch(&records)?;
        let stream = self
            .streams
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        if !matches!(stream.phase, Phase::Active) {
            return Err(BackendError::InUse(format!(
                "stream {name} is {}",
                stream.status()
            )));
        }

        let arrival = SystemTime::now();
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let shard = stream.shard_index_for(&record.partition_key);
            let sequence_number = format_sequence(stream.next_sequence);
            stream.next_sequence += 1;
            let target = &mut stream.shards[shard];
            target.records.push(StoredRecord {
                data: record.data,
                partition_key: record.partition_key,
                sequence_number: sequence_number.clone(),
                approximate_arrival: arrival,
            });
            results.push(PutRecordResult::Written {
                shard_id: target.info.shard_id.clone(),
                sequence_number,
            });
        }
        info!(stream = %name, count = results.len(), "Records written");
        Ok(PutRecordsOutput {
            failed_record_count: 0,
            records: results,
        })
    }

    fn get_shard_iterator(
        &self,
        name: &str,
        shard_id: &str,
        kind: ShardIteratorKind,
    ) -> Result<String, BackendError> {
        debug!(stream = %name, shard = %shard_id, ?kind, "GetShardIterator");
        let stream = self
            .streams
            .get(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        let shard = stream
            .shards
            .iter()
            .position(|s| s.info.shard_id == shard_id)
            .ok_or_else(|| BackendError::NotFound(format!("{name}/{shard_id}")))?;
        let records = &stream.shards[shard].records;

        let position = match kind {
            ShardIteratorKind::TrimHorizon => 0,
            ShardIteratorKind::Latest => records.len(),
            ShardIteratorKind::AtSequenceNumber(seq) => {
                let seq = parse_sequence(&seq)?;
                records
                    .iter()
                    .position(|r| sequence_of(r) >= seq)
                    .unwrap_or(records.len())
            }
            ShardIteratorKind::AfterSequenceNumber(seq) => {
                let seq = parse_sequence(&seq)?;
                records
                    .iter()
                    .position(|r| sequence_of(r) > seq)
                    .unwrap_or(records.len())
            }
        };

        Ok(IteratorToken {
            incarnation: stream.incarnation,
            shard,
            position,
            name: name.to_string(),
        }
        .encode())
    }

    fn get_records(
        &self,
        iterator: &str,
        limit: Option<u32>,
    ) -> Result<GetRecordsOutput, BackendError> {
        let token = IteratorToken::decode(iterator).ok_or_else(|| {
            BackendError::InvalidArgument(format!("malformed shard iterator '{iterator}'"))
        })?;
        let stream = self
            .streams
            .get(&token.name)
            .filter(|s| s.incarnation == token.incarnation)
            .ok_or_else(|| BackendError::NotFound(token.name.clone()))?;
        let shard = stream.shards.get(token.shard).ok_or_else(|| {
            BackendError::InvalidArgument(format!("unknown shard in iterator '{iterator}'"))
        })?;

        let limit = limit
            .map(|l| (l as usize).clamp(1, MAX_GET_RECORDS))
            .unwrap_or(MAX_GET_RECORDS);
        let start = token.position.min(shard.records.len());
        let end = (start + limit).min(shard.records.len());
        let records = shard.records[start..end].to_vec();
        debug!(stream = %token.name, shard = %shard.info.shard_id, count = records.len(), "GetRecords");

        let millis_behind_latest = shard.records[end..]
            .first()
            .and_then(|r| r.approximate_arrival.elapsed().ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(GetRecordsOutput {
            records,
            next_iterator: Some(
                IteratorToken {
                    position: end,
                    ..token
                }
                .encode(),
            ),
            millis_behind_latest,
        })
    }
}

fn validate_batch(records: &[Record]) -> Result<(), BackendError> {
    if records.is_empty() || records.len() > MAX_BATCH_RECORDS {
        return Err(BackendError::InvalidArgument(format!(
            "a batch must hold between 1 and {MAX_BATCH_RECORDS} records, got {}",
            records.len()
        )));
    }
    for record in records {
        let key_len = record.partition_key.chars().count();
        if key_len == 0 || key_len > MAX_PARTITION_KEY_LEN {
            return Err(BackendError::InvalidArgument(format!(
                "partition key must be 1 to {MAX_PARTITION_KEY_LEN} characters"
            )));
        }
        if record.data.len() > MAX_RECORD_BYTES {
            return Err(BackendError::InvalidArgument(format!(
                "record data exceeds {MAX_RECORD_BYTES} bytes"
            )));
        }
    }
    Ok(())
}

/// Evenly split the 128-bit hash key space across `count` shards.
fn shard_layout(count: u32) -> Vec<ShardInfo> {
    let width = u128::MAX / count as u128;
    (0..count)
        .map(|i| {
            let start = width * i as u128;
            let end = if i + 1 == count {
                u128::MAX
            } else {
                start + width - 1
            };
            ShardInfo {
                shard_id: format!("shardId-{i:012}"),
                starting_hash_key: start,
                ending_hash_key: end,
            }
        })
        .collect()
}

/// FNV-1a over the partition key, stable across runs and processes.
fn hash_key(partition_key: &str) -> u128 {
    const OFFSET: u128 = 0x6c62272e07bb014262b821756295c58d;
    const PRIME: u128 = 0x0000000001000000000000000000013b;
    partition_key.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ byte as u128).wrapping_mul(PRIME)
    })
}

fn format_sequence(n: u64) -> String {
    format!("{n:020}")
}

fn parse_sequence(raw: &str) -> Result<u64, BackendError> {
    raw.parse()
        .map_err(|_| BackendError::InvalidArgument(format!("invalid sequence number '{raw}'")))
}

fn sequence_of(record: &StoredRecord) -> u64 {
    record.sequence_number.parse().unwrap_or(0)
}
