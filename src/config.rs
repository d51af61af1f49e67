//! Harness configuration.
//!
//! A [`HarnessConfig`] can be built in code, deserialized (durations are
//! written in milliseconds), or read from the environment:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `STREAM_FIXTURE_REGION` | Target a live Kinesis region instead of the emulator |
//! | `STREAM_FIXTURE_SHARDS` | Shard count of the test stream |
//! | `STREAM_FIXTURE_POLL_MS` | Interval between status checks |

use crate::error::HarnessError;
use crate::poll::PollPolicy;
use crate::reader::ReaderOptions;
use serde::Deserialize;
use std::time::Duration;

pub const REGION_VAR: &str = "STREAM_FIXTURE_REGION";
pub const SHARDS_VAR: &str = "STREAM_FIXTURE_SHARDS";
pub const POLL_MS_VAR: &str = "STREAM_FIXTURE_POLL_MS";

/// How long a live target may take to create or delete a stream.
pub const LIVE_DEADLINE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HarnessConfig {
    /// Used in the stream name, `test-<project>-<suffix>`.
    pub project: String,
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    /// Live Kinesis region; `None` targets the emulator.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub poll: PollPolicy,
    #[serde(default)]
    pub reader: ReaderOptions,
}

fn default_shard_count() -> u32 {
    1
}

impl HarnessConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            shard_count: default_shard_count(),
            region: None,
            poll: PollPolicy::default(),
            reader: ReaderOptions::default(),
        }
    }

    /// Defaults overridden by the `STREAM_FIXTURE_*` environment variables.
    pub fn from_env(project: impl Into<String>) -> Result<Self, HarnessError> {
        Self::from_lookup(project, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(
        project: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, HarnessError> {
        let mut config = Self::new(project);

        if let Some(region) = lookup(REGION_VAR).filter(|r| !r.trim().is_empty()) {
            config.region = Some(region.trim().to_string());
        }
        if let Some(raw) = lookup(SHARDS_VAR) {
            config.shard_count = parse_var(SHARDS_VAR, &raw)?;
            if config.shard_count == 0 {
                return Err(HarnessError::Config(format!("{SHARDS_VAR} must be at least 1")));
            }
        }
        if let Some(raw) = lookup(POLL_MS_VAR) {
            config.poll.interval = Duration::from_millis(parse_var(POLL_MS_VAR, &raw)?);
        }
        Ok(config)
    }

    pub fn is_live(&self) -> bool {
        self.region.is_some()
    }

    /// The polling policy actually used: live targets get a deadline of
    /// [`LIVE_DEADLINE`] unless one was configured.
    pub fn effective_poll(&self) -> PollPolicy {
        match (&self.region, self.poll.deadline) {
            (Some(_), None) => self.poll.clone().with_deadline(LIVE_DEADLINE),
            _ => self.poll.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, HarnessError> {
    raw.trim()
        .parse()
        .map_err(|_| HarnessError::Config(format!("{key} has invalid value '{raw}'")))
}

/// `Duration` as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// `Option<Duration>` as integer milliseconds.
pub(crate) mod optional_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
