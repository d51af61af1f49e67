//! # Shard Handle Registry
//!
//! Tracks every open [`ShardReader`](crate::reader::ShardReader) of the
//! current stream so that all of them can be closed, and their closure
//! awaited, before the stream is deleted.
//!
//! The registry works in generations. Each time the stream becomes active
//! the lifecycle controller calls [`reset`](ShardRegistry::reset), which
//! starts a fresh generation; shard factories remember the generation they
//! were created in and can no longer register readers once it has passed.
//!
//! Readers hold only a [`WeakRegistry`] and remove themselves when their task
//! ends, whether they were closed or the shard ran out.

use crate::reader::ReaderStatus;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opaque identifier of a registered reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry is closing generation {generation}; no new readers")]
    Closed { generation: u64 },
    #[error("Shard handle from generation {generation} is stale (current generation {current})")]
    Stale { generation: u64, current: u64 },
    #[error("Reader {id} on {shard_id} stopped without reporting its closure")]
    CloseFailed { id: HandleId, shard_id: String },
    #[error("Waiting for a reader to close failed: {0}")]
    WaiterFailed(String),
}

struct Member {
    shard_id: String,
    cancel: CancellationToken,
    status: watch::Receiver<ReaderStatus>,
}

struct Inner {
    generation: u64,
    closing: bool,
    next_id: u64,
    members: HashMap<HandleId, Member>,
}

/// The open-handle set of one harness.
#[derive(Clone)]
pub struct ShardRegistry {
    inner: Arc<Mutex<Inner>>,
}

/// Back-reference held by reader tasks.
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<Mutex<Inner>>,
}

impl WeakRegistry {
    /// Remove `id`; a no-op when the registry itself is gone.
    pub fn deregister(&self, id: HandleId) {
        if let Some(inner) = self.inner.upgrade() {
            ShardRegistry { inner }.deregister(id);
        }
    }
}

impl Default for ShardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                closing: false,
                next_id: 1,
                members: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of readers currently open.
    pub fn len(&self) -> usize {
        self.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a reader. `cancel` asks it to stop; `status` reports when it has.
    pub fn register(
        &self,
        generation: u64,
        shard_id: &str,
        cancel: CancellationToken,
        status: watch::Receiver<ReaderStatus>,
    ) -> Result<HandleId, RegistryError> {
        let mut inner = self.lock();
        if generation != inner.generation {
            return Err(RegistryError::Stale {
                generation,
                current: inner.generation,
            });
        }
        if inner.closing {
            return Err(RegistryError::Closed { generation });
        }

        let id = HandleId(inner.next_id);
        inner.next_id += 1;
        inner.members.insert(
            id,
            Member {
                shard_id: shard_id.to_string(),
                cancel,
                status,
            },
        );
        debug!(%id, shard = %shard_id, generation, open = inner.members.len(), "Reader registered");
        Ok(id)
    }

    pub fn deregister(&self, id: HandleId) {
        let mut inner = self.lock();
        if let Some(member) = inner.members.remove(&id) {
            debug!(%id, shard = %member.shard_id, open = inner.members.len(), "Reader deregistered");
        }
    }

    /// Close every open reader and wait until each has reported it is closed.
    ///
    /// The current generation stops accepting readers first, so nothing can
    /// slip in while the set drains. Waiting is fail-fast: the first reader
    /// that cannot confirm its closure aborts the wait and is returned.
    ///
    /// A reader whose task ended without reporting a status is removed when
    /// the wait fails, and registration reopens, so a later `close_all` can
    /// finish with the readers that are left.
    pub async fn close_all(&self) -> Result<usize, RegistryError> {
        let pending: Vec<(HandleId, String, CancellationToken, watch::Receiver<ReaderStatus>)> = {
            let mut inner = self.lock();
            inner.closing = true;
            inner
                .members
                .iter()
                .map(|(id, m)| (*id, m.shard_id.clone(), m.cancel.clone(), m.status.clone()))
                .collect()
        };

        if pending.is_empty() {
            debug!("No open readers to close");
            return Ok(0);
        }
        info!(count = pending.len(), "Closing open readers");

        let mut waiters = JoinSet::new();
        let mut handles: HashMap<task::Id, (HandleId, String)> = HashMap::new();
        for (id, shard_id, cancel, mut status) in pending {
            cancel.cancel();
            let waiting_on = shard_id.clone();
            let abort = waiters.spawn(async move {
                match status.wait_for(ReaderStatus::is_terminal).await {
                    Ok(_) => Ok(id),
                    Err(_) => Err(RegistryError::CloseFailed {
                        id,
                        shard_id: waiting_on,
                    }),
                }
            });
            handles.insert(abort.id(), (id, shard_id));
        }

        let mut closed = 0;
        while let Some(joined) = waiters.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Close waiter failed");
                    match handles.remove(&e.id()) {
                        Some((id, shard_id)) => Err(RegistryError::CloseFailed { id, shard_id }),
                        None => Err(RegistryError::WaiterFailed(e.to_string())),
                    }
                }
            };
            match outcome {
                Ok(id) => {
                    // Normally already gone: readers deregister before they report.
                    self.deregister(id);
                    closed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Reader did not close");
                    waiters.abort_all();
                    self.prune_lost();
                    return Err(e);
                }
            }
        }

        info!(closed, "All readers closed");
        Ok(closed)
    }

    /// Drop members whose task is gone without a status, and accept readers
    /// again.
    fn prune_lost(&self) {
        let mut inner = self.lock();
        inner.members.retain(|id, member| {
            let alive = member.status.has_changed().is_ok() || member.status.borrow().is_terminal();
            if !alive {
                warn!(%id, shard = %member.shard_id, "Removing reader that stopped without a status");
            }
            alive
        });
        inner.closing = false;
    }

    /// Start a new generation with an empty set. Returns the new generation.
    pub fn reset(&self) -> u64 {
        let mut inner = self.lock();
        for (id, member) in inner.members.drain() {
            warn!(%id, shard = %member.shard_id, "Dropping reader left over from previous generation");
            member.cancel.cancel();
        }
        inner.generation += 1;
        inner.closing = false;
        debug!(generation = inner.generation, "Registry reset");
        inner.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (CancellationToken, watch::Sender<ReaderStatus>, watch::Receiver<ReaderStatus>) {
        let (tx, rx) = watch::channel(ReaderStatus::Open);
        (CancellationToken::new(), tx, rx)
    }

    #[test]
    fn stale_generations_are_rejected() {
        let registry = ShardRegistry::new();
        let old = registry.reset();
        let current = registry.reset();
        let (cancel, _tx, rx) = handle();

        let err = registry.register(old, "shardId-000000000000", cancel, rx).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Stale {
                generation: old,
                current
            }
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all_waits_for_every_reader() {
        let registry = ShardRegistry::new();
        let generation = registry.reset();

        for shard in ["a", "b", "c"] {
            let (cancel, tx, rx) = handle();
            let id = registry.register(generation, shard, cancel.clone(), rx).unwrap();
            let weak = registry.downgrade();
            tokio::spawn(async move {
                cancel.cancelled().await;
                weak.deregister(id);
                tx.send_replace(ReaderStatus::Closed);
            });
        }
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.close_all().await.unwrap(), 3);
        assert!(registry.is_empty());

        // Closing generation accepts nothing new.
        let (cancel, _tx, rx) = handle();
        assert_eq!(
            registry.register(generation, "d", cancel, rx).unwrap_err(),
            RegistryError::Closed { generation }
        );
    }

    #[tokio::test]
    async fn close_all_fails_when_a_reader_vanishes() {
        let registry = ShardRegistry::new();
        let generation = registry.reset();
        let (cancel, tx, rx) = handle();
        registry.register(generation, "a", cancel, rx).unwrap();
        drop(tx);

        let err = registry.close_all().await.unwrap_err();
        assert!(matches!(err, RegistryError::CloseFailed { ref shard_id, .. } if shard_id == "a"));

        // The lost reader is gone and the generation takes readers again.
        assert!(registry.is_empty());
        let (cancel, tx, rx) = handle();
        let id = registry.register(generation, "b", cancel.clone(), rx).unwrap();
        let weak = registry.downgrade();
        tokio::spawn(async move {
            cancel.cancelled().await;
            weak.deregister(id);
            tx.send_replace(ReaderStatus::Closed);
        });
        assert_eq!(registry.close_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn close_failure_names_the_lost_reader() {
        let registry = ShardRegistry::new();
        let generation = registry.reset();
        let (cancel, tx, rx) = handle();
        let lost = registry.register(generation, "a", cancel, rx).unwrap();
        drop(tx);

        match registry.close_all().await.unwrap_err() {
            RegistryError::CloseFailed { id, shard_id } => {
                assert_eq!(id, lost);
                assert_eq!(shard_id, "a");
            }
            other => panic!("expected close failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reset_reopens_registration() {
        let registry = ShardRegistry::new();
        let generation = registry.reset();
        registry.close_all().await.unwrap();

        let next = registry.reset();
        assert!(next > generation);
        let (cancel, _tx, rx) = handle();
        assert!(registry.register(next, "a", cancel, rx).is_ok());
    }
}
