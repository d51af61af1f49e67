//! # Shared Emulator
//!
//! A process-wide emulator for test suites where many harnesses share one
//! backend, the way a suite would share one local service process.
//!
//! The emulator is started by the first [`SharedEmulator::acquire`] and
//! stopped when the last [`EmulatorLease`] is released (or dropped). It runs
//! on a dedicated thread with its own single-threaded runtime, because every
//! `#[tokio::test]` builds and tears down its own runtime and a task spawned
//! on one of those would die with the test that happened to start it.

use crate::client::EmulatorClient;
use crate::emulator::{EmulatorConfig, StreamEmulator};
use crate::error::BackendError;
use once_cell::sync::Lazy;
use std::io;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct SharedState {
    client: EmulatorClient,
    leases: usize,
    stopped: oneshot::Receiver<()>,
}

static SHARED: Lazy<Mutex<Option<SharedState>>> = Lazy::new(|| Mutex::new(None));

fn shared() -> MutexGuard<'static, Option<SharedState>> {
    SHARED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Entry point to the process-wide emulator.
pub struct SharedEmulator;

impl SharedEmulator {
    /// Take a lease on the shared emulator, starting it if nobody holds one.
    ///
    /// `config` only matters for the acquisition that starts the emulator;
    /// later callers share whatever is already running.
    pub fn acquire(config: &EmulatorConfig) -> io::Result<EmulatorLease> {
        let mut guard = shared();
        if let Some(state) = guard.as_mut() {
            state.leases += 1;
            debug!(leases = state.leases, "Shared emulator lease acquired");
            return Ok(EmulatorLease::new(state.client.clone()));
        }

        let (emulator, client) = StreamEmulator::new(config.clone());
        let (stopped_tx, stopped) = oneshot::channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        std::thread::Builder::new()
            .name("stream-emulator".to_string())
            .spawn(move || {
                runtime.block_on(emulator.run());
                let _ = stopped_tx.send(());
            })?;

        info!("Shared emulator started");
        *guard = Some(SharedState {
            client: client.clone(),
            leases: 1,
            stopped,
        });
        Ok(EmulatorLease::new(client))
    }

    /// Number of outstanding leases; zero when the emulator is not running.
    pub fn leases() -> usize {
        shared().as_ref().map(|s| s.leases).unwrap_or(0)
    }
}

/// Remove one lease; hands back the state when it was the last one.
fn detach() -> Option<SharedState> {
    let mut guard = shared();
    let state = guard.as_mut()?;
    state.leases = state.leases.saturating_sub(1);
    debug!(leases = state.leases, "Shared emulator lease released");
    if state.leases == 0 {
        guard.take()
    } else {
        None
    }
}

/// A reference-counted claim on the shared emulator.
#[derive(Debug)]
pub struct EmulatorLease {
    client: EmulatorClient,
    released: bool,
}

impl EmulatorLease {
    fn new(client: EmulatorClient) -> Self {
        Self {
            client,
            released: false,
        }
    }

    /// Client for the shared emulator.
    pub fn client(&self) -> &EmulatorClient {
        &self.client
    }

    /// Give the lease back. When it was the last one the emulator is shut
    /// down and this waits until its thread has finished; returns `true` in
    /// that case.
    pub async fn release(mut self) -> Result<bool, BackendError> {
        self.released = true;
        let Some(state) = detach() else {
            return Ok(false);
        };
        state.client.shutdown().await?;
        let _ = state.stopped.await;
        info!("Shared emulator stopped");
        Ok(true)
    }
}

impl Drop for EmulatorLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(state) = detach() {
            if !state.client.try_shutdown() {
                warn!("Shared emulator did not accept shutdown request");
            }
        }
    }
}
