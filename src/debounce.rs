use crate::error::{Dcm1Error, Result};
use crate::protocol::Command;
use crate::queue::CommandQueue;
use crate::types::{EqParameter, Priority, ZoneId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

type Key = (ZoneId, EqParameter);

struct PendingEq {
    generation: u64,
    value: i8,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    next_generation: u64,
    pending: HashMap<Key, PendingEq>,
}

/// Coalesces bursts of EQ changes per (zone, band)
///
/// Each new value replaces the pending one and restarts that key's quiet
/// timer. Only the value standing when the timer fires is enqueued.
pub(crate) struct EqDebouncer {
    queue: Arc<CommandQueue>,
    quiet: Duration,
    inner: Arc<Mutex<Inner>>,
    /// Runtime current at construction, used when submit is called off-runtime
    runtime: Option<Handle>,
}

impl EqDebouncer {
    pub fn new(queue: Arc<CommandQueue>, quiet: Duration) -> Self {
        Self {
            queue,
            quiet,
            inner: Arc::new(Mutex::new(Inner::default())),
            runtime: Handle::try_current().ok(),
        }
    }

    fn runtime(&self) -> Result<Handle> {
        Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
            .ok_or(Dcm1Error::NoRuntime)
    }

    pub fn submit(&self, zone: ZoneId, parameter: EqParameter, value: i8) -> Result<()> {
        let runtime = self.runtime()?;
        let key = (zone, parameter);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let timer = runtime.spawn(fire_after(
            self.inner.clone(),
            self.queue.clone(),
            self.quiet,
            key,
            generation,
        ));

        if let Some(previous) = inner.pending.insert(
            key,
            PendingEq {
                generation,
                value,
                timer,
            },
        ) {
            tracing::trace!(
                "Zone {} {} {:+} superseded by {:+}",
                zone,
                parameter,
                previous.value,
                value
            );
            previous.timer.abort();
        }
        Ok(())
    }

    /// Value waiting for its quiet timer, if any
    pub fn pending_value(&self, zone: ZoneId, parameter: EqParameter) -> Option<i8> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .get(&(zone, parameter))
            .map(|p| p.value)
    }

    /// Drop all unsent values
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for (_, pending) in inner.pending.drain() {
            pending.timer.abort();
        }
    }
}

async fn fire_after(
    inner: Arc<Mutex<Inner>>,
    queue: Arc<CommandQueue>,
    quiet: Duration,
    key: Key,
    generation: u64,
) {
    tokio::time::sleep(quiet).await;

    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    // A newer value may have replaced us after the sleep finished
    let current = inner.pending.get(&key).map(|p| p.generation);
    if current != Some(generation) {
        return;
    }
    if let Some(settled) = inner.pending.remove(&key) {
        let (zone, parameter) = key;
        let command = Command::SetEq(zone, parameter, settled.value);
        tracing::debug!("Zone {} {} settled at {:+}", zone, parameter, settled.value);
        queue.push(Priority::User, [command, Command::QueryEq(zone)]);
    }
}
