// Background writer that serializes and coalesces saves

use crate::storage::Storage;
use eyre::{Result, eyre};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Storage decorator that hands writes to a single background thread
///
/// Each key has at most one pending payload: a newer write replaces an older
/// one that has not reached the backend yet, so a burst of edits lands as the
/// final state only. Writes are applied one at a time in arrival order of
/// their keys. A failed background write is reported by the next `write` or
/// `flush` call, and the next payload for that key retries it.
pub struct QueuedWriter<S: Storage + Send + 'static> {
    shared: Arc<Shared<S>>,
    worker: Option<JoinHandle<()>>,
}

struct Shared<S> {
    state: Mutex<QueueState>,
    changed: Condvar,
    backend: Mutex<S>,
}

#[derive(Default)]
struct QueueState {
    order: VecDeque<String>,
    pending: HashMap<String, String>,
    in_flight: Option<(String, String)>,
    failure: Option<eyre::Report>,
    shutdown: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.order.is_empty() && self.in_flight.is_none()
    }
}

impl<S: Storage + Send + 'static> QueuedWriter<S> {
    /// Wrap a backend and start the writer thread
    pub fn new(backend: S) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
            backend: Mutex::new(backend),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("tabtodo-writer".to_string())
            .spawn(move || run_worker(worker_shared))
            .map_err(|e| eyre!("Failed to start writer thread: {}", e))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn take_failure(state: &mut QueueState) -> Result<()> {
        match state.failure.take() {
            Some(err) => Err(err.wrap_err("Queued write failed")),
            None => Ok(()),
        }
    }
}

fn run_worker<S: Storage>(shared: Arc<Shared<S>>) {
    loop {
        let (key, value) = {
            let Ok(mut state) = shared.state.lock() else { return };
            loop {
                if let Some(key) = state.order.pop_front() {
                    if let Some(value) = state.pending.remove(&key) {
                        state.in_flight = Some((key.clone(), value.clone()));
                        break (key, value);
                    }
                    continue;
                }
                if state.shutdown {
                    return;
                }
                state = match shared.changed.wait(state) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
        };

        let result = match shared.backend.lock() {
            Ok(mut backend) => backend.write(&key, &value),
            Err(_) => Err(eyre!("Storage backend lock poisoned")),
        };

        let Ok(mut state) = shared.state.lock() else { return };
        state.in_flight = None;
        match result {
            Ok(()) => debug!(key = %key, bytes = value.len(), "QueuedWriter: write landed"),
            Err(err) => {
                warn!(key = %key, error = ?err, "QueuedWriter: background write failed");
                state.failure = Some(err);
            }
        }
        shared.changed.notify_all();
    }
}

impl<S: Storage + Send + 'static> Storage for QueuedWriter<S> {
    fn read(&self, key: &str) -> Result<Option<String>> {
        {
            let state = self.shared.state.lock().map_err(|_| eyre!("Writer queue lock poisoned"))?;
            if let Some(value) = state.pending.get(key) {
                return Ok(Some(value.clone()));
            }
            if let Some((in_flight_key, value)) = &state.in_flight {
                if in_flight_key == key {
                    return Ok(Some(value.clone()));
                }
            }
        }

        let backend = self
            .shared
            .backend
            .lock()
            .map_err(|_| eyre!("Storage backend lock poisoned"))?;
        backend.read(key)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        let mut state = self.shared.state.lock().map_err(|_| eyre!("Writer queue lock poisoned"))?;

        if state.pending.insert(key.to_string(), value.to_string()).is_none() {
            state.order.push_back(key.to_string());
        } else {
            debug!(key, "QueuedWriter: replaced pending payload");
        }
        self.shared.changed.notify_all();

        Self::take_failure(&mut state)
    }

    fn flush(&mut self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().map_err(|_| eyre!("Writer queue lock poisoned"))?;
            while !state.is_idle() {
                state = self
                    .shared
                    .changed
                    .wait(state)
                    .map_err(|_| eyre!("Writer queue lock poisoned"))?;
            }
            Self::take_failure(&mut state)?;
        }

        let mut backend = self
            .shared
            .backend
            .lock()
            .map_err(|_| eyre!("Storage backend lock poisoned"))?;
        backend.flush()
    }
}

impl<S: Storage + Send + 'static> Drop for QueuedWriter<S> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.shutdown = true;
            self.shared.changed.notify_all();
        }

        // The worker drains everything still pending before it exits
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("QueuedWriter: writer thread panicked");
            }
        }
    }
}
