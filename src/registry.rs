use std::collections::HashMap;

/// Orchestrator-side view of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerState {
    pub worker: String,
    /// Address reported on the most recent registration.
    pub address: String,
    pub idle: bool,
    /// The listener start instruction has been handed out.
    pub server_started: bool,
}

/// Every worker that has ever registered, keyed by worker id.
///
/// Entries are never removed. Access goes through the scheduler lock.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, WorkerState>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a worker on first contact. Returns `true` if it was new.
    ///
    /// New workers start idle with their listener start already marked as
    /// issued; the caller is expected to answer with the start instruction.
    pub fn admit(&mut self, worker: &str, address: &str) -> bool {
        if let Some(state) = self.workers.get_mut(worker) {
            if state.address != address {
                log::debug!(
                    "Worker {worker} address changed {} -> {address}",
                    state.address
                );
                state.address = address.to_string();
            }
            return false;
        }

        self.workers.insert(
            worker.to_string(),
            WorkerState {
                worker: worker.to_string(),
                address: address.to_string(),
                idle: true,
                server_started: true,
            },
        );
        true
    }

    pub fn get(&self, worker: &str) -> Option<&WorkerState> {
        self.workers.get(worker)
    }

    pub fn contains(&self, worker: &str) -> bool {
        self.workers.contains_key(worker)
    }

    pub fn set_idle(&mut self, worker: &str, idle: bool) {
        if let Some(state) = self.workers.get_mut(worker) {
            state.idle = idle;
        }
    }

    /// First worker currently running a job, if any.
    pub fn busy_worker(&self) -> Option<&WorkerState> {
        self.workers.values().find(|state| !state.idle)
    }

    pub fn all_idle(&self) -> bool {
        self.busy_worker().is_none()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerState> {
        self.workers.values()
    }
}
