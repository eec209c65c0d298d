// StreamRegistry Service
// Tracks launched streams so their outcome stays observable after the HTTP response

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::models::{StreamRecord, StreamSnapshot, StreamState};

/// Errors from stream control requests
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StreamControlError {
    #[error("Stream {0} not found")]
    NotFound(String),

    #[error("Stream {0} has already finished")]
    AlreadyFinished(String),
}

struct Entry {
    record: StreamRecord,
    /// Taken on the first stop request so a stream is only ever told to stop once
    stop: Option<oneshot::Sender<()>>,
    /// Task watching the process; cleared once the stream finishes
    supervisor: Option<JoinHandle<()>>,
}

/// Shared map of stream records. Cloning shares the same registry.
#[derive(Clone)]
pub struct StreamRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    /// Finished records kept before the oldest are evicted
    retained: usize,
}

impl StreamRegistry {
    pub fn new(retained: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            retained,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| {
            log::warn!("Stream registry mutex poisoned, recovering: {e}");
            e.into_inner()
        })
    }

    /// Register a running stream together with its stop channel
    pub fn insert(&self, record: StreamRecord, stop: oneshot::Sender<()>) {
        let mut entries = self.lock();
        entries.insert(
            record.id.clone(),
            Entry {
                record,
                stop: Some(stop),
                supervisor: None,
            },
        );
        Self::evict_finished(&mut entries, self.retained);
    }

    /// Keep the supervisor task of a running stream so shutdown can wait for it
    pub fn attach_supervisor(&self, id: &str, supervisor: JoinHandle<()>) {
        if let Some(entry) = self.lock().get_mut(id) {
            if !entry.record.state.is_terminal() {
                entry.supervisor = Some(supervisor);
            }
        }
    }

    /// Take the supervisor tasks of all streams that are still running
    pub fn take_supervisors(&self) -> Vec<JoinHandle<()>> {
        self.lock()
            .values_mut()
            .filter_map(|entry| entry.supervisor.take())
            .collect()
    }

    /// Mark a stream finished. Returns false if the id is unknown.
    pub fn finish(&self, id: &str, state: StreamState, exit_code: Option<i32>) -> bool {
        let mut entries = self.lock();
        let found = match entries.get_mut(id) {
            Some(entry) => {
                entry.record.finish(state, exit_code);
                entry.stop = None;
                entry.supervisor = None;
                true
            }
            None => false,
        };
        Self::evict_finished(&mut entries, self.retained);
        found
    }

    /// Ask a running stream to stop. The supervisor performs the actual termination.
    pub fn request_stop(&self, id: &str) -> Result<StreamSnapshot, StreamControlError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StreamControlError::NotFound(id.to_string()))?;

        if entry.record.state.is_terminal() {
            return Err(StreamControlError::AlreadyFinished(id.to_string()));
        }

        if let Some(stop) = entry.stop.take() {
            // The supervisor may have exited between the state check and here
            let _ = stop.send(());
        }

        Ok(entry.record.snapshot())
    }

    pub fn get(&self, id: &str) -> Option<StreamSnapshot> {
        self.lock().get(id).map(|entry| entry.record.snapshot())
    }

    /// All records, newest first
    pub fn list(&self) -> Vec<StreamSnapshot> {
        let mut snapshots: Vec<StreamSnapshot> = self
            .lock()
            .values()
            .map(|entry| entry.record.snapshot())
            .collect();
        snapshots.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        snapshots
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.lock()
            .values()
            .filter(|entry| !entry.record.state.is_terminal())
            .map(|entry| entry.record.id.clone())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| !entry.record.state.is_terminal())
            .count()
    }

    fn evict_finished(entries: &mut HashMap<String, Entry>, retained: usize) {
        let mut finished: Vec<(String, chrono::DateTime<chrono::Utc>)> = entries
            .values()
            .filter(|entry| entry.record.state.is_terminal())
            .map(|entry| (entry.record.id.clone(), entry.record.started_at))
            .collect();

        if finished.len() <= retained {
            return;
        }

        finished.sort_by(|a, b| a.1.cmp(&b.1));
        let excess = finished.len() - retained;
        for (id, _) in finished.into_iter().take(excess) {
            entries.remove(&id);
        }
    }
}
