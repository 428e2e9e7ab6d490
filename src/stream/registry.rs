//! Active-handle registry
//!
//! Maps each monitored job to the one handle that owns its connection. The
//! registry is owned by the stream client's dispatch task; it is a plain
//! struct so it can be exercised without a transport.

use std::collections::HashMap;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::models::{StatusUpdate, TerminalOutcome};

pub type UpdateCallback = Box<dyn FnMut(StatusUpdate) + Send>;
pub type TerminalCallback = Box<dyn FnOnce(TerminalOutcome) + Send>;

/// An open push channel. The reader task holds the HTTP body stream, so
/// aborting the task closes the channel.
#[derive(Debug)]
pub struct Connection {
    reader: AbortHandle,
}

impl Connection {
    pub fn new(reader: AbortHandle) -> Self {
        Self { reader }
    }

    pub fn close(self) {
        self.reader.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// One active subscription
pub struct JobStreamHandle {
    job_id: String,
    connection: Option<Connection>,
    /// Backoff timer or in-flight status re-check
    pending: Option<AbortHandle>,
    retry_count: u32,
    generation: u64,
    on_update: UpdateCallback,
    on_terminal: Option<TerminalCallback>,
}

impl JobStreamHandle {
    pub fn new(job_id: impl Into<String>, on_update: UpdateCallback, on_terminal: TerminalCallback) -> Self {
        Self {
            job_id: job_id.into(),
            connection: None,
            pending: None,
            retry_count: 0,
            generation: 0,
            on_update,
            on_terminal: Some(on_terminal),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Identifies the current connection attempt
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Install a freshly opened connection for `generation`.
    pub fn attach(&mut self, generation: u64, connection: Connection) {
        self.close();
        self.generation = generation;
        self.connection = Some(connection);
    }

    pub fn set_pending(&mut self, task: AbortHandle) {
        if let Some(previous) = self.pending.replace(task) {
            previous.abort();
        }
    }

    pub fn increment_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    /// Close the connection only, keeping any scheduled re-check.
    pub fn close_connection(&mut self) -> bool {
        match self.connection.take() {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Close the connection and cancel pending work. Safe to call repeatedly.
    pub fn close(&mut self) -> bool {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.close_connection()
    }

    pub fn notify_update(&mut self, update: StatusUpdate) {
        (self.on_update)(update);
    }

    /// Deliver the terminal outcome. Returns false if it was already delivered.
    pub fn notify_terminal(&mut self, outcome: TerminalOutcome) -> bool {
        match self.on_terminal.take() {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }
}

impl Drop for JobStreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for JobStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStreamHandle")
            .field("job_id", &self.job_id)
            .field("connected", &self.connection.is_some())
            .field("retry_count", &self.retry_count)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    handles: HashMap<String, JobStreamHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle. Returns false, leaving the existing handle in place,
    /// if the job is already registered.
    pub fn register(&mut self, handle: JobStreamHandle) -> bool {
        if self.handles.contains_key(handle.job_id()) {
            return false;
        }
        self.handles.insert(handle.job_id().to_string(), handle);
        true
    }

    /// Remove a handle and close its connection. Unknown ids are a no-op.
    pub fn unregister(&mut self, job_id: &str) -> Option<JobStreamHandle> {
        let mut handle = self.handles.remove(job_id)?;
        handle.close();
        debug!("Unregistered status stream for job {}", job_id);
        Some(handle)
    }

    pub fn get(&self, job_id: &str) -> Option<&JobStreamHandle> {
        self.handles.get(job_id)
    }

    pub fn get_mut(&mut self, job_id: &str) -> Option<&mut JobStreamHandle> {
        self.handles.get_mut(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.handles.contains_key(job_id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close every connection and clear the registry. Returns how many
    /// handles were removed. Terminal callbacks are not invoked.
    pub fn teardown_all(&mut self) -> usize {
        let count = self.handles.len();
        for (_, mut handle) in self.handles.drain() {
            handle.close();
        }
        count
    }
}
