//! Job status stream client
//!
//! Keeps one live status channel per job and recovers from transport drops.
//!
//! # Model
//!
//! A single dispatch task owns the [`Registry`]. Public calls and everything
//! produced by spawned work (channel frames, channel failures, backoff timers,
//! status re-checks) reach it as messages and are handled one at a time.
//! Spawned work tags its messages with the job id and the connection
//! generation; the dispatcher drops any message whose job is no longer
//! registered or whose generation is stale.
//!
//! # Reconnect
//!
//! ```text
//! drop ──▶ retry_count >= MAX_RETRIES ? ──yes──▶ ConnectionLost
//!                   │ no
//!                   ▼
//!          sleep(backoff_delay(retry_count))
//!                   ▼
//!          query current status ──terminal──▶ Completed / Failed
//!                   │ active        └─absent─▶ Removed
//!                   ▼
//!          retry_count += 1, reopen
//! ```

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::registry::{Connection, JobStreamHandle, Registry, TerminalCallback, UpdateCallback};
use super::transport::{StatusChannel, StatusQuery};
use crate::models::{StatusEvent, StatusUpdate, TerminalOutcome};
use crate::sse::SseFrame;
use crate::types::{AppError, AppResult};
use crate::utils::retry::{backoff_delay, retries_remaining, MAX_RETRIES};

// =============================================================================
// Messages
// =============================================================================

enum Command {
    Subscribe {
        job_id: String,
        on_update: UpdateCallback,
        on_terminal: TerminalCallback,
    },
    Unsubscribe {
        job_id: String,
    },
    ActiveJobs {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

enum Signal {
    Frame {
        job_id: String,
        generation: u64,
        frame: SseFrame,
    },
    ChannelLost {
        job_id: String,
        generation: u64,
        reason: String,
    },
    RecheckDue {
        job_id: String,
        generation: u64,
    },
    Rechecked {
        job_id: String,
        generation: u64,
        result: AppResult<Option<StatusUpdate>>,
    },
}

// =============================================================================
// Public handle
// =============================================================================

/// Cloneable handle to the stream client. Must be created inside a tokio runtime.
///
/// [`shutdown`] tears down all subscriptions. Dropping every clone does the same,
/// but only when no registered callback holds a clone of its own; callbacks
/// that capture the client keep it alive until `shutdown` is called.
///
/// [`shutdown`]: JobStatusStreamClient::shutdown
#[derive(Clone)]
pub struct JobStatusStreamClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl JobStatusStreamClient {
    pub fn new<C, Q>(channel: C, query: Q) -> Self
    where
        C: StatusChannel + 'static,
        Q: StatusQuery + 'static,
    {
        Self::from_shared(Arc::new(channel), Arc::new(query))
    }

    /// Build from shared collaborators, e.g. one API client implementing both seams.
    pub fn from_shared(channel: Arc<dyn StatusChannel>, query: Arc<dyn StatusQuery>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (signals, signal_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            registry: Registry::new(),
            channel,
            query,
            signals,
            next_generation: 0,
        };
        tokio::spawn(dispatcher.run(command_rx, signal_rx));

        Self { commands }
    }

    /// Start monitoring `job_id`.
    ///
    /// `on_update` sees every status update, including the final one.
    /// `on_terminal` runs at most once, when the job completes or fails, the
    /// server reports an error, or reconnecting is abandoned. A server `done`
    /// without a final status ends the subscription silently.
    ///
    /// Subscribing to a job that is already monitored does nothing.
    pub fn subscribe<U, T>(&self, job_id: impl Into<String>, on_update: U, on_terminal: T) -> AppResult<()>
    where
        U: FnMut(StatusUpdate) + Send + 'static,
        T: FnOnce(TerminalOutcome) + Send + 'static,
    {
        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("job id must not be empty".to_string()));
        }

        self.commands
            .send(Command::Subscribe {
                job_id,
                on_update: Box::new(on_update),
                on_terminal: Box::new(on_terminal),
            })
            .map_err(|_| AppError::ClientClosed)
    }

    /// Stop monitoring `job_id`. Unknown ids, repeated calls, and calls made
    /// from inside that job's own callbacks are all fine.
    pub fn unsubscribe(&self, job_id: &str) {
        let _ = self.commands.send(Command::Unsubscribe {
            job_id: job_id.to_string(),
        });
    }

    /// Ids of the jobs currently monitored, sorted
    pub async fn active_jobs(&self) -> AppResult<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ActiveJobs { reply })
            .map_err(|_| AppError::ClientClosed)?;
        rx.await.map_err(|_| AppError::ClientClosed)
    }

    pub async fn is_subscribed(&self, job_id: &str) -> AppResult<bool> {
        Ok(self.active_jobs().await?.iter().any(|id| id == job_id))
    }

    /// Close every open channel and stop the client. Returns how many
    /// subscriptions were torn down.
    pub async fn shutdown(&self) -> AppResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .map_err(|_| AppError::ClientClosed)?;
        rx.await.map_err(|_| AppError::ClientClosed)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

struct Dispatcher {
    registry: Registry,
    channel: Arc<dyn StatusChannel>,
    query: Arc<dyn StatusQuery>,
    signals: mpsc::UnboundedSender<Signal>,
    next_generation: u64,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        let closed = self.registry.teardown_all();
                        debug!("All client handles dropped, closed {} subscription(s)", closed);
                        break;
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
            }
        }
    }

    /// Returns false once the client should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe { job_id, on_update, on_terminal } => {
                if self.registry.contains(&job_id) {
                    debug!("Job {} is already monitored, ignoring subscribe", job_id);
                    return true;
                }
                // Registered before the channel opens so duplicates collapse.
                self.registry
                    .register(JobStreamHandle::new(job_id.clone(), on_update, on_terminal));
                info!("Monitoring job {}", job_id);
                self.connect(&job_id);
            }
            Command::Unsubscribe { job_id } => {
                if self.registry.unregister(&job_id).is_some() {
                    info!("Stopped monitoring job {}", job_id);
                }
            }
            Command::ActiveJobs { reply } => {
                let _ = reply.send(self.registry.job_ids());
            }
            Command::Shutdown { reply } => {
                let closed = self.registry.teardown_all();
                info!("Stream client shut down, closed {} subscription(s)", closed);
                let _ = reply.send(closed);
                return false;
            }
        }
        true
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Frame { job_id, generation, frame } => {
                if self.is_current(&job_id, generation) {
                    self.on_frame(&job_id, frame);
                }
            }
            Signal::ChannelLost { job_id, generation, reason } => {
                if self.is_current(&job_id, generation) {
                    self.on_channel_lost(&job_id, &reason);
                }
            }
            Signal::RecheckDue { job_id, generation } => {
                if self.is_current(&job_id, generation) {
                    self.on_recheck_due(&job_id, generation);
                }
            }
            Signal::Rechecked { job_id, generation, result } => {
                if self.is_current(&job_id, generation) {
                    self.on_rechecked(&job_id, result);
                }
            }
        }
    }

    /// Registry membership plus generation match; everything else is stale.
    fn is_current(&self, job_id: &str, generation: u64) -> bool {
        self.registry
            .get(job_id)
            .map(|handle| handle.generation() == generation)
            .unwrap_or(false)
    }

    fn connect(&mut self, job_id: &str) {
        self.next_generation += 1;
        let generation = self.next_generation;

        let reader = tokio::spawn(read_channel(
            self.channel.clone(),
            job_id.to_string(),
            generation,
            self.signals.clone(),
        ));

        if let Some(handle) = self.registry.get_mut(job_id) {
            handle.attach(generation, Connection::new(reader.abort_handle()));
        } else {
            reader.abort();
        }
    }

    fn on_frame(&mut self, job_id: &str, frame: SseFrame) {
        let payload = match frame {
            SseFrame::Comment(comment) => {
                trace!("Keepalive on job {}: {}", job_id, comment);
                return;
            }
            SseFrame::Data(payload) => payload,
        };

        let event = match StatusEvent::parse(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed event for job {}: {} ({:?})", job_id, e, payload);
                return;
            }
        };

        match event {
            StatusEvent::Connected => debug!("Status stream connected for job {}", job_id),
            StatusEvent::Status(update) => {
                debug!(
                    "Job {} is {} (step: {:?}, progress: {:?})",
                    job_id,
                    update.processing_status,
                    update.processing_step,
                    update.progress()
                );
                if update.is_terminal() {
                    if let Some(handle) = self.registry.get_mut(job_id) {
                        handle.notify_update(update.clone());
                    }
                    self.finish(job_id, Some(TerminalOutcome::from_status(update)));
                } else if let Some(handle) = self.registry.get_mut(job_id) {
                    handle.notify_update(update);
                }
            }
            StatusEvent::Done => {
                debug!("Server closed status stream for job {}", job_id);
                self.finish(job_id, None);
            }
            StatusEvent::Error { message } => {
                warn!("Server reported error for job {}: {}", job_id, message);
                self.finish(job_id, Some(TerminalOutcome::Failed { message }));
            }
        }
    }

    fn on_channel_lost(&mut self, job_id: &str, reason: &str) {
        if let Some(handle) = self.registry.get_mut(job_id) {
            handle.close_connection();
            warn!("Status stream for job {} dropped: {}", job_id, reason);
        }
        self.schedule_recheck(job_id);
    }

    fn schedule_recheck(&mut self, job_id: &str) {
        let Some(handle) = self.registry.get_mut(job_id) else {
            return;
        };

        let retry_count = handle.retry_count();
        if !retries_remaining(retry_count) {
            error!(
                "Giving up on job {} after {} reconnect attempts",
                job_id, retry_count
            );
            self.finish(job_id, Some(TerminalOutcome::ConnectionLost { attempts: retry_count }));
            return;
        }

        let delay = backoff_delay(retry_count);
        let generation = handle.generation();
        info!(
            "Re-checking job {} in {:?} (attempt {}/{})",
            job_id,
            delay,
            retry_count + 1,
            MAX_RETRIES
        );

        let signals = self.signals.clone();
        let id = job_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(Signal::RecheckDue { job_id: id, generation });
        });
        handle.set_pending(timer.abort_handle());
    }

    fn on_recheck_due(&mut self, job_id: &str, generation: u64) {
        let Some(handle) = self.registry.get_mut(job_id) else {
            return;
        };

        let query = self.query.clone();
        let signals = self.signals.clone();
        let id = job_id.to_string();
        let task = tokio::spawn(async move {
            let result = query.current_status(&id).await;
            let _ = signals.send(Signal::Rechecked { job_id: id, generation, result });
        });
        handle.set_pending(task.abort_handle());
    }

    fn on_rechecked(&mut self, job_id: &str, result: AppResult<Option<StatusUpdate>>) {
        match result {
            Ok(Some(update)) if update.is_terminal() => {
                info!(
                    "Job {} reached {} while disconnected, not reconnecting",
                    job_id, update.processing_status
                );
                self.finish(job_id, Some(TerminalOutcome::from_status(update)));
            }
            Ok(Some(update)) => {
                if let Some(handle) = self.registry.get_mut(job_id) {
                    let attempt = handle.increment_retry();
                    info!(
                        "Job {} still {}, reconnecting (attempt {}/{})",
                        job_id, update.processing_status, attempt, MAX_RETRIES
                    );
                }
                self.connect(job_id);
            }
            Ok(None) => {
                warn!("Job {} no longer exists, dropping subscription", job_id);
                self.finish(job_id, Some(TerminalOutcome::Removed));
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("Status re-check for job {} failed: {}", job_id, e);
                } else {
                    error!("Status re-check for job {} failed: {}", job_id, e);
                }
                if let Some(handle) = self.registry.get_mut(job_id) {
                    handle.increment_retry();
                }
                self.schedule_recheck(job_id);
            }
        }
    }

    /// Remove the handle, closing its connection, then report the outcome.
    fn finish(&mut self, job_id: &str, outcome: Option<TerminalOutcome>) {
        let Some(mut handle) = self.registry.unregister(job_id) else {
            return;
        };
        if let Some(outcome) = outcome {
            info!("Job {} finished: {}", job_id, outcome);
            handle.notify_terminal(outcome);
        }
    }
}

/// Reader task for one connection attempt. Forwards frames until the stream
/// fails or ends, then reports the drop.
async fn read_channel(
    channel: Arc<dyn StatusChannel>,
    job_id: String,
    generation: u64,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let reason = match channel.open(&job_id).await {
        Ok(mut frames) => loop {
            match frames.next().await {
                Some(Ok(frame)) => {
                    let signal = Signal::Frame {
                        job_id: job_id.clone(),
                        generation,
                        frame,
                    };
                    if signals.send(signal).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            }
        },
        Err(e) => format!("failed to open stream: {}", e),
    };

    let _ = signals.send(Signal::ChannelLost {
        job_id,
        generation,
        reason,
    });
}
