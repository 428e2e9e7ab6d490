//! Scripted collaborators for stream client tests.
//!
//! `ScriptedChannel` plays back one script per connection attempt and records
//! when each connection was opened and how many were closed. `ScriptedQuery`
//! answers status re-checks from a queue.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tokio::time::Instant;

use docstream::models::{ProcessingStatus, StatusUpdate, TerminalOutcome};
use docstream::sse::SseFrame;
use docstream::stream::{FrameStream, StatusChannel, StatusQuery};
use docstream::{AppError, AppResult, JobStatusStreamClient};

/// One step of a scripted connection
#[derive(Debug, Clone)]
pub enum Step {
    Data(String),
    Comment(String),
    /// Transport error; the connection drops right after
    Error(String),
    /// Stay open with no further frames
    Hang,
}

pub fn data(json: &str) -> Step {
    Step::Data(json.to_string())
}

/// Stream wrapper that counts how many connections were dropped
struct Tracked {
    inner: FrameStream,
    closed: Arc<AtomicUsize>,
}

impl Stream for Tracked {
    type Item = AppResult<SseFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Channel playing back scripts per job. Once a job's scripts run out every
/// further connection drops immediately.
#[derive(Default)]
pub struct ScriptedChannel {
    scripts: Mutex<HashMap<String, VecDeque<Vec<Step>>>>,
    opens: Mutex<Vec<(String, Instant)>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, job_id: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push_back(steps);
    }

    pub fn open_count(&self, job_id: &str) -> usize {
        self.opens.lock().unwrap().iter().filter(|(id, _)| id == job_id).count()
    }

    /// Gaps between consecutive opens of `job_id`
    pub fn reconnect_delays(&self, job_id: &str) -> Vec<Duration> {
        let opens: Vec<Instant> = self
            .opens
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, at)| *at)
            .collect();
        opens.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusChannel for ScriptedChannel {
    async fn open(&self, job_id: &str) -> AppResult<FrameStream> {
        self.opens.lock().unwrap().push((job_id.to_string(), Instant::now()));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(job_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();

        let hang = matches!(script.last(), Some(Step::Hang));
        let items: Vec<AppResult<SseFrame>> = script
            .into_iter()
            .filter_map(|step| match step {
                Step::Data(payload) => Some(Ok(SseFrame::Data(payload))),
                Step::Comment(text) => Some(Ok(SseFrame::Comment(text))),
                Step::Error(reason) => Some(Err(AppError::Transport(reason))),
                Step::Hang => None,
            })
            .collect();

        let frames = stream::iter(items);
        let inner = if hang {
            frames.chain(stream::pending()).boxed()
        } else {
            frames.boxed()
        };

        Ok(Tracked {
            inner,
            closed: self.closed.clone(),
        }
        .boxed())
    }
}

/// Reply to one status re-check
#[derive(Debug, Clone)]
pub enum Reply {
    Status(ProcessingStatus),
    Missing,
    Fail,
}

/// Status lookup answering from a queue, `processing` once it is empty
#[derive(Default)]
pub struct ScriptedQuery {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl ScriptedQuery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusQuery for ScriptedQuery {
    async fn current_status(&self, job_id: &str) -> AppResult<Option<StatusUpdate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Status(ProcessingStatus::Processing));

        match reply {
            Reply::Status(status) => {
                let mut update = StatusUpdate::new(status);
                update.document_id = Some(job_id.to_string());
                Ok(Some(update))
            }
            Reply::Missing => Ok(None),
            Reply::Fail => Err(AppError::Api {
                status: 503,
                message: "Service unavailable".to_string(),
            }),
        }
    }
}

/// Records what a subscriber was told
#[derive(Clone, Default)]
pub struct Recorder {
    updates: Arc<Mutex<Vec<StatusUpdate>>>,
    terminals: Arc<Mutex<Vec<TerminalOutcome>>>,
}

impl Recorder {
    pub fn subscribe(&self, client: &JobStatusStreamClient, job_id: &str) -> AppResult<()> {
        let updates = self.updates.clone();
        let terminals = self.terminals.clone();
        client.subscribe(
            job_id,
            move |update| updates.lock().unwrap().push(update),
            move |outcome| terminals.lock().unwrap().push(outcome),
        )
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn terminals(&self) -> Vec<TerminalOutcome> {
        self.terminals.lock().unwrap().clone()
    }
}

pub fn client_for(channel: &Arc<ScriptedChannel>, query: &Arc<ScriptedQuery>) -> JobStatusStreamClient {
    JobStatusStreamClient::from_shared(channel.clone(), query.clone())
}

/// Let every timer and task run. Longer than the whole backoff schedule.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(120)).await;
}
