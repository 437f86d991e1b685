//! In-process job queues with bounded retry and exponential backoff.
//!
//! Each queue hands jobs out at least once: a job that fails is delayed and
//! handed out again until its attempts are exhausted, after which it is
//! terminally failed. Terminal jobs are pruned oldest-first past the
//! configured retention.

mod worker;

pub use worker::{JobDispatcher, JobHandler, JobRecord, Progress, RecordStatus, Worker};

use crate::{
    artifacts::ArtifactKind, compiler::CompileRequest, config::JobsConfig, deploy::SubmitRequest,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    sync::Notify,
    time::{Duration, Instant},
};

/// The three logical queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Compile,
    Analyze,
    Deploy,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Compile, QueueName::Analyze, QueueName::Deploy];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Compile => "compile",
            QueueName::Analyze => "analyze",
            QueueName::Deploy => "deploy",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work carried by a job, one variant per job subtype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobPayload {
    Compile {
        chain: ArtifactKind,
        request: CompileRequest,
    },
    Analyze {
        source: String,
    },
    Deploy {
        request: SubmitRequest,
    },
}

impl JobPayload {
    /// Queue this payload belongs on
    pub fn queue(&self) -> QueueName {
        match self {
            JobPayload::Compile { .. } => QueueName::Compile,
            JobPayload::Analyze { .. } => QueueName::Analyze,
            JobPayload::Deploy { .. } => QueueName::Deploy,
        }
    }
}

/// A job as handed to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub queue: QueueName,
    pub payload: JobPayload,
    /// Attempts started so far, including the current one
    pub attempts_made: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Unknown,
}

/// Externally visible job status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    fn unknown() -> Self {
        Self {
            status: JobState::Unknown,
            progress: None,
            result: None,
            error: None,
        }
    }
}

/// Number of jobs per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Retry and retention policy shared by every job on a queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl JobPolicy {
    /// Delay before re-running a job whose `attempts_made`-th attempt failed
    pub fn backoff_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1 << exponent)
    }
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for JobPolicy {
    fn from(config: &JobsConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff: Duration::from_secs(config.backoff_secs),
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
        }
    }
}

#[derive(Debug)]
struct Entry {
    job: Job,
    state: JobState,
    progress: u8,
    result: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, Entry>,
    waiting: VecDeque<String>,
    delayed: Vec<(Instant, String)>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
    active: usize,
    closed: bool,
}

impl State {
    /// Moves delayed jobs whose backoff has elapsed back to waiting
    fn promote_due(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = pending;
        for (_, id) in due {
            if let Some(entry) = self.jobs.get_mut(&id) {
                entry.state = JobState::Waiting;
            }
            self.waiting.push_back(id);
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.delayed.is_empty() && self.active == 0
    }

    fn prune(list: &mut VecDeque<String>, jobs: &mut HashMap<String, Entry>, keep: usize) {
        while list.len() > keep {
            if let Some(id) = list.pop_front() {
                jobs.remove(&id);
            }
        }
    }
}

struct Inner {
    name: QueueName,
    policy: JobPolicy,
    state: Mutex<State>,
    /// Signalled when a job becomes available or the queue closes
    available: Notify,
    /// Signalled whenever a job settles
    settled: Notify,
    next_id: AtomicU64,
}

/// One named queue; clones share the same jobs
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(name: QueueName, policy: JobPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                policy,
                state: Mutex::new(State::default()),
                available: Notify::new(),
                settled: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> QueueName {
        self.inner.name
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.inner.policy
    }

    /// Enqueues a payload and returns the new job id
    pub fn add(&self, payload: JobPayload) -> String {
        let id = format!(
            "{}-{}",
            self.inner.name,
            self.inner.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let job = Job {
            id: id.clone(),
            queue: self.inner.name,
            payload,
            attempts_made: 0,
        };

        {
            let mut state = self.inner.state.lock();
            state.jobs.insert(
                id.clone(),
                Entry {
                    job,
                    state: JobState::Waiting,
                    progress: 0,
                    result: None,
                    error: None,
                },
            );
            state.waiting.push_back(id.clone());
        }
        self.inner.available.notify_one();

        tracing::debug!("Queued job {}", id);
        id
    }

    /// Waits for the next runnable job; `None` once the queue is closed
    pub async fn next(&self) -> Option<Job> {
        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return None;
                }
                state.promote_due(Instant::now());

                while let Some(id) = state.waiting.pop_front() {
                    // Ids of pruned jobs may linger; skip them
                    let Some(entry) = state.jobs.get_mut(&id) else {
                        continue;
                    };
                    entry.state = JobState::Active;
                    entry.job.attempts_made += 1;
                    let job = entry.job.clone();
                    state.active += 1;
                    return Some(job);
                }
                state.next_due()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks an active job completed with its result
    pub fn complete(&self, id: &str, result: Value) {
        {
            let mut state = self.inner.state.lock();
            let State {
                jobs,
                completed,
                active,
                ..
            } = &mut *state;
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };
            if entry.state != JobState::Active {
                return;
            }
            entry.state = JobState::Completed;
            entry.progress = 100;
            entry.result = Some(result);
            entry.error = None;
            *active -= 1;
            completed.push_back(id.to_string());
            State::prune(completed, jobs, self.inner.policy.keep_completed);
        }
        tracing::info!("Job {} completed", id);
        self.inner.settled.notify_waiters();
    }

    /// Records a failed attempt; returns `true` when the job will be retried
    pub fn fail(&self, id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        let retry = {
            let mut state = self.inner.state.lock();
            let State {
                jobs,
                failed,
                delayed,
                active,
                ..
            } = &mut *state;
            let Some(entry) = jobs.get_mut(id) else {
                return false;
            };
            if entry.state != JobState::Active {
                return false;
            }
            *active -= 1;
            entry.error = Some(error.clone());

            let attempts_made = entry.job.attempts_made;
            if attempts_made < self.inner.policy.attempts {
                let delay = self.inner.policy.backoff_for(attempts_made);
                entry.state = JobState::Delayed;
                delayed.push((Instant::now() + delay, id.to_string()));
                tracing::warn!(
                    "Job {} failed (attempt {}/{}), retrying in {:?}: {}",
                    id,
                    attempts_made,
                    self.inner.policy.attempts,
                    delay,
                    error
                );
                true
            } else {
                entry.state = JobState::Failed;
                failed.push_back(id.to_string());
                State::prune(failed, jobs, self.inner.policy.keep_failed);
                tracing::error!("Job {} failed after {} attempt(s): {}", id, attempts_made, error);
                false
            }
        };

        if retry {
            self.inner.available.notify_one();
        }
        self.inner.settled.notify_waiters();
        retry
    }

    /// Records progress (clamped to 100) for an active job
    pub fn set_progress(&self, id: &str, progress: u8) {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.jobs.get_mut(id) {
            if entry.state == JobState::Active {
                entry.progress = progress.min(100);
            }
        }
    }

    pub fn status(&self, id: &str) -> JobStatus {
        let state = self.inner.state.lock();
        let Some(entry) = state.jobs.get(id) else {
            return JobStatus::unknown();
        };
        JobStatus {
            status: entry.state,
            progress: Some(entry.progress),
            result: entry.result.clone(),
            error: entry.error.clone(),
        }
    }

    pub fn counts(&self) -> JobCounts {
        let state = self.inner.state.lock();
        JobCounts {
            waiting: state.waiting.len(),
            active: state.active,
            delayed: state.delayed.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        }
    }

    /// Waits until no job is waiting, delayed or active
    pub async fn drain(&self) {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.inner.state.lock().is_idle() {
                return;
            }
            settled.await;
        }
    }

    /// Stops handing out jobs; workers see `None` from [`JobQueue::next`]
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.available.notify_waiters();
        self.inner.settled.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

/// The compile, analyze and deploy queues under one policy
#[derive(Clone)]
pub struct Queues {
    pub compile: JobQueue,
    pub analyze: JobQueue,
    pub deploy: JobQueue,
}

impl Queues {
    pub fn new(policy: JobPolicy) -> Self {
        Self {
            compile: JobQueue::new(QueueName::Compile, policy),
            analyze: JobQueue::new(QueueName::Analyze, policy),
            deploy: JobQueue::new(QueueName::Deploy, policy),
        }
    }

    pub fn get(&self, name: QueueName) -> &JobQueue {
        match name {
            QueueName::Compile => &self.compile,
            QueueName::Analyze => &self.analyze,
            QueueName::Deploy => &self.deploy,
        }
    }

    /// Routes a payload to its queue; returns the job id
    pub fn enqueue(&self, payload: JobPayload) -> String {
        self.get(payload.queue()).add(payload)
    }

    /// Looks a job up by id across all queues
    pub fn status(&self, id: &str) -> JobStatus {
        QueueName::ALL
            .iter()
            .map(|name| self.get(*name).status(id))
            .find(|status| status.status != JobState::Unknown)
            .unwrap_or_else(JobStatus::unknown)
    }

    pub async fn drain(&self) {
        for name in QueueName::ALL {
            self.get(name).drain().await;
        }
    }

    pub fn close(&self) {
        for name in QueueName::ALL {
            self.get(name).close();
        }
    }
}
