//! Bounded FIFO admission control with a single active slot.
//!
//! Every mutation runs inside one [`std::sync::Mutex`] critical section
//! and publishes its [`QueueEvent`]s before releasing the lock, so
//! subscribers observe events in mutation order. Nothing here awaits;
//! admission never touches the network.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gazer_core::job::{Job, JobStatus};
use gazer_core::types::JobId;
use serde::Serialize;
use tokio::sync::broadcast;

/// Broadcast channel capacity for queue events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something that happened to the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job was admitted at `position` (1-based; the active job is 1).
    ItemAdded { job_id: JobId, position: usize },
    /// A queued job was cancelled.
    ItemRemoved { job_id: JobId },
    /// Positions of every still-queued job after a shift.
    PositionsUpdated(Vec<(JobId, usize)>),
    /// A job moved into the active slot.
    ProcessStart(Job),
}

/// Result of a successful [`QueueManager::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub position: usize,
    /// `false` when the job went straight into the active slot.
    pub was_queued: bool,
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub capacity: usize,
    pub active: Option<Job>,
    pub queued: Vec<Job>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full ({queue_length}/{capacity})")]
    AdmissionRejected { queue_length: usize, capacity: usize },
}

struct QueueInner {
    queue: VecDeque<Job>,
    active: Option<Job>,
}

impl QueueInner {
    fn occupied(&self) -> usize {
        self.queue.len() + usize::from(self.active.is_some())
    }

    fn offset(&self) -> usize {
        usize::from(self.active.is_some())
    }

    fn positions(&self) -> Vec<(JobId, usize)> {
        let offset = self.offset();
        self.queue
            .iter()
            .enumerate()
            .map(|(i, job)| (job.id.clone(), i + 1 + offset))
            .collect()
    }
}

/// Single-accelerator job queue.
///
/// Shared via `Arc`; all methods take `&self`.
pub struct QueueManager {
    capacity: usize,
    inner: Mutex<QueueInner>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl QueueManager {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                active: None,
            }),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a job or reject it when active + queued has reached capacity.
    ///
    /// An admitted job is dispatched immediately if nothing is active.
    pub fn add(&self, mut job: Job) -> Result<Admission, QueueError> {
        let mut inner = self.lock();

        let occupied = inner.occupied();
        if occupied >= self.capacity {
            tracing::warn!(
                job_id = %job.id,
                queue_length = occupied,
                capacity = self.capacity,
                "Admission rejected: queue full",
            );
            return Err(QueueError::AdmissionRejected {
                queue_length: occupied,
                capacity: self.capacity,
            });
        }

        job.status = JobStatus::Queued;
        let job_id = job.id.clone();
        inner.queue.push_back(job);
        let position = inner.queue.len() + inner.offset();

        tracing::info!(job_id = %job_id, position, "Job admitted");
        self.emit(QueueEvent::ItemAdded {
            job_id: job_id.clone(),
            position,
        });

        self.dispatch(&mut inner);

        let started = inner.active.as_ref().is_some_and(|a| a.id == job_id);
        Ok(Admission {
            position: if started { 1 } else { position },
            was_queued: !started,
        })
    }

    /// Cancel a queued job. The active job cannot be removed.
    pub fn remove(&self, job_id: &str) -> bool {
        let mut inner = self.lock();

        let Some(index) = inner.queue.iter().position(|j| j.id == job_id) else {
            return false;
        };
        inner.queue.remove(index);

        tracing::info!(job_id, "Queued job removed");
        self.emit(QueueEvent::ItemRemoved {
            job_id: job_id.to_string(),
        });
        if !inner.queue.is_empty() {
            self.emit(QueueEvent::PositionsUpdated(inner.positions()));
        }
        true
    }

    /// Clear the active slot if it holds `job_id`, then dispatch the next
    /// job regardless. Returns whether the slot was cleared.
    pub fn complete(&self, job_id: &str) -> bool {
        let mut inner = self.lock();

        let cleared = inner.active.as_ref().is_some_and(|a| a.id == job_id);
        if cleared {
            inner.active = None;
            tracing::info!(job_id, "Active job completed");
        } else {
            tracing::warn!(job_id, "complete() for a job that is not active");
        }

        self.dispatch(&mut inner);
        cleared
    }

    /// 1-based position; the active job is at 1.
    pub fn position(&self, job_id: &str) -> Option<usize> {
        let inner = self.lock();
        if inner.active.as_ref().is_some_and(|a| a.id == job_id) {
            return Some(1);
        }
        inner
            .queue
            .iter()
            .position(|j| j.id == job_id)
            .map(|i| i + 1 + inner.offset())
    }

    pub fn is_full(&self) -> bool {
        self.lock().occupied() >= self.capacity
    }

    pub fn is_processing(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Number of jobs waiting behind the active one.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn active(&self) -> Option<Job> {
        self.lock().active.clone()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            capacity: self.capacity,
            active: inner.active.clone(),
            queued: inner.queue.iter().cloned().collect(),
        }
    }

    // ---- private helpers ----

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        // Zero receivers is fine.
        let _ = self.event_tx.send(event);
    }

    fn dispatch(&self, inner: &mut QueueInner) {
        if inner.active.is_some() {
            return;
        }
        let Some(mut job) = inner.queue.pop_front() else {
            return;
        };

        job.status = JobStatus::Active;
        inner.active = Some(job.clone());
        tracing::info!(job_id = %job.id, remaining = inner.queue.len(), "Dispatching job");

        self.emit(QueueEvent::ProcessStart(job));
        if !inner.queue.is_empty() {
            self.emit(QueueEvent::PositionsUpdated(inner.positions()));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
