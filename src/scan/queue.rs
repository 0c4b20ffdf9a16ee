//! Shared work queue with tri-state completion detection
//!
//! The queue hands directory tasks to workers and tracks what each worker
//! is doing. A scan is complete only when the queue is empty AND every
//! worker is idle: an empty queue alone proves nothing, because a worker
//! mid-scan may be about to push a thousand subdirectories.
//!
//! Worker state transitions happen under the same lock as the pop that
//! causes them, so [`TaskQueue::is_complete`] can never observe a task
//! leaving the queue without its worker being marked busy.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::scan::node::AggregateNode;

/// A unit of work handed to a worker
#[derive(Debug)]
pub enum Task {
    /// Scan the directory this pre-built rollup node describes
    Scan(Box<AggregateNode>),
    /// Shut down; one sentinel is pushed per worker
    Stop,
}

/// What a worker is currently doing, as observed by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting on an empty queue
    Idle,
    /// Popped a stop sentinel, about to exit
    HoldingSentinel,
    /// Scanning a directory
    Scanning,
}

struct Inner {
    tasks: VecDeque<Task>,
    states: HashMap<usize, WorkerState>,
}

/// Mutex-and-condvar task queue shared by all workers
pub struct TaskQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                states: HashMap::new(),
            }),
            available: Condvar::new(),
        }
    }

    /// Push a batch of tasks and wake every waiting worker
    pub fn push(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut inner = self.lock();
        inner.tasks.extend(tasks);
        self.available.notify_all();
    }

    /// Pop the next task, blocking up to `timeout`
    ///
    /// Returns `None` on timeout. The calling worker's state is updated
    /// under the queue lock: `Scanning` when a scan task is handed out,
    /// `HoldingSentinel` for a stop sentinel, `Idle` while waiting.
    pub fn pop(&self, worker: usize, timeout: Duration) -> Option<Task> {
        let mut inner = self.lock();
        if inner.tasks.is_empty() {
            inner.states.insert(worker, WorkerState::Idle);
            let (guard, result) = self
                .available
                .wait_timeout_while(inner, timeout, |inner| inner.tasks.is_empty())
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner = guard;
            if result.timed_out() && inner.tasks.is_empty() {
                return None;
            }
        }
        let task = inner.tasks.pop_front()?;
        let state = match &task {
            Task::Scan(_) => WorkerState::Scanning,
            Task::Stop => WorkerState::HoldingSentinel,
        };
        inner.states.insert(worker, state);
        Some(task)
    }

    /// Mark a worker idle without popping, used at worker exit
    pub fn mark_idle(&self, worker: usize) {
        self.lock().states.insert(worker, WorkerState::Idle);
    }

    /// Check whether the scan has drained: no queued tasks and no worker
    /// doing anything
    pub fn is_complete(&self) -> bool {
        let inner = self.lock();
        inner.tasks.is_empty()
            && inner
                .states
                .values()
                .all(|s| *s == WorkerState::Idle)
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
