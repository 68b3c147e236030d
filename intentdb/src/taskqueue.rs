// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The realization work queue: a bounded FIFO of tasks plus a delay set for
//! backoff, with coalescing so one (name, version) is queued at most once.

use crate::errors::{ApiError, ApiResult};
use crate::status::Stage;
use crate::subscribe::EventKind;
use ahash::AHashSet;
use rand::Rng as _;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// One unit of realization work: drive `name` at `version` through the
/// stages still remaining.
#[derive(Clone, Debug)]
pub struct Task {
    pub name: String,
    pub version: u64,
    pub event: EventKind,
    pub stages: VecDeque<Stage>,
    pub attempt: u32,
    pub not_before: Instant,
}

impl Task {
    pub fn new(name: String, version: u64, event: EventKind, stages: Vec<Stage>) -> Self {
        Self {
            name,
            version,
            event,
            stages: stages.into(),
            attempt: 0,
            not_before: Instant::now(),
        }
    }

    fn key(&self) -> (String, u64) {
        (self.name.clone(), self.version)
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Task>,
    delayed: Vec<Task>,
    queued: AHashSet<(String, u64)>,
}

impl QueueState {
    /// Move every due task from the delay set to the ready FIFO, oldest
    /// deadline first.
    fn promote_due(&mut self, now: Instant) {
        let mut due: Vec<Task> = Vec::new();
        self.delayed.retain(|task| {
            if task.not_before <= now {
                due.push(task.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|task| task.not_before);
        self.ready.extend(due);
    }

    /// Drop a queued entry with this key, handing back its attempt counter.
    fn evict(&mut self, key: &(String, u64)) -> Option<u32> {
        if !self.queued.contains(key) {
            return None;
        }
        if let Some(pos) = self
            .ready
            .iter()
            .position(|t| t.name == key.0 && t.version == key.1)
        {
            return self.ready.remove(pos).map(|t| t.attempt);
        }
        if let Some(pos) = self
            .delayed
            .iter()
            .position(|t| t.name == key.0 && t.version == key.1)
        {
            return Some(self.delayed.swap_remove(pos).attempt);
        }
        None
    }

    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.iter().map(|task| task.not_before).min()
    }
}

/// FIFO of pending realization work. One consumer (the task manager), many
/// producers (the database and requeues).
pub struct TaskQueue {
    state: Mutex<QueueState>,
    ready_notify: Notify,
    capacity: usize,
}

impl TaskQueue {
    const BACKOFF_BASE: Duration = Duration::from_millis(250);
    const BACKOFF_CEILING: Duration = Duration::from_secs(30);

    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready_notify: Notify::new(),
            capacity,
        }
    }

    /// Append a task. A task for the same (name, version) already queued is
    /// replaced; the replacement keeps the larger attempt counter.
    pub fn push(&self, task: Task) -> ApiResult<()> {
        self.insert(task, false)
    }

    /// Queue a task ahead of everything ready; used to continue a task with
    /// its next stage without yielding its place.
    pub fn push_front(&self, mut task: Task) -> ApiResult<()> {
        task.not_before = Instant::now();
        self.insert(task, true)
    }

    /// Put a task back with a delay.
    pub fn requeue(&self, mut task: Task, backoff: Duration) -> ApiResult<()> {
        task.not_before = Instant::now() + backoff;
        trace!(
            "Requeueing {} v{} with backoff {backoff:?} (attempt {})",
            task.name, task.version, task.attempt
        );
        self.insert(task, false)
    }

    fn insert(&self, mut task: Task, front: bool) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = task.key();
        if let Some(prior_attempt) = state.evict(&key) {
            task.attempt = task.attempt.max(prior_attempt);
            debug!("Coalesced duplicate task for {} v{}", task.name, task.version);
        } else if state.len() >= self.capacity {
            return Err(ApiError::Internal(format!(
                "task queue full ({} entries)",
                self.capacity
            )));
        }
        state.queued.insert(key);
        if task.not_before > Instant::now() {
            state.delayed.push(task);
        } else if front {
            state.ready.push_front(task);
        } else {
            state.ready.push_back(task);
        }
        drop(state);
        self.ready_notify.notify_one();
        Ok(())
    }

    /// Wake any queued task for `name`: its delay is clamped to now. Called
    /// when a dependency the task was waiting for became ready.
    pub fn notify(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let mut woke = false;
        for task in &mut state.delayed {
            if task.name == name {
                task.not_before = Instant::now();
                woke = true;
            }
        }
        if woke {
            state.promote_due(Instant::now());
            drop(state);
            debug!("Woke queued task(s) for '{name}'");
            self.ready_notify.notify_one();
        }
    }

    /// Take the oldest ready task, waiting for one to become ready.
    pub async fn pop(&self) -> Task {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                state.promote_due(Instant::now());
                if let Some(task) = state.ready.pop_front() {
                    state.queued.remove(&task.key());
                    return task;
                }
                state.next_deadline()
            };
            match wait {
                Some(deadline) => {
                    let _ = tokio::time::timeout_at(deadline, self.ready_notify.notified()).await;
                }
                None => self.ready_notify.notified().await,
            }
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retry delay for the given attempt: doubling from 250ms up to 30s,
    /// with +/-20% jitter to spread synchronized retries.
    pub fn backoff(attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(7);
        let delay = Self::BACKOFF_BASE
            .saturating_mul(factor)
            .min(Self::BACKOFF_CEILING);
        let jitter = rand::rng().random_range(0.8..=1.2);
        delay.mul_f64(jitter)
    }
}
