// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The task execution loop: pops realization tasks, publishes them stage by
//! stage to the registered modules and applies the outcomes.

use crate::db::IntentDb;
use crate::status::StageStatus;
use crate::subscribe::{Event, EventKind, Outcome, Severity, SubscriberTable};
use crate::taskqueue::{Task, TaskQueue};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drives queued tasks to completion. One instance, one worker: stages of a
/// task run strictly in order, and a module may assume every lower-priority
/// stage of the same intent is already in place when it is published to.
pub struct TaskManager {
    db: Arc<IntentDb>,
    queue: Arc<TaskQueue>,
    registry: Arc<SubscriberTable>,
}

impl TaskManager {
    pub fn new(db: Arc<IntentDb>, queue: Arc<TaskQueue>, registry: Arc<SubscriberTable>) -> Self {
        Self {
            db,
            queue,
            registry,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!("Starting task manager...");
        loop {
            let task = self.queue.pop().await;
            self.process(task).await;
        }
    }

    async fn process(&self, mut task: Task) {
        // A task speaks for one version only. If the intent moved on (or went
        // away), whatever this task would have done is already superseded.
        let record = match self.db.get(&task.name) {
            Ok(record) => record,
            Err(_) => {
                debug!("Dropping task for absent '{}' v{}", task.name, task.version);
                return;
            }
        };
        if record.version != task.version {
            debug!(
                "Dropping stale task for '{}' v{} (current v{})",
                task.name, task.version, record.version
            );
            return;
        }
        if record.deleting != (task.event == EventKind::Delete) {
            debug!("Dropping task for '{}' v{}: lifecycle mismatch", task.name, task.version);
            return;
        }

        let Some(stage) = task.stages.front().copied() else {
            self.complete(&task).await;
            return;
        };
        let event = Event {
            kind: record.kind,
            name: task.name.clone(),
            version: task.version,
            op: task.event,
        };
        let outcome = match self.registry.publish(stage, &event).await {
            Some(outcome) => outcome,
            None => {
                error!("No subscriber for {}/{stage}; '{}' cannot be realized", record.kind, task.name);
                Outcome::Failed(Severity::Permanent, format!("no subscriber for stage {stage}"))
            }
        };
        debug!("Stage {stage} of {event}: {outcome:?}");

        match outcome {
            Outcome::Done => {
                self.record_status(&task, stage, StageStatus::Done);
                task.stages.pop_front();
                if task.stages.is_empty() {
                    self.complete(&task).await;
                } else {
                    // next stage continues immediately, ahead of other work
                    task.attempt = 0;
                    if let Err(e) = self.queue.push_front(task) {
                        error!("Could not continue task: {e}");
                    }
                }
            }
            Outcome::Pending(dep) => {
                self.record_status(&task, stage, StageStatus::Pending);
                if let Some(dep) = &dep {
                    self.db.register_waiter(dep, &task.name);
                }
                // timed requeue as a fallback even when a waiter is set
                let backoff = TaskQueue::backoff(task.attempt);
                if let Err(e) = self.queue.requeue(task, backoff) {
                    error!("Could not requeue pending task: {e}");
                }
            }
            Outcome::Failed(Severity::Transient, reason) => {
                warn!(
                    "Stage {stage} of '{}' v{} failed (attempt {}): {reason}",
                    task.name, task.version, task.attempt
                );
                self.record_status(&task, stage, StageStatus::Error { reason });
                let backoff = TaskQueue::backoff(task.attempt);
                task.attempt += 1;
                if let Err(e) = self.queue.requeue(task, backoff) {
                    error!("Could not requeue failed task: {e}");
                }
            }
            Outcome::Failed(Severity::Permanent, reason) => {
                error!(
                    "Stage {stage} of '{}' v{} failed permanently: {reason}",
                    task.name, task.version
                );
                self.record_status(&task, stage, StageStatus::Error { reason });
                // not retried; a new version of the intent starts over
            }
        }
    }

    async fn complete(&self, task: &Task) {
        if task.event == EventKind::Delete {
            if let Err(e) = self.db.finalize_delete(&task.name, task.version) {
                error!("Could not finalize delete of '{}': {e}", task.name);
            }
        } else {
            info!("Intent '{}' realized at v{}", task.name, task.version);
        }
    }

    fn record_status(&self, task: &Task, stage: crate::status::Stage, status: StageStatus) {
        if let Err(e) = self
            .db
            .update_status(&task.name, task.version, stage, status)
        {
            warn!("Could not record status for '{}' v{}: {e}", task.name, task.version);
        }
    }
}
