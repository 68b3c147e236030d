// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Subscriber registry: maps (kind, stage) to the module that realizes that
//! stage. Pure dispatch; threading belongs to the task manager.

use crate::objects::Kind;
use crate::status::Stage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// What happened to an intent, as carried by tasks and change events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Create => write!(f, "create"),
            EventKind::Update => write!(f, "update"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}

/// A publication to one subscriber: which intent, at which version, and what
/// happened to it. Subscribers fetch the record themselves and must treat a
/// version mismatch as a stale no-op.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: Kind,
    pub name: String,
    pub version: u64,
    pub op: EventKind,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} v{}", self.op, self.name, self.version)
    }
}

/// Whether a failed apply is worth retrying.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Transient,
    Permanent,
}

/// A subscriber's verdict on one publication.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The external subsystem matches the intent.
    Done,
    /// Cannot apply yet; optionally names the intent being waited for.
    Pending(Option<String>),
    /// The apply failed.
    Failed(Severity, String),
}

/// One subsystem module. `handle` must be idempotent: re-publishing the same
/// (name, version, op) must converge to the same external state.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, event: &Event) -> Outcome;
}

type KindTable = BTreeMap<Stage, Arc<dyn Subscriber>>;

/// The registry. Exactly one subscriber per (kind, stage); re-subscribing
/// replaces the previous entry.
#[derive(Default)]
pub struct SubscriberTable {
    inner: RwLock<BTreeMap<Kind, KindTable>>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for one (kind, stage) slot.
    pub fn subscribe(&self, kind: Kind, stage: Stage, subscriber: Arc<dyn Subscriber>) {
        debug!("Subscribing '{}' to {kind}/{stage}", subscriber.name());
        let mut table = self.inner.write().unwrap();
        if let Some(previous) = table.entry(kind).or_default().insert(stage, subscriber) {
            warn!("Replaced subscriber '{}' at {kind}/{stage}", previous.name());
        }
    }

    /// Register `subscriber` at `stage` for every kind.
    pub fn subscribe_all(&self, stage: Stage, subscriber: Arc<dyn Subscriber>) {
        for kind in Kind::ALL {
            self.subscribe(kind, stage, subscriber.clone());
        }
    }

    /// The stages registered for a kind, in apply (priority) order. This is
    /// what seeds the status vector and the task stage list.
    pub fn stages_for(&self, kind: Kind) -> Vec<Stage> {
        let table = self.inner.read().unwrap();
        table
            .get(&kind)
            .map(|stages| stages.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn lookup(&self, kind: Kind, stage: Stage) -> Option<Arc<dyn Subscriber>> {
        let table = self.inner.read().unwrap();
        table.get(&kind)?.get(&stage).cloned()
    }

    /// Publish `event` to the subscriber at `stage` and hand back its
    /// outcome; `None` when no subscriber holds that slot.
    pub async fn publish(&self, stage: Stage, event: &Event) -> Option<Outcome> {
        let subscriber = self.lookup(event.kind, stage)?;
        debug!("Publishing {event} to '{}'", subscriber.name());
        Some(subscriber.handle(event).await)
    }
}
