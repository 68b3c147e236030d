// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The authoritative intent database. Single writer: one lock guards the
//! in-memory graph, version minting, storage commits and task enqueue, so
//! reference checks and the commit they protect can never interleave with
//! another write.

use crate::errors::{ApiError, ApiResult};
use crate::objects::{IntentRecord, IntentSpec, Kind};
use crate::status::{Stage, StageStatus, pending_vector};
use crate::subscribe::{Event, EventKind, SubscriberTable};
use crate::taskqueue::{Task, TaskQueue};
use objstore::{Store, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Default)]
struct DbState {
    /// In-memory mirror of storage; never diverges from it after a commit.
    objects: BTreeMap<String, IntentRecord>,
    /// Reverse reference index: target name -> names pointing at it.
    referrers: BTreeMap<String, BTreeSet<String>>,
    /// Dependency waiters: name -> tasks to wake when it reaches done.
    waiters: BTreeMap<String, BTreeSet<String>>,
}

impl DbState {
    fn link_refs(&mut self, record: &IntentRecord) {
        for target in &record.refs {
            self.referrers
                .entry(target.clone())
                .or_default()
                .insert(record.name.clone());
        }
    }

    fn unlink_refs(&mut self, record: &IntentRecord) {
        for target in &record.refs {
            if let Some(set) = self.referrers.get_mut(target) {
                set.remove(&record.name);
                if set.is_empty() {
                    self.referrers.remove(target);
                }
            }
        }
    }
}

/// The intent database and entry point of the realization pipeline.
pub struct IntentDb {
    store: Store<IntentRecord>,
    queue: Arc<TaskQueue>,
    registry: Arc<SubscriberTable>,
    state: Mutex<DbState>,
    events: broadcast::Sender<Event>,
}

impl IntentDb {
    pub fn new(
        store: Store<IntentRecord>,
        queue: Arc<TaskQueue>,
        registry: Arc<SubscriberTable>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            store,
            queue,
            registry,
            state: Mutex::new(DbState::default()),
            events,
        }
    }

    /// Subscribe to committed change events.
    pub fn watch(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    fn lock(&self) -> MutexGuard<'_, DbState> {
        self.state.lock().unwrap()
    }

    fn emit(&self, kind: Kind, name: &str, version: u64, op: EventKind) {
        let _ = self.events.send(Event {
            kind,
            name: name.to_owned(),
            version,
            op,
        });
    }

    /// Commit a record to storage, expecting `expected` there. One inner
    /// retry on a version conflict, then the operation aborts.
    fn persist(&self, record: &IntentRecord, expected: u64) -> ApiResult<()> {
        match self.store.set(&record.name, record, expected) {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict { have }) => {
                warn!(
                    "Version conflict persisting '{}' (expected {expected}, stored {have}); retrying once",
                    record.name
                );
                self.store
                    .set(&record.name, record, have)
                    .map(|_| ())
                    .map_err(|e| ApiError::Aborted(format!("storing '{}': {e}", record.name)))
            }
            Err(e) => Err(ApiError::Internal(format!("storing '{}': {e}", record.name))),
        }
    }

    fn enqueue(&self, record: &IntentRecord, op: EventKind, stages: Vec<Stage>) -> ApiResult<()> {
        self.queue.push(Task::new(
            record.name.clone(),
            record.version,
            op,
            stages,
        ))
    }

    /// Create an intent. Returns the existing record when it already exists
    /// with an equal spec; the caller never sees `AlreadyExists` for a
    /// replayed request.
    pub fn create(&self, id: &str, spec: IntentSpec) -> ApiResult<IntentRecord> {
        spec.validate()?;
        let kind = spec.kind();
        if id.is_empty() {
            return Err(ApiError::InvalidArgument("empty resource id".to_owned()));
        }
        let name = kind.resource_name(id);

        let mut state = self.lock();
        if let Some(existing) = state.objects.get(&name) {
            if existing.deleting {
                return Err(ApiError::AlreadyExists(format!("{name} (being deleted)")));
            }
            if existing.spec == spec {
                debug!("Create of '{name}' replayed with equal spec; returning existing");
                return Ok(existing.clone());
            }
            return Err(ApiError::AlreadyExists(name));
        }
        self.check_refs(&state, &spec)?;

        let stages = self.registry.stages_for(kind);
        let record = IntentRecord {
            name: name.clone(),
            kind,
            version: 1,
            refs: spec.refs(),
            status: pending_vector(&stages),
            spec,
            deleting: false,
        };
        self.persist(&record, 0)?;
        state.objects.insert(name.clone(), record.clone());
        state.link_refs(&record);
        self.enqueue(&record, EventKind::Create, stages)?;
        drop(state);

        info!("Created {kind} '{name}' at v1");
        self.emit(kind, &name, 1, EventKind::Create);
        Ok(record)
    }

    /// Replace an intent's spec. Every successful update mints a new version
    /// and resets the whole status vector, re-triggering realization.
    pub fn update(&self, name: &str, spec: IntentSpec) -> ApiResult<IntentRecord> {
        spec.validate()?;

        let mut state = self.lock();
        let Some(existing) = state.objects.get(name).cloned() else {
            return Err(ApiError::NotFound(name.to_owned()));
        };
        if existing.deleting {
            return Err(ApiError::FailedPrecondition(format!(
                "'{name}' is being deleted"
            )));
        }
        if spec.kind() != existing.kind {
            return Err(ApiError::InvalidArgument(format!(
                "'{name}' is a {}, not a {}",
                existing.kind,
                spec.kind()
            )));
        }
        self.check_refs(&state, &spec)?;

        let stages = self.registry.stages_for(existing.kind);
        let record = IntentRecord {
            name: name.to_owned(),
            kind: existing.kind,
            version: existing.version + 1,
            refs: spec.refs(),
            status: pending_vector(&stages),
            spec,
            deleting: false,
        };
        self.persist(&record, existing.version)?;
        state.unlink_refs(&existing);
        state.objects.insert(name.to_owned(), record.clone());
        state.link_refs(&record);
        self.enqueue(&record, EventKind::Update, stages)?;
        drop(state);

        info!("Updated {} '{name}' to v{}", record.kind, record.version);
        self.emit(record.kind, name, record.version, EventKind::Update);
        Ok(record)
    }

    pub fn get(&self, name: &str) -> ApiResult<IntentRecord> {
        self.lock()
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(name.to_owned()))
    }

    pub fn list(&self, kind: Kind) -> Vec<IntentRecord> {
        self.lock()
            .objects
            .values()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect()
    }

    /// Start tearing an intent down. Refused while other intents still point
    /// at it; an absent intent is an error unless `allow_missing` makes it a
    /// no-op. The record disappears once the teardown task drains; until
    /// then reads see it with `deleting` set.
    pub fn delete(&self, name: &str, allow_missing: bool) -> ApiResult<()> {
        let mut state = self.lock();
        let Some(existing) = state.objects.get(name).cloned() else {
            if allow_missing {
                debug!("Delete of absent '{name}' allowed as a no-op");
                return Ok(());
            }
            return Err(ApiError::NotFound(name.to_owned()));
        };
        if let Some(referrers) = state.referrers.get(name) {
            if !referrers.is_empty() {
                return Err(ApiError::FailedPrecondition(format!(
                    "'{name}' is still referenced by {}",
                    referrers.iter().cloned().collect::<Vec<_>>().join(", ")
                )));
            }
        }
        if existing.deleting {
            debug!("Delete of '{name}' replayed; teardown already in progress");
            return Ok(());
        }

        // Tear down in reverse priority order.
        let mut stages = self.registry.stages_for(existing.kind);
        stages.reverse();
        let record = IntentRecord {
            version: existing.version + 1,
            status: pending_vector(&stages),
            deleting: true,
            ..existing.clone()
        };
        self.persist(&record, existing.version)?;
        state.objects.insert(name.to_owned(), record.clone());
        self.enqueue(&record, EventKind::Delete, stages)?;
        drop(state);

        info!("Deleting {} '{name}' (v{})", record.kind, record.version);
        self.emit(record.kind, name, record.version, EventKind::Delete);
        Ok(())
    }

    /// Record a stage outcome. Stale versions are ignored, and a stage that
    /// already reached done at this version stays done: outcomes of
    /// superseded publishes can never overwrite current state.
    pub fn update_status(
        &self,
        name: &str,
        version: u64,
        stage: Stage,
        status: StageStatus,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        let Some(record) = state.objects.get_mut(name) else {
            debug!("Status update for absent '{name}' dropped");
            return Ok(());
        };
        if record.version != version {
            debug!(
                "Stale status update for '{name}' v{version} dropped (current v{})",
                record.version
            );
            return Ok(());
        }
        if record.status.get(&stage) == Some(&StageStatus::Done) && status != StageStatus::Done {
            debug!("Refusing to regress done stage {stage} of '{name}' v{version}");
            return Ok(());
        }
        record.status.insert(stage, status.clone());
        let record = record.clone();
        self.persist(&record, version)?;

        if status == StageStatus::Done {
            if let Some(waiters) = state.waiters.remove(name) {
                drop(state);
                for waiter in waiters {
                    debug!("'{name}' reached {stage}=done; waking '{waiter}'");
                    self.queue.notify(&waiter);
                }
            }
        }
        Ok(())
    }

    /// Note that `waiter`'s realization is blocked on `dep`. The waiter's
    /// queued task is woken on the next done transition of `dep`.
    pub fn register_waiter(&self, dep: &str, waiter: &str) {
        self.lock()
            .waiters
            .entry(dep.to_owned())
            .or_default()
            .insert(waiter.to_owned());
    }

    /// Final step of a teardown: drop the record from storage and memory.
    pub fn finalize_delete(&self, name: &str, version: u64) -> ApiResult<()> {
        let mut state = self.lock();
        let Some(record) = state.objects.get(name).cloned() else {
            return Ok(());
        };
        if record.version != version || !record.deleting {
            debug!("Stale delete finalization for '{name}' v{version} dropped");
            return Ok(());
        }
        match self.store.delete(name, version) {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(ApiError::Internal(format!("deleting '{name}': {e}"))),
        }
        state.objects.remove(name);
        state.unlink_refs(&record);
        // anything still waiting on this name will never see it done
        if let Some(waiters) = state.waiters.remove(name) {
            drop(state);
            for waiter in waiters {
                self.queue.notify(&waiter);
            }
        }
        info!("Removed {} '{name}'", record.kind);
        self.emit(record.kind, name, version, EventKind::Delete);
        Ok(())
    }

    /// Rebuild the in-memory model from storage and resume realization of
    /// everything that is not fully done. Records persisted before a stage
    /// was deployed are treated as pending for it.
    pub fn recover(&self) -> ApiResult<usize> {
        let listed = self
            .store
            .list("")
            .map_err(|e| ApiError::Internal(format!("loading store: {e}")))?;

        let mut state = self.lock();
        let mut resumed = 0;
        for (name, mut record) in listed {
            let registered = self.registry.stages_for(record.kind);
            let mut grew = false;
            for stage in &registered {
                if !record.status.contains_key(stage) {
                    record.status.insert(*stage, StageStatus::Pending);
                    grew = true;
                }
            }
            if grew {
                self.persist(&record, record.version)?;
            }

            state.objects.insert(name.clone(), record.clone());
            state.link_refs(&record);

            let mut remaining: Vec<Stage> = if record.deleting {
                let mut stages = registered;
                stages.reverse();
                stages
            } else {
                registered
            };
            remaining.retain(|stage| !record.stage_done(*stage));
            if record.deleting || !remaining.is_empty() {
                let op = if record.deleting {
                    EventKind::Delete
                } else {
                    EventKind::Update
                };
                if let Err(e) = self.enqueue(&record, op, remaining) {
                    error!("Could not resume realization of '{name}': {e}");
                } else {
                    resumed += 1;
                }
            }
        }
        info!(
            "Recovered {} intent(s) from storage; resumed {resumed}",
            state.objects.len()
        );
        Ok(resumed)
    }

    /// Every reference must resolve to a live object of the right kind at
    /// commit time; the write lock keeps it that way until we commit.
    fn check_refs(&self, state: &DbState, spec: &IntentSpec) -> ApiResult<()> {
        for target in spec.refs() {
            match state.objects.get(&target) {
                Some(record) if record.deleting => {
                    return Err(ApiError::InvalidArgument(format!(
                        "referenced '{target}' is being deleted"
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(ApiError::InvalidArgument(format!(
                        "referenced '{target}' does not exist"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{BridgePortSpec, LogicalBridgeSpec, PortType, VpcSpec};
    use crate::subscribe::{Outcome, Subscriber};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Inert;

    #[async_trait]
    impl Subscriber for Inert {
        fn name(&self) -> &'static str {
            "inert"
        }
        async fn handle(&self, _event: &Event) -> Outcome {
            Outcome::Done
        }
    }

    fn harness(dir: &std::path::Path) -> (IntentDb, Arc<TaskQueue>) {
        let registry = Arc::new(SubscriberTable::new());
        registry.subscribe_all(Stage::Frr, Arc::new(Inert));
        registry.subscribe_all(Stage::GenLinux, Arc::new(Inert));
        let queue = Arc::new(TaskQueue::new(64));
        let store = Store::open(dir).unwrap();
        (IntentDb::new(store, queue.clone(), registry), queue)
    }

    fn vpc_spec(table: u32) -> IntentSpec {
        IntentSpec::Vpc(VpcSpec {
            route_table: table,
            vni: None,
            loopback: None,
        })
    }

    fn lb_spec(vlan: u16) -> IntentSpec {
        IntentSpec::LogicalBridge(LogicalBridgeSpec {
            vlan_id: vlan,
            vni: None,
        })
    }

    fn bp_spec(bridges: &[&str]) -> IntentSpec {
        IntentSpec::BridgePort(BridgePortSpec {
            mac: "00:11:22:33:44:55".parse().unwrap(),
            ptype: PortType::Access,
            logical_bridges: bridges
                .iter()
                .map(|id| Kind::LogicalBridge.resource_name(id))
                .collect(),
        })
    }

    #[tokio::test]
    async fn create_is_idempotent_for_equal_specs() {
        let dir = tempfile::tempdir().unwrap();
        let (db, queue) = harness(dir.path());

        let first = db.create("blue", vpc_spec(1000)).unwrap();
        let replay = db.create("blue", vpc_spec(1000)).unwrap();
        assert_eq!(first, replay);
        assert_eq!(replay.version, 1);
        // the replay did not enqueue a second task
        assert_eq!(queue.len(), 1);

        let clash = db.create("blue", vpc_spec(2000)).unwrap_err();
        assert!(matches!(clash, ApiError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn dangling_reference_rejected_and_nothing_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (db, queue) = harness(dir.path());

        let err = db.create("bp1", bp_spec(&["missing"])).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
        assert!(db.get(&Kind::BridgePort.resource_name("bp1")).is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn update_mints_version_and_resets_status() {
        let dir = tempfile::tempdir().unwrap();
        let (db, _queue) = harness(dir.path());

        let created = db.create("blue", vpc_spec(1000)).unwrap();
        db.update_status(&created.name, 1, Stage::Frr, StageStatus::Done)
            .unwrap();
        assert!(db.get(&created.name).unwrap().stage_done(Stage::Frr));

        let updated = db.update(&created.name, vpc_spec(2000)).unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.status.values().all(|s| *s == StageStatus::Pending));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn stale_and_regressive_status_updates_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (db, _queue) = harness(dir.path());

        let created = db.create("blue", vpc_spec(1000)).unwrap();
        db.update_status(&created.name, 1, Stage::Frr, StageStatus::Done)
            .unwrap();

        // stale version
        db.update_status(&created.name, 7, Stage::Frr, StageStatus::Pending)
            .unwrap();
        assert!(db.get(&created.name).unwrap().stage_done(Stage::Frr));
        assert!(logs_contain("Stale status update"));

        // regression at the live version
        db.update_status(
            &created.name,
            1,
            Stage::Frr,
            StageStatus::Error {
                reason: "late".to_owned(),
            },
        )
        .unwrap();
        assert!(db.get(&created.name).unwrap().stage_done(Stage::Frr));
    }

    #[tokio::test]
    async fn delete_refused_while_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let (db, _queue) = harness(dir.path());

        let lb = db.create("lb1", lb_spec(100)).unwrap();
        db.create("bp1", bp_spec(&["lb1"])).unwrap();

        let err = db.delete(&lb.name, false).unwrap_err();
        assert!(matches!(err, ApiError::FailedPrecondition(_)));

        // reference to a deleting object is rejected at create
        let bp = Kind::BridgePort.resource_name("bp1");
        db.delete(&bp, false).unwrap();
        let err = db.create("bp2", bp_spec(&["lb1"])).and(db.delete(&lb.name, false));
        // bp1 is tearing down but still holds its reference
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn delete_marks_and_finalize_removes() {
        let dir = tempfile::tempdir().unwrap();
        let (db, _queue) = harness(dir.path());

        let lb = db.create("lb1", lb_spec(100)).unwrap();
        db.delete(&lb.name, false).unwrap();

        let marked = db.get(&lb.name).unwrap();
        assert!(marked.deleting);
        assert_eq!(marked.version, 2);

        // replayed delete of an in-progress teardown is a no-op
        db.delete(&lb.name, false).unwrap();

        db.finalize_delete(&lb.name, 2).unwrap();
        assert!(matches!(db.get(&lb.name), Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_of_absent_object_honors_allow_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (db, queue) = harness(dir.path());

        let name = Kind::Vpc.resource_name("never-was");
        assert!(matches!(
            db.delete(&name, false),
            Err(ApiError::NotFound(_))
        ));
        db.delete(&name, true).unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn done_transition_wakes_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let (db, queue) = harness(dir.path());

        let lb = db.create("lb1", lb_spec(100)).unwrap();
        let bp = db.create("bp1", bp_spec(&["lb1"])).unwrap();

        // drain the two create tasks, then park the port's task far away
        queue.pop().await;
        queue.pop().await;
        queue
            .requeue(
                Task::new(
                    bp.name.clone(),
                    bp.version,
                    EventKind::Create,
                    vec![Stage::Frr],
                ),
                Duration::from_secs(3600),
            )
            .unwrap();
        db.register_waiter(&lb.name, &bp.name);

        db.update_status(&lb.name, lb.version, Stage::Frr, StageStatus::Done)
            .unwrap();
        let woken = tokio::time::timeout(Duration::from_millis(200), queue.pop())
            .await
            .expect("waiter should be woken");
        assert_eq!(woken.name, bp.name);
    }

    #[tokio::test]
    async fn recovery_backfills_stages_deployed_later() {
        let dir = tempfile::tempdir().unwrap();
        let name;
        {
            // first deployment: only the frr stage exists
            let registry = Arc::new(SubscriberTable::new());
            registry.subscribe_all(Stage::Frr, Arc::new(Inert));
            let queue = Arc::new(TaskQueue::new(64));
            let db = IntentDb::new(Store::open(dir.path()).unwrap(), queue, registry);
            name = db.create("blue", vpc_spec(1000)).unwrap().name;
            db.update_status(&name, 1, Stage::Frr, StageStatus::Done)
                .unwrap();
            assert!(db.get(&name).unwrap().realized());
        }

        // second deployment adds gen_linux: the old record is implicitly
        // pending for it and gets driven again
        let (db, queue) = harness(dir.path());
        assert_eq!(db.recover().unwrap(), 1);
        let record = db.get(&name).unwrap();
        assert!(record.stage_done(Stage::Frr));
        assert_eq!(
            record.status.get(&Stage::GenLinux),
            Some(&StageStatus::Pending)
        );
        let task = queue.pop().await;
        assert_eq!(
            task.stages,
            std::collections::VecDeque::from(vec![Stage::GenLinux])
        );
    }

    #[tokio::test]
    async fn recovery_rebuilds_state_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let lb_name;
        {
            let (db, _queue) = harness(dir.path());
            lb_name = db.create("lb1", lb_spec(100)).unwrap().name;
            db.create("bp1", bp_spec(&["lb1"])).unwrap();
            db.update_status(&lb_name, 1, Stage::Frr, StageStatus::Done)
                .unwrap();
        }

        let (db, queue) = harness(dir.path());
        let resumed = db.recover().unwrap();
        assert_eq!(resumed, 2);
        assert_eq!(queue.len(), 2);

        let lb = db.get(&lb_name).unwrap();
        assert!(lb.stage_done(Stage::Frr));

        // the resumed task for lb1 starts at the first stage not yet done
        let mut tasks = vec![queue.pop().await, queue.pop().await];
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        let lb_task = tasks.iter().find(|t| t.name == lb_name).unwrap();
        assert_eq!(lb_task.stages, std::collections::VecDeque::from(vec![Stage::GenLinux]));

        // referrer index survived the restart
        assert!(matches!(
            db.delete(&lb_name, false),
            Err(ApiError::FailedPrecondition(_))
        ));
    }
}
