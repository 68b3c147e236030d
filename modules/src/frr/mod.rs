// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The FRR module: realizes the BGP-EVPN side of an intent by rendering FRR
//! configuration and shipping it to the frr-agent.

pub mod frrmi;
pub mod renderer;

use crate::frr::frrmi::FrrMi;
use crate::frr::renderer::{Render, RenderCtx};
use intentdb::db::IntentDb;
use intentdb::objects::{IntentRecord, IntentSpec, Kind};
use intentdb::status::Stage;
use intentdb::subscribe::{Event, EventKind, Outcome, Severity, Subscriber};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_AGENT_PATH: &str = "/var/run/frr/frr-agent.sock";
pub const DEFAULT_ASN: u32 = 65000;

/// Subscriber for the `frr` stage of every kind.
pub struct FrrModule {
    db: Arc<IntentDb>,
    mi: Mutex<FrrMi>,
    asn: u32,
}

impl FrrModule {
    pub fn new(db: Arc<IntentDb>, agent_path: impl Into<PathBuf>, asn: u32) -> Self {
        Self {
            db,
            mi: Mutex::new(FrrMi::new(agent_path)),
            asn,
        }
    }

    /// A record may only be applied once the intents it references have their
    /// own FRR state in place. Returns the first reference that has not.
    fn blocking_dep(&self, record: &IntentRecord) -> Option<String> {
        let deps: &[String] = match &record.spec {
            IntentSpec::Subnet(spec) => std::slice::from_ref(&spec.vpc),
            IntentSpec::BridgePort(spec) => &spec.logical_bridges,
            _ => &[],
        };
        deps.iter()
            .find(|dep| {
                !self
                    .db
                    .get(dep)
                    .is_ok_and(|dep| dep.stage_done(Stage::Frr))
            })
            .cloned()
    }
}

#[async_trait]
impl Subscriber for FrrModule {
    fn name(&self) -> &'static str {
        "frr"
    }

    async fn handle(&self, event: &Event) -> Outcome {
        // fetch the current record; a publish for anything else is stale
        let record = match self.db.get(&event.name) {
            Ok(record) => record,
            Err(_) => {
                debug!("'{}' is gone; nothing to do in FRR", event.name);
                return Outcome::Done;
            }
        };
        if record.version != event.version {
            debug!(
                "Stale publish for '{}' v{} (current v{}); ignoring",
                event.name, event.version, record.version
            );
            return Outcome::Done;
        }

        if event.op != EventKind::Delete {
            if let Some(dep) = self.blocking_dep(&record) {
                debug!("'{}' waits for '{dep}' in FRR", event.name);
                return Outcome::Pending(Some(dep));
            }
        }

        let id = match Kind::parse_name(&record.name) {
            Ok((_, id)) => id.to_owned(),
            Err(e) => return Outcome::Failed(Severity::Permanent, e.to_string()),
        };
        let config = record.render(&RenderCtx {
            id,
            asn: self.asn,
            op: event.op,
        });
        if config.is_empty() {
            debug!("'{}' needs no FRR config", event.name);
            return Outcome::Done;
        }

        let mut mi = self.mi.lock().await;
        match mi.apply_config(event.version, &config.to_string()).await {
            Ok(()) => Outcome::Done,
            Err(e) => {
                warn!("FRR apply for '{}' v{} failed: {e}", event.name, event.version);
                Outcome::Failed(Severity::Transient, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentdb::objects::{BridgePortSpec, LogicalBridgeSpec, PortType, VpcSpec};
    use intentdb::status::StageStatus;
    use intentdb::subscribe::SubscriberTable;
    use intentdb::taskqueue::TaskQueue;
    use objstore::Store;
    use tokio::net::UnixListener;

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

    fn db(dir: &std::path::Path) -> Arc<IntentDb> {
        let registry = Arc::new(SubscriberTable::new());
        registry.subscribe_all(Stage::Frr, Arc::new(Inert));
        let queue = Arc::new(TaskQueue::new(64));
        Arc::new(IntentDb::new(Store::open(dir).unwrap(), queue, registry))
    }

    fn event(record: &IntentRecord, op: EventKind) -> Event {
        Event {
            kind: record.kind,
            name: record.name.clone(),
            version: record.version,
            op,
        }
    }

    /// Fake agent serving any number of connections, always approving.
    fn spawn_agent(path: &std::path::Path) {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    while let Ok((genid, _)) = frrmi::receive_msg(&mut sock).await {
                        if frrmi::send_msg(&mut sock, genid, "Ok").await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn stale_publish_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(dir.path());
        let record = db
            .create(
                "blue",
                IntentSpec::Vpc(VpcSpec {
                    route_table: 1000,
                    vni: None,
                    loopback: None,
                }),
            )
            .unwrap();

        let module = FrrModule::new(db, "/nonexistent.sock", DEFAULT_ASN);
        let mut stale = event(&record, EventKind::Create);
        stale.version = 99;
        // no agent is reachable, yet the stale publish succeeds vacuously
        assert_eq!(module.handle(&stale).await, Outcome::Done);
    }

    #[tokio::test]
    async fn port_waits_for_its_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(dir.path());
        let lb = db
            .create(
                "lb1",
                IntentSpec::LogicalBridge(LogicalBridgeSpec {
                    vlan_id: 100,
                    vni: None,
                }),
            )
            .unwrap();
        let bp = db
            .create(
                "bp1",
                IntentSpec::BridgePort(BridgePortSpec {
                    mac: "00:11:22:33:44:55".parse().unwrap(),
                    ptype: PortType::Access,
                    logical_bridges: vec![lb.name.clone()],
                }),
            )
            .unwrap();

        let module = FrrModule::new(db.clone(), "/nonexistent.sock", DEFAULT_ASN);
        let outcome = module.handle(&event(&bp, EventKind::Create)).await;
        assert_eq!(outcome, Outcome::Pending(Some(lb.name.clone())));

        // once the bridge has its FRR state, the port proceeds (a port
        // renders nothing, so no agent round-trip is needed)
        db.update_status(&lb.name, lb.version, Stage::Frr, StageStatus::Done)
            .unwrap();
        let outcome = module.handle(&event(&bp, EventKind::Create)).await;
        assert_eq!(outcome, Outcome::Done);
    }

    #[tokio::test]
    async fn vpc_config_reaches_the_agent() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(dir.path());
        let record = db
            .create(
                "blue",
                IntentSpec::Vpc(VpcSpec {
                    route_table: 1000,
                    vni: None,
                    loopback: None,
                }),
            )
            .unwrap();

        let sock = dir.path().join("frr-agent.sock");
        spawn_agent(&sock);
        let module = FrrModule::new(db, &sock, DEFAULT_ASN);
        assert_eq!(module.handle(&event(&record, EventKind::Create)).await, Outcome::Done);
        // idempotent: a second publish converges the same way
        assert_eq!(module.handle(&event(&record, EventKind::Create)).await, Outcome::Done);
    }

    #[tokio::test]
    async fn unreachable_agent_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let db = db(dir.path());
        let record = db
            .create(
                "blue",
                IntentSpec::Vpc(VpcSpec {
                    route_table: 1000,
                    vni: None,
                    loopback: None,
                }),
            )
            .unwrap();

        let module = FrrModule::new(db, dir.path().join("nobody.sock"), DEFAULT_ASN);
        let outcome = module.handle(&event(&record, EventKind::Create)).await;
        assert!(matches!(outcome, Outcome::Failed(Severity::Transient, _)));
    }
}
