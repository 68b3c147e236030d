// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The generic Linux module: realizes intent in the kernel networking stack
//! with netlink. VPCs become VRFs, subnets and logical bridges become
//! bridges, ports and gateway interfaces become enslaved links.

mod link;

use crate::genlinux::link::{
    add_address, ensure_link, find_link, remove_link, set_controller, set_link_up,
};
use async_trait::async_trait;
use intentdb::db::IntentDb;
use intentdb::objects::{
    ControlIfSpec, IfInfo, IntentRecord, IntentSpec, Kind, Mac,
};
use intentdb::status::Stage;
use intentdb::subscribe::{Event, EventKind, Outcome, Severity, Subscriber};
use rtnetlink::packet_route::link::{InfoBridge, InfoData, LinkAttribute, LinkMessage};
use rtnetlink::{Handle, LinkBridge, LinkDummy, LinkVrf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Subscriber for the `gen_linux` stage of every kind.
pub struct GenLinuxModule {
    db: Arc<IntentDb>,
    handle: Handle,
}

impl GenLinuxModule {
    pub fn new(db: Arc<IntentDb>) -> std::io::Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        Ok(Self { db, handle })
    }

    /// The links this intent depends on must exist before it can be wired
    /// up. Returns the first reference whose kernel state is not in place.
    fn blocking_dep(&self, record: &IntentRecord) -> Option<String> {
        record
            .refs
            .iter()
            .find(|dep| {
                !self
                    .db
                    .get(dep)
                    .is_ok_and(|dep| dep.stage_done(Stage::GenLinux))
            })
            .cloned()
    }

    fn with_mac(mut message: LinkMessage, mac: Option<Mac>) -> LinkMessage {
        if let Some(mac) = mac {
            message
                .attributes
                .push(LinkAttribute::Address(mac.octets().to_vec()));
        }
        message
    }

    async fn apply(&self, id: &str, record: &IntentRecord) -> Result<(), rtnetlink::Error> {
        let handle = &self.handle;
        match &record.spec {
            IntentSpec::Vpc(spec) => {
                let index =
                    ensure_link(handle, id, LinkVrf::new(id, spec.route_table).build()).await?;
                if let Some(loopback) = &spec.loopback {
                    add_address(handle, index, loopback.addr.into(), loopback.len).await?;
                }
                set_link_up(handle, index).await
            }
            IntentSpec::LogicalBridge(_) => {
                let message = LinkBridge::new(id)
                    .set_info_data(InfoData::Bridge(vec![InfoBridge::VlanFiltering(true)]))
                    .build();
                let index = ensure_link(handle, id, message).await?;
                set_link_up(handle, index).await
            }
            IntentSpec::Subnet(spec) => {
                let message =
                    Self::with_mac(LinkBridge::new(id).build(), spec.virtual_router_mac);
                let index = ensure_link(handle, id, message).await?;
                if let Some(prefix) = &spec.prefix {
                    add_address(handle, index, prefix.addr.into(), prefix.len).await?;
                }
                // bind the SVI into its VPC's VRF
                if let Ok((_, vrf_id)) = Kind::parse_name(&spec.vpc) {
                    if let Some(vrf) = find_link(handle, vrf_id).await? {
                        set_controller(handle, index, vrf.header.index).await?;
                    }
                }
                set_link_up(handle, index).await
            }
            IntentSpec::BridgePort(spec) => {
                let message = Self::with_mac(LinkDummy::new(id).build(), Some(spec.mac));
                let index = ensure_link(handle, id, message).await?;
                // an access port hangs off its single bridge; trunk wiring
                // beyond the first bridge is the vendor modules' business
                if let Some(bridge) = spec.logical_bridges.first() {
                    if let Ok((_, bridge_id)) = Kind::parse_name(bridge) {
                        if let Some(bridge) = find_link(handle, bridge_id).await? {
                            set_controller(handle, index, bridge.header.index).await?;
                        }
                    }
                }
                set_link_up(handle, index).await
            }
            IntentSpec::Interface(spec) => {
                let (mac, prefix) = match &spec.ifinfo {
                    IfInfo::Control(ControlIfSpec { mac, prefix }) => (*mac, *prefix),
                    IfInfo::Loopback => (None, None),
                };
                let message = Self::with_mac(LinkDummy::new(id).build(), mac);
                let index = ensure_link(handle, id, message).await?;
                if let Some(prefix) = prefix {
                    add_address(handle, index, prefix.addr.into(), prefix.len).await?;
                }
                set_link_up(handle, index).await
            }
        }
    }
}

#[async_trait]
impl Subscriber for GenLinuxModule {
    fn name(&self) -> &'static str {
        "gen_linux"
    }

    async fn handle(&self, event: &Event) -> Outcome {
        let record = match self.db.get(&event.name) {
            Ok(record) => record,
            Err(_) => {
                debug!("'{}' is gone; nothing to do in the kernel", event.name);
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

        let id = match Kind::parse_name(&record.name) {
            Ok((_, id)) => id.to_owned(),
            Err(e) => return Outcome::Failed(Severity::Permanent, e.to_string()),
        };

        if event.op == EventKind::Delete {
            return match remove_link(&self.handle, &id).await {
                Ok(()) => Outcome::Done,
                Err(e) => {
                    warn!("Teardown of link '{id}' failed: {e}");
                    Outcome::Failed(Severity::Transient, e.to_string())
                }
            };
        }

        if let Some(dep) = self.blocking_dep(&record) {
            debug!("'{}' waits for '{dep}' in the kernel", event.name);
            return Outcome::Pending(Some(dep));
        }
        match self.apply(&id, &record).await {
            Ok(()) => Outcome::Done,
            Err(e) => {
                warn!("Kernel apply for '{}' v{} failed: {e}", event.name, event.version);
                Outcome::Failed(Severity::Transient, e.to_string())
            }
        }
    }
}
