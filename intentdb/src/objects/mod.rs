// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The intent objects: kinds, specs and the stored record envelope.

pub mod bridge_port;
pub mod iface;
pub mod logical_bridge;
pub mod subnet;
pub mod types;
pub mod vpc;

pub use bridge_port::{BridgePortSpec, PortType};
pub use iface::{ControlIfSpec, IfInfo, InterfaceSpec};
pub use logical_bridge::LogicalBridgeSpec;
pub use subnet::SubnetSpec;
pub use types::{Ipv4Prefix, Mac, Vni};
pub use vpc::VpcSpec;

use crate::errors::{ApiError, ApiResult};
use crate::status::{StageStatus, StatusVector};
use objstore::Versioned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

const NAME_DOMAIN: &str = "//network.opiproject.org";

/// The kinds of intent objects the gateway realizes.
#[derive(
    Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Vpc,
    Subnet,
    Interface,
    BridgePort,
    LogicalBridge,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::Vpc,
        Kind::Subnet,
        Kind::Interface,
        Kind::BridgePort,
        Kind::LogicalBridge,
    ];

    /// The collection segment of resource names of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            Kind::Vpc => "vpcs",
            Kind::Subnet => "subnets",
            Kind::Interface => "interfaces",
            Kind::BridgePort => "bridgeports",
            Kind::LogicalBridge => "logicalbridges",
        }
    }

    /// Common prefix of all resource names of this kind.
    pub fn name_prefix(&self) -> String {
        format!("{NAME_DOMAIN}/{}/", self.collection())
    }

    /// Full resource name for an id of this kind.
    pub fn resource_name(&self, id: &str) -> String {
        format!("{}{id}", self.name_prefix())
    }

    /// Split a resource name into its kind and id.
    pub fn parse_name(name: &str) -> ApiResult<(Kind, &str)> {
        for kind in Kind::ALL {
            if let Some(id) = name.strip_prefix(&kind.name_prefix()) {
                if id.is_empty() || id.contains('/') {
                    break;
                }
                return Ok((kind, id));
            }
        }
        Err(ApiError::InvalidArgument(format!(
            "'{name}' is not a resource name"
        )))
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Vpc => write!(f, "vpc"),
            Kind::Subnet => write!(f, "subnet"),
            Kind::Interface => write!(f, "interface"),
            Kind::BridgePort => write!(f, "bridge-port"),
            Kind::LogicalBridge => write!(f, "logical-bridge"),
        }
    }
}

/// The kind-specific part of an intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSpec {
    Vpc(VpcSpec),
    Subnet(SubnetSpec),
    Interface(InterfaceSpec),
    BridgePort(BridgePortSpec),
    LogicalBridge(LogicalBridgeSpec),
}

impl IntentSpec {
    pub fn kind(&self) -> Kind {
        match self {
            IntentSpec::Vpc(_) => Kind::Vpc,
            IntentSpec::Subnet(_) => Kind::Subnet,
            IntentSpec::Interface(_) => Kind::Interface,
            IntentSpec::BridgePort(_) => Kind::BridgePort,
            IntentSpec::LogicalBridge(_) => Kind::LogicalBridge,
        }
    }

    /// Spec-internal validation; reference existence is the database's call.
    pub fn validate(&self) -> ApiResult<()> {
        match self {
            IntentSpec::Vpc(spec) => spec.validate(),
            IntentSpec::Subnet(spec) => spec.validate(),
            IntentSpec::Interface(spec) => spec.validate(),
            IntentSpec::BridgePort(spec) => spec.validate(),
            IntentSpec::LogicalBridge(spec) => spec.validate(),
        }
    }

    /// Outbound references of this spec, as resource names.
    pub fn refs(&self) -> Vec<String> {
        match self {
            IntentSpec::Vpc(spec) => spec.refs(),
            IntentSpec::Subnet(spec) => spec.refs(),
            IntentSpec::Interface(spec) => spec.refs(),
            IntentSpec::BridgePort(spec) => spec.refs(),
            IntentSpec::LogicalBridge(spec) => spec.refs(),
        }
    }
}

/// The stored form of an intent: spec plus realization bookkeeping. This is
/// what goes into the object store and what readers get back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub name: String,
    pub kind: Kind,
    pub version: u64,
    pub spec: IntentSpec,
    pub refs: Vec<String>,
    pub status: StatusVector,
    pub deleting: bool,
}

impl IntentRecord {
    /// An intent is realized once every registered stage is done at the
    /// current version (and it is not being torn down).
    pub fn realized(&self) -> bool {
        !self.deleting && self.status.values().all(|s| *s == StageStatus::Done)
    }

    pub fn stage_done(&self, stage: crate::status::Stage) -> bool {
        self.status.get(&stage) == Some(&StageStatus::Done)
    }
}

impl Versioned for IntentRecord {
    fn version(&self) -> u64 {
        self.version
    }
}
