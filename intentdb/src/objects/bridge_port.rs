// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Intent model: bridge port

use crate::errors::{ApiError, ApiResult};
use crate::objects::Kind;
use crate::objects::types::Mac;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a port participates in its logical bridges.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Access, /* untagged member of exactly one bridge */
    Trunk,  /* tagged member of any number of bridges */
}

/// Desired state of a bridge port: a MAC-identified port attached to one or
/// more logical bridges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgePortSpec {
    pub mac: Mac,
    pub ptype: PortType,
    pub logical_bridges: Vec<String>, /* resource names */
}

impl BridgePortSpec {
    pub fn validate(&self) -> ApiResult<()> {
        if self.ptype == PortType::Access && self.logical_bridges.len() != 1 {
            return Err(ApiError::InvalidArgument(format!(
                "an access port must reference exactly one logical bridge, got {}",
                self.logical_bridges.len()
            )));
        }
        if self.logical_bridges.is_empty() {
            return Err(ApiError::InvalidArgument(
                "a bridge port must reference at least one logical bridge".to_owned(),
            ));
        }
        let mut seen = BTreeSet::new();
        for bridge in &self.logical_bridges {
            if !bridge.starts_with(&Kind::LogicalBridge.name_prefix()) {
                return Err(ApiError::InvalidArgument(format!(
                    "'{bridge}' is not a logical-bridge resource name"
                )));
            }
            if !seen.insert(bridge) {
                return Err(ApiError::InvalidArgument(format!(
                    "logical bridge '{bridge}' referenced twice"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn refs(&self) -> Vec<String> {
        self.logical_bridges.clone()
    }
}
