// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Intent model: gateway interface

use crate::errors::{ApiError, ApiResult};
use crate::objects::Kind;
use crate::objects::types::{Ipv4Prefix, Mac};
use serde::{Deserialize, Serialize};

/// Addressing of a control interface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlIfSpec {
    pub mac: Option<Mac>,
    pub prefix: Option<Ipv4Prefix>,
}

/// Role-specific part of an interface spec. The wire model is a tagged
/// union; a tag this build does not know is a validation error at decode
/// time, not a crash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfInfo {
    Control(ControlIfSpec),
    Loopback,
}

/// Desired state of a gateway interface, realized as a dummy link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub subnet: Option<String>, /* resource name of the subnet it lives in */
    pub ifinfo: IfInfo,
}

impl InterfaceSpec {
    pub fn validate(&self) -> ApiResult<()> {
        if let Some(subnet) = &self.subnet {
            if !subnet.starts_with(&Kind::Subnet.name_prefix()) {
                return Err(ApiError::InvalidArgument(format!(
                    "'{subnet}' is not a subnet resource name"
                )));
            }
        }
        match &self.ifinfo {
            IfInfo::Control(control) => {
                if let Some(prefix) = &control.prefix {
                    prefix.validate()?;
                }
            }
            IfInfo::Loopback => {}
        }
        Ok(())
    }

    pub(crate) fn refs(&self) -> Vec<String> {
        self.subnet.iter().cloned().collect()
    }
}
