// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Intent model: subnet (an SVI of a VPC)

use crate::errors::{ApiError, ApiResult};
use crate::objects::Kind;
use crate::objects::types::{Ipv4Prefix, Mac};
use serde::{Deserialize, Serialize};

/// Desired state of a subnet. Realized as an SVI: a kernel bridge carrying
/// the virtual-router address inside the owning VPC's VRF.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub vpc: String,                   /* resource name of the owning VPC */
    pub virtual_router_mac: Option<Mac>,
    pub prefix: Option<Ipv4Prefix>,    /* virtual-router address */
}

impl SubnetSpec {
    pub fn validate(&self) -> ApiResult<()> {
        if !self.vpc.starts_with(&Kind::Vpc.name_prefix()) {
            return Err(ApiError::InvalidArgument(format!(
                "'{}' is not a VPC resource name",
                self.vpc
            )));
        }
        if let Some(prefix) = &self.prefix {
            prefix.validate()?;
        }
        Ok(())
    }

    pub(crate) fn refs(&self) -> Vec<String> {
        vec![self.vpc.clone()]
    }
}
