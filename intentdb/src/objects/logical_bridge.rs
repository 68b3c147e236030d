// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Intent model: logical bridge (an L2 broadcast domain)

use crate::errors::{ApiError, ApiResult};
use crate::objects::types::Vni;
use serde::{Deserialize, Serialize};

/// Desired state of a logical bridge. Realized as a kernel bridge; with a VNI
/// set, the domain is stretched across the fabric as an L2 EVPN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogicalBridgeSpec {
    pub vlan_id: u16,     /* VLAN tag of the domain, 1..=4094 */
    pub vni: Option<Vni>, /* L2 VNI, when stretched */
}

impl LogicalBridgeSpec {
    pub fn validate(&self) -> ApiResult<()> {
        if self.vlan_id == 0 || self.vlan_id > 4094 {
            return Err(ApiError::InvalidArgument(format!(
                "'{}' is not a valid VLAN id",
                self.vlan_id
            )));
        }
        if let Some(vni) = self.vni {
            Vni::new_checked(vni.as_u32())?;
        }
        Ok(())
    }

    /// A logical bridge references no other intent.
    pub(crate) fn refs(&self) -> Vec<String> {
        vec![]
    }
}
