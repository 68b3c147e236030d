// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Intent model: VPC (a VRF on the gateway)

use crate::errors::ApiResult;
use crate::objects::types::{Ipv4Prefix, Vni};
use serde::{Deserialize, Serialize};

/// Desired state of a VPC. Realized as a kernel VRF bound to a route table
/// and, when a VNI is set, announced over BGP EVPN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VpcSpec {
    pub route_table: u32,              /* kernel route table backing the VRF */
    pub vni: Option<Vni>,              /* L3 VNI, when routed across the fabric */
    pub loopback: Option<Ipv4Prefix>,  /* loopback address of the VRF */
}

impl VpcSpec {
    pub fn validate(&self) -> ApiResult<()> {
        if let Some(vni) = self.vni {
            Vni::new_checked(vni.as_u32())?;
        }
        if let Some(loopback) = &self.loopback {
            loopback.validate()?;
        }
        Ok(())
    }

    /// A VPC references no other intent.
    pub(crate) fn refs(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn accepts_plain_vrf() {
        let spec = VpcSpec {
            route_table: 1000,
            vni: None,
            loopback: None,
        };
        assert!(spec.validate().is_ok());
        assert!(spec.refs().is_empty());
    }

    #[test]
    fn accepts_evpn_vrf() {
        let spec = VpcSpec {
            route_table: 1001,
            vni: Some(Vni::new_checked(3000).unwrap()),
            loopback: Some(Ipv4Prefix::new(Ipv4Addr::new(10, 0, 0, 1), 32).unwrap()),
        };
        assert!(spec.validate().is_ok());
    }
}
