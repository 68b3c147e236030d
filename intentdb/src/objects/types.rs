// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Small value types shared by the intent specs.

use crate::errors::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A VxLAN network identifier; 24 bits on the wire.
#[derive(
    Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Vni(u32);

impl Vni {
    pub const MAX: u32 = (1 << 24) - 1;

    pub fn new_checked(vni: u32) -> Result<Self, ApiError> {
        if vni == 0 || vni > Self::MAX {
            return Err(ApiError::InvalidArgument(format!("'{vni}' is not a valid VNI")));
        }
        Ok(Self(vni))
    }
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Display for Vni {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An Ethernet address.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Mac([u8; 6]);

impl Mac {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for Mac {
    type Err = ApiError;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bad = || ApiError::InvalidArgument(format!("'{value}' is not a valid MAC address"));
        let mut octets = [0u8; 6];
        let mut parts = value.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(bad)?;
            if part.len() != 2 {
                return Err(bad());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self(octets))
    }
}

impl Serialize for Mac {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Mac {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = String::deserialize(deserializer)?;
        repr.parse().map_err(serde::de::Error::custom)
    }
}

/// An IPv4 prefix, used for SVI and control-interface addressing.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Ipv4Prefix {
    pub addr: Ipv4Addr,
    pub len: u8,
}

impl Ipv4Prefix {
    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, ApiError> {
        if len > 32 {
            return Err(ApiError::InvalidArgument(format!(
                "'/{len}' is not a valid IPv4 prefix length"
            )));
        }
        Ok(Self { addr, len })
    }
    pub fn validate(&self) -> Result<(), ApiError> {
        Self::new(self.addr, self.len).map(|_| ())
    }
}

impl Display for Ipv4Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}
