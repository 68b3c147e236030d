// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The wire model of the management API. Stands in for the externally
//! supplied schema: per-kind CRUD requests, records and a fixed set of
//! status codes.

use intentdb::objects::{IntentRecord, IntentSpec, Kind};
use intentdb::{ApiError, ApiResult};
use rand::Rng as _;
use serde::{Deserialize, Serialize};

pub const MAX_RESOURCE_ID_LEN: usize = 63;

/// Status codes of the management API, stable across client languages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Aborted,
    Unimplemented,
    Internal,
}

/// A failed call: code plus human-readable message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApiStatus {
    pub code: StatusCode,
    pub message: String,
}

impl From<ApiError> for ApiStatus {
    fn from(error: ApiError) -> Self {
        let code = match &error {
            ApiError::InvalidArgument(_) => StatusCode::InvalidArgument,
            ApiError::NotFound(_) => StatusCode::NotFound,
            ApiError::AlreadyExists(_) => StatusCode::AlreadyExists,
            ApiError::FailedPrecondition(_) => StatusCode::FailedPrecondition,
            ApiError::Aborted(_) => StatusCode::Aborted,
            ApiError::Unimplemented(_) => StatusCode::Unimplemented,
            ApiError::Internal(_) => StatusCode::Internal,
        };
        Self {
            code,
            message: error.to_string(),
        }
    }
}

/// A request to the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Create {
        kind: Kind,
        /// Client-chosen id; the server generates one when absent.
        id: Option<String>,
        spec: IntentSpec,
    },
    Get {
        name: String,
    },
    List {
        kind: Kind,
    },
    Update {
        name: String,
        spec: IntentSpec,
        /// Field paths to merge; empty replaces the whole spec.
        update_mask: Vec<String>,
        /// When set, updating an absent object creates it instead.
        allow_missing: bool,
    },
    Delete {
        name: String,
        /// When set, deleting an absent object succeeds.
        allow_missing: bool,
    },
}

/// The gateway's answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Record(IntentRecord),
    Records(Vec<IntentRecord>),
    Empty,
    Error(ApiStatus),
}

/// Check a client-supplied resource id: lowercase alphanumerics and hyphens,
/// starting with a letter, not ending with a hyphen, at most 63 characters.
pub fn validate_resource_id(id: &str) -> ApiResult<()> {
    let bad = |why: &str| {
        Err(ApiError::InvalidArgument(format!(
            "invalid resource id '{id}': {why}"
        )))
    };
    if id.is_empty() || id.len() > MAX_RESOURCE_ID_LEN {
        return bad("must be between 1 and 63 characters");
    }
    if !id.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        return bad("must start with a lowercase letter");
    }
    if id.ends_with('-') {
        return bad("must not end with a hyphen");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return bad("only lowercase letters, digits and hyphens are allowed");
    }
    Ok(())
}

/// Mint an id for a request that did not bring one.
pub fn generate_resource_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let mut id = String::with_capacity(9);
    id.push(char::from(ALPHABET[rng.random_range(0..26)]));
    for _ in 0..8 {
        id.push(char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]));
    }
    id
}

/// Merge the masked fields of `incoming` into `current`. An empty mask
/// replaces the spec wholesale. Paths are validated against the kind's
/// fields before anything is touched.
pub fn merge_masked(
    current: &IntentSpec,
    incoming: &IntentSpec,
    mask: &[String],
) -> ApiResult<IntentSpec> {
    if current.kind() != incoming.kind() {
        return Err(ApiError::InvalidArgument(format!(
            "update spec is a {}, target is a {}",
            incoming.kind(),
            current.kind()
        )));
    }
    if mask.is_empty() {
        return Ok(incoming.clone());
    }

    let unknown = |path: &str, kind: Kind| {
        Err(ApiError::InvalidArgument(format!(
            "unknown field path '{path}' for {kind}"
        )))
    };
    let mut merged = current.clone();
    match (&mut merged, incoming) {
        (IntentSpec::Vpc(cur), IntentSpec::Vpc(new)) => {
            for path in mask {
                match path.as_str() {
                    "route_table" => cur.route_table = new.route_table,
                    "vni" => cur.vni = new.vni,
                    "loopback" => cur.loopback = new.loopback,
                    _ => return unknown(path, Kind::Vpc),
                }
            }
        }
        (IntentSpec::Subnet(cur), IntentSpec::Subnet(new)) => {
            for path in mask {
                match path.as_str() {
                    "vpc" => cur.vpc = new.vpc.clone(),
                    "virtual_router_mac" => cur.virtual_router_mac = new.virtual_router_mac,
                    "prefix" => cur.prefix = new.prefix,
                    _ => return unknown(path, Kind::Subnet),
                }
            }
        }
        (IntentSpec::Interface(cur), IntentSpec::Interface(new)) => {
            for path in mask {
                match path.as_str() {
                    "subnet" => cur.subnet = new.subnet.clone(),
                    "ifinfo" => cur.ifinfo = new.ifinfo.clone(),
                    _ => return unknown(path, Kind::Interface),
                }
            }
        }
        (IntentSpec::BridgePort(cur), IntentSpec::BridgePort(new)) => {
            for path in mask {
                match path.as_str() {
                    "mac" => cur.mac = new.mac,
                    "ptype" => cur.ptype = new.ptype,
                    "logical_bridges" => cur.logical_bridges = new.logical_bridges.clone(),
                    _ => return unknown(path, Kind::BridgePort),
                }
            }
        }
        (IntentSpec::LogicalBridge(cur), IntentSpec::LogicalBridge(new)) => {
            for path in mask {
                match path.as_str() {
                    "vlan_id" => cur.vlan_id = new.vlan_id,
                    "vni" => cur.vni = new.vni,
                    _ => return unknown(path, Kind::LogicalBridge),
                }
            }
        }
        // kinds already checked equal above
        _ => unreachable!(),
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentdb::objects::{Vni, VpcSpec};

    #[test]
    fn resource_id_rules() {
        assert!(validate_resource_id("blue").is_ok());
        assert!(validate_resource_id("vpc-7a").is_ok());
        assert!(validate_resource_id("").is_err());
        assert!(validate_resource_id("Blue").is_err());
        assert!(validate_resource_id("7blue").is_err());
        assert!(validate_resource_id("blue-").is_err());
        assert!(validate_resource_id("blue_1").is_err());
        assert!(validate_resource_id(&"a".repeat(64)).is_err());
    }

    #[test]
    fn generated_ids_are_valid() {
        for _ in 0..100 {
            validate_resource_id(&generate_resource_id()).unwrap();
        }
    }

    fn vpc(table: u32, vni: Option<u32>) -> IntentSpec {
        IntentSpec::Vpc(VpcSpec {
            route_table: table,
            vni: vni.map(|v| Vni::new_checked(v).unwrap()),
            loopback: None,
        })
    }

    #[test]
    fn empty_mask_replaces() {
        let merged = merge_masked(&vpc(1000, None), &vpc(2000, Some(3000)), &[]).unwrap();
        assert_eq!(merged, vpc(2000, Some(3000)));
    }

    #[test]
    fn mask_merges_only_named_fields() {
        let merged = merge_masked(
            &vpc(1000, None),
            &vpc(2000, Some(3000)),
            &["route_table".to_owned()],
        )
        .unwrap();
        assert_eq!(merged, vpc(2000, None));
    }

    #[test]
    fn unknown_path_is_rejected_before_merging() {
        let err = merge_masked(
            &vpc(1000, None),
            &vpc(2000, None),
            &["tos".to_owned()],
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn mask_against_wrong_kind_is_rejected() {
        let lb = IntentSpec::LogicalBridge(intentdb::objects::LogicalBridgeSpec {
            vlan_id: 100,
            vni: None,
        });
        assert!(merge_masked(&vpc(1000, None), &lb, &[]).is_err());
    }
}
