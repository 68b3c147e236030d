// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Realization stages and the per-intent status vector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// One subsystem's contribution to realizing an intent. Variants are declared
/// in apply order, so the derived `Ord` is the stage priority.
#[derive(
    Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Frr,
    GenLinux,
    VendorLinux,
    VendorDriver,
}

impl Stage {
    /// Priority of this stage; lower applies first.
    pub fn priority(&self) -> u8 {
        match self {
            Stage::Frr => 1,
            Stage::GenLinux => 2,
            Stage::VendorLinux => 3,
            Stage::VendorDriver => 4,
        }
    }
    /// Stable identifier, used in status displays and the wire model.
    pub fn id(&self) -> &'static str {
        match self {
            Stage::Frr => "frr",
            Stage::GenLinux => "gen_linux",
            Stage::VendorLinux => "vendor_linux",
            Stage::VendorDriver => "vendor_driver",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Realization state of a single stage at the intent's current version.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Done,
    Error { reason: String },
}

impl Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Done => write!(f, "done"),
            StageStatus::Error { reason } => write!(f, "error ({reason})"),
        }
    }
}

/// Per-stage realization state of one intent. Keyed by [`Stage`], so
/// iteration follows apply order.
pub type StatusVector = BTreeMap<Stage, StageStatus>;

/// Build the initial status vector for a freshly minted version: every
/// registered stage starts out pending.
pub fn pending_vector(stages: &[Stage]) -> StatusVector {
    stages
        .iter()
        .map(|stage| (*stage, StageStatus::Pending))
        .collect()
}
