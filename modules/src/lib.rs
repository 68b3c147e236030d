// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The subsystem modules: subscribers that realize intent against FRR and
//! the generic Linux networking stack.

/* BGP-EVPN control plane via frr-agent */
pub mod frr;

/* kernel links, bridges and addresses via netlink */
pub mod genlinux;
