// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub(crate) use clap::Parser;
use modules::frr::{DEFAULT_AGENT_PATH, DEFAULT_ASN};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "evpn-gateway")]
#[command(about = "EVPN gateway control plane", long_about = None)]
pub(crate) struct CmdArgs {
    #[arg(long, value_name = "directory", default_value = "/var/lib/evpn-gateway/db")]
    pub db: PathBuf,

    #[arg(long, value_name = "path", default_value = "/var/run/evpn-gateway/api.sock")]
    pub api_sock: PathBuf,

    /// Serve the management API on TCP instead of the unix socket.
    #[arg(long, value_name = "addr:port")]
    pub api_addr: Option<SocketAddr>,

    #[arg(long, value_name = "path", default_value = DEFAULT_AGENT_PATH)]
    pub frr_agent: PathBuf,

    #[arg(long, value_name = "asn", default_value_t = DEFAULT_ASN)]
    pub asn: u32,

    /// Run without the FRR module (development hosts).
    #[arg(long, default_value_t = false)]
    pub no_frr: bool,

    /// Run without the generic Linux module (development hosts).
    #[arg(long, default_value_t = false)]
    pub no_genlinux: bool,

    #[arg(long, value_name = "level", default_value = "info")]
    pub log_level: String,
}
