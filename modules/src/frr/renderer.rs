// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Render intent objects into FRR configuration for frr-reload.
//!
//! A config is a sequence of stanzas (a vrf block, a router-bgp block, an
//! interface block). Stanza separation with `!` marker lines is part of the
//! output format, so it lives in the [`Display`] impl rather than in the
//! hands of every renderer.

use intentdb::objects::{IntentRecord, IntentSpec};
use intentdb::subscribe::EventKind;
use std::fmt::Display;

/// One configuration block: a header line plus its indented body.
#[derive(Debug)]
pub(crate) struct Stanza {
    lines: Vec<String>,
}

impl Stanza {
    fn new(header: impl Into<String>) -> Self {
        Self {
            lines: vec![header.into()],
        }
    }
    fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }
}

/// A rendered FRR configuration.
#[derive(Debug, Default)]
pub struct FrrConfig {
    stanzas: Vec<Stanza>,
}

impl FrrConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_empty(&self) -> bool {
        self.stanzas.is_empty()
    }
    fn push(&mut self, stanza: Stanza) {
        self.stanzas.push(stanza);
    }
}

/// Every stanza is preceded by a `!` marker; a non-empty config carries one
/// closing marker. An empty config renders as nothing at all.
impl Display for FrrConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.stanzas.is_empty() {
            return Ok(());
        }
        for stanza in &self.stanzas {
            writeln!(f, "!")?;
            for line in &stanza.lines {
                writeln!(f, "{line}")?;
            }
        }
        writeln!(f, "!")
    }
}

/// Rendering context: the short id the object goes by on the gateway, the
/// local AS and whether we are building or tearing down.
pub struct RenderCtx {
    pub id: String,
    pub asn: u32,
    pub op: EventKind,
}

/// Build the FRR config for one object.
pub(crate) trait Render {
    fn render(&self, ctx: &RenderCtx) -> FrrConfig;
}

impl Render for IntentRecord {
    fn render(&self, ctx: &RenderCtx) -> FrrConfig {
        match &self.spec {
            IntentSpec::Vpc(spec) => spec.render(ctx),
            IntentSpec::Subnet(spec) => spec.render(ctx),
            IntentSpec::LogicalBridge(spec) => spec.render(ctx),
            // ports and interfaces carry no FRR-side state
            IntentSpec::BridgePort(_) | IntentSpec::Interface(_) => FrrConfig::new(),
        }
    }
}

impl Render for intentdb::objects::VpcSpec {
    fn render(&self, ctx: &RenderCtx) -> FrrConfig {
        let mut cfg = FrrConfig::new();
        if ctx.op == EventKind::Delete {
            cfg.push(Stanza::new(format!("no router bgp {} vrf {}", ctx.asn, ctx.id)));
            cfg.push(Stanza::new(format!("no vrf {}", ctx.id)));
            return cfg;
        }

        let mut vrf = Stanza::new(format!("vrf {}", ctx.id));
        if let Some(vni) = &self.vni {
            vrf = vrf.line(format!(" vni {vni}"));
        }
        cfg.push(vrf.line("exit-vrf"));

        let mut bgp = Stanza::new(format!("router bgp {} vrf {}", ctx.asn, ctx.id))
            .line(" address-family ipv4 unicast")
            .line("  redistribute connected")
            .line(" exit-address-family");
        if self.vni.is_some() {
            bgp = bgp
                .line(" address-family l2vpn evpn")
                .line("  advertise ipv4 unicast")
                .line(" exit-address-family");
        }
        cfg.push(bgp.line("exit"));
        cfg
    }
}

impl Render for intentdb::objects::SubnetSpec {
    fn render(&self, ctx: &RenderCtx) -> FrrConfig {
        let mut cfg = FrrConfig::new();
        if ctx.op == EventKind::Delete {
            cfg.push(Stanza::new(format!("no interface {}", ctx.id)));
            return cfg;
        }
        let mut svi = Stanza::new(format!("interface {}", ctx.id));
        if let Some(prefix) = &self.prefix {
            svi = svi.line(format!(" ip address {prefix}"));
        }
        cfg.push(svi.line("exit"));
        cfg
    }
}

impl Render for intentdb::objects::LogicalBridgeSpec {
    fn render(&self, ctx: &RenderCtx) -> FrrConfig {
        let mut cfg = FrrConfig::new();
        // only stretched domains show up in the EVPN address family
        let Some(vni) = &self.vni else {
            return cfg;
        };
        let mut bgp =
            Stanza::new(format!("router bgp {}", ctx.asn)).line(" address-family l2vpn evpn");
        if ctx.op == EventKind::Delete {
            bgp = bgp.line(format!("  no vni {vni}"));
        } else {
            bgp = bgp
                .line(format!("  vni {vni}"))
                .line("   rd auto")
                .line("   route-target import auto")
                .line("   route-target export auto")
                .line("  exit-vni");
        }
        cfg.push(bgp.line(" exit-address-family").line("exit"));
        cfg
    }
}
