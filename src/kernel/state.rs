//! Read-only view of the live kernel network state
//!
//! Every query goes to the kernel; nothing is cached between calls because
//! the topology may be changed out-of-band at any time.

use crate::error::{Error, Result};
use crate::kernel::parse::{self, AddrEntry, RuleEntry};
use crate::kernel::{KernelCommand, Runner};
use crate::naming;
use crate::network::ip;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// A subnet discovered as a port of a VPC bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetEntry {
    pub name: String,
    /// Namespace addresses; left empty by a quiet lookup
    pub addresses: Vec<Ipv4Net>,
}

/// Kernel State Reader
pub struct KernelState<'a> {
    runner: &'a dyn Runner,
}

impl<'a> KernelState<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Enumerate network namespaces
    pub fn list_namespaces(&self) -> Result<BTreeSet<String>> {
        let out = self
            .runner
            .run_checked(&KernelCommand::ip(["netns", "list"]))?;
        Ok(parse::parse_netns(&out.stdout).into_iter().collect())
    }

    /// Whether a namespace exists
    pub fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_namespaces()?.contains(name))
    }

    /// IPv4 addresses inside a namespace, loopback excluded
    pub fn namespace_addresses(&self, ns: &str) -> Result<Vec<AddrEntry>> {
        let cmd = KernelCommand::ip(["-4", "-o", "addr", "show"]).in_netns(ns);
        let out = self.runner.run_checked(&cmd)?;
        Ok(parse::parse_addrs(&out.stdout)
            .into_iter()
            .filter(|entry| !entry.is_loopback())
            .collect())
    }

    /// Find the namespace whose interface address lies in exactly `cidr`'s network
    ///
    /// Both sides are normalized to their network before comparing, so
    /// `10.0.1.0/24` matches an interface carrying `10.0.1.2/24` but not one
    /// carrying `10.0.1.2/25`.
    pub fn namespace_has_address(&self, cidr: &Ipv4Net) -> Result<Option<String>> {
        let target = cidr.trunc();

        for ns in self.list_namespaces()? {
            let addrs = match self.namespace_addresses(&ns) {
                Ok(addrs) => addrs,
                Err(e) => {
                    tracing::warn!(namespace = %ns, error = %e, "skipping unreadable namespace");
                    continue;
                }
            };

            if addrs.iter().any(|entry| entry.addr.trunc() == target) {
                return Ok(Some(ns));
            }
        }

        Ok(None)
    }

    /// Whether an interface exists on the host
    pub fn interface_exists(&self, name: &str) -> Result<bool> {
        let out = self
            .runner
            .run(&KernelCommand::ip(["link", "show", "dev", name]))?;
        Ok(out.success())
    }

    /// First IPv4 address configured on a bridge
    pub fn bridge_cidr(&self, bridge: &str) -> Result<Ipv4Net> {
        let cmd = KernelCommand::ip(["-4", "addr", "show", "dev", bridge]);
        let out = self.runner.run(&cmd)?;
        if !out.success() {
            return Err(Error::not_found("bridge", bridge));
        }

        parse::parse_addrs(&out.stdout)
            .into_iter()
            .map(|entry| entry.addr)
            .next()
            .ok_or_else(|| Error::not_found("IPv4 address on bridge", bridge))
    }

    /// Gateway address of a bridge, without prefix
    pub fn bridge_gateway_address(&self, bridge: &str) -> Result<Ipv4Addr> {
        Ok(self.bridge_cidr(bridge)?.addr())
    }

    /// Subnets attached to a VPC, in bridge port order
    ///
    /// Membership comes only from `veth-<subnet>-br` ports of `br-<vpc>`.
    /// A missing bridge yields no subnets. With `quiet` the per-subnet
    /// address lookup used for display is skipped.
    pub fn subnets_of_vpc(&self, vpc: &str, quiet: bool) -> Result<Vec<SubnetEntry>> {
        let bridge = naming::vpc_bridge(vpc);
        let out = self
            .runner
            .run(&KernelCommand::ip(["-o", "link", "show", "master", &bridge]))?;
        if !out.success() {
            return Ok(Vec::new());
        }

        let mut subnets = Vec::new();
        for link in parse::parse_links(&out.stdout) {
            let Some(name) = naming::subnet_from_bridge_port(&link.name) else {
                continue;
            };

            let addresses = if quiet {
                Vec::new()
            } else {
                self.namespace_addresses(naming::subnet_namespace(name))
                    .map(|addrs| addrs.into_iter().map(|entry| entry.addr).collect())
                    .unwrap_or_default()
            };

            subnets.push(SubnetEntry {
                name: name.to_string(),
                addresses,
            });
        }

        Ok(subnets)
    }

    /// Gateway of a subnet: first usable host of its namespace address's network
    pub fn subnet_gateway_address(&self, subnet: &str) -> Result<Ipv4Addr> {
        let ns = naming::subnet_namespace(subnet);
        let addrs = self
            .namespace_addresses(ns)
            .map_err(|_| Error::not_found("subnet", subnet))?;

        let entry = addrs
            .first()
            .ok_or_else(|| Error::not_found("IPv4 address in subnet", subnet))?;

        ip::first_usable_host(&entry.addr.trunc())
            .map_err(|_| Error::not_found("usable IPv4 address in subnet", subnet))
    }

    /// VPC names of every `br-<vpc>` bridge on the host
    pub fn list_vpc_bridges(&self) -> Result<BTreeSet<String>> {
        let out = self
            .runner
            .run_checked(&KernelCommand::ip(["-o", "link", "show", "type", "bridge"]))?;

        Ok(parse::parse_links(&out.stdout)
            .iter()
            .filter_map(|link| naming::vpc_from_bridge(&link.name))
            .map(str::to_string)
            .collect())
    }

    /// Rules appended to a host chain (`iptables -t <table> -S <chain>`)
    pub fn firewall_rules(&self, table: &str, chain: &str) -> Result<Vec<RuleEntry>> {
        let out = self
            .runner
            .run_checked(&KernelCommand::iptables(["-t", table, "-S", chain]))?;
        Ok(parse::parse_rules(&out.stdout))
    }

    /// Whether a host rule already exists (`iptables -C`)
    pub fn rule_exists(&self, table: &str, chain: &str, spec: &[String]) -> Result<bool> {
        let mut args = vec![
            "-t".to_string(),
            table.to_string(),
            "-C".to_string(),
            chain.to_string(),
        ];
        args.extend(spec.iter().cloned());
        Ok(self.runner.run(&KernelCommand::iptables(args))?.success())
    }
}
