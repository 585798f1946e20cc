//! Ordered construction and teardown of VPCs, subnets and peering links
//!
//! Creation runs in abort mode: the first failing step ends the operation
//! and nothing already applied is rolled back. Teardown runs in continue
//! mode, except for deleting the bridge itself.

pub mod steps;

pub use steps::{StepLog, StepRecord, StepStatus};

use crate::error::{Error, Result};
use crate::firewall::{self, Firewall, Visibility};
use crate::kernel::{KernelState, Runner};
use crate::naming;
use crate::network::{Bridge, Namespace, SubnetAddressing, VethPair, ip, link};
use ipnet::Ipv4Net;

/// How a delete ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The bridge was absent
    NothingToDelete,
    /// The bridge was deleted; check the log for best-effort failures
    Removed,
}

/// Topology Mutator
pub struct Topology<'a> {
    runner: &'a dyn Runner,
}

impl<'a> Topology<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    fn state(&self) -> KernelState<'a> {
        KernelState::new(self.runner)
    }

    fn open_vpc(&self, vpc: &str) -> Result<Bridge<'a>> {
        Bridge::open(self.runner, &naming::vpc_bridge(vpc)).map_err(|e| match e {
            Error::NotFound { .. } => Error::not_found("VPC", vpc),
            other => other,
        })
    }

    /// Create `br-<name>` carrying `cidr` exactly as supplied
    pub fn create_vpc(&self, name: &str, cidr: &Ipv4Net, log: &mut StepLog) -> Result<()> {
        naming::validate_vpc_name(name)?;
        let bridge_name = naming::vpc_bridge(name);

        if Bridge::exists(self.runner, &bridge_name)? {
            return Err(Error::already_exists("VPC", name));
        }

        if cidr.prefix_len() < 31 && cidr.addr() == cidr.network() {
            tracing::warn!(
                vpc = %name,
                cidr = %cidr,
                "VPC gateway is the network address; pass the gateway, e.g. {}",
                ip::first_usable_host(cidr).map(|gw| gw.to_string()).unwrap_or_default()
            );
        }

        let bridge = log.run(format!("create bridge {}", bridge_name), || {
            Bridge::create(self.runner, &bridge_name)
        })?;
        log.run(format!("assign {} to {}", cidr, bridge_name), || {
            bridge.add_address(cidr)
        })?;
        log.run(format!("bring up {}", bridge_name), || bridge.up())?;

        Ok(())
    }

    /// Attach a new subnet namespace to a VPC
    pub fn add_subnet(
        &self,
        vpc: &str,
        name: &str,
        cidr: &Ipv4Net,
        visibility: Visibility,
        log: &mut StepLog,
    ) -> Result<()> {
        naming::validate_vpc_name(vpc)?;
        naming::validate_subnet_name(name)?;
        let addressing = SubnetAddressing::for_cidr(cidr)?;

        let bridge = self.open_vpc(vpc)?;
        let netns = naming::subnet_namespace(name);
        if self.state().namespace_exists(netns)? {
            return Err(Error::already_exists("subnet", name));
        }

        let vpc_cidr = bridge.cidr()?;
        let vpc_gateway = vpc_cidr.addr();
        let vpc_net = vpc_cidr.trunc();
        if !vpc_net.contains(&addressing.network) {
            tracing::warn!(
                vpc = %vpc,
                subnet = %name,
                "{} is outside the VPC network {}",
                addressing.network,
                vpc_net
            );
        }

        let ns = log.run(format!("create namespace {}", netns), || {
            Namespace::create(self.runner, netns)
        })?;
        let pair = log.run(
            format!(
                "create veth pair {} / {}",
                naming::subnet_veth(name),
                naming::subnet_bridge_port(name)
            ),
            || VethPair::create_for_subnet(self.runner, name),
        )?;
        let (port, veth) = (pair.host_side(), pair.peer_side());

        log.run(format!("move {} into namespace {}", veth, netns), || {
            pair.move_peer_to_netns(netns)
        })?;
        log.run(format!("attach {} to {}", port, bridge.name()), || {
            bridge.add_member(port)
        })?;
        log.run(format!("bring up {}", port), || {
            link::set_interface_up(self.runner, port)
        })?;
        log.run(format!("bring up {}", bridge.name()), || bridge.up())?;
        log.run(
            format!(
                "assign subnet gateway {} to {}",
                addressing.gateway_cidr(),
                bridge.name()
            ),
            || bridge.add_address(&addressing.gateway_cidr()),
        )?;
        log.run(
            format!("assign {} to {}", addressing.endpoint_cidr(), veth),
            || ns.add_address(veth, &addressing.endpoint_cidr()),
        )?;
        log.run(format!("bring up {}", veth), || ns.link_up(veth))?;
        log.run(format!("bring up lo in {}", netns), || ns.link_up("lo"))?;
        log.run(format!("route to VPC gateway {}", vpc_gateway), || {
            ns.add_host_route(vpc_gateway, veth)
        })?;
        log.run(format!("default route via {}", vpc_gateway), || {
            ns.set_default_route(vpc_gateway)
        })?;

        Firewall::new(self.runner).apply_subnet_shape(
            vpc,
            &addressing.network,
            &vpc_net,
            visibility,
            log,
        )
    }

    /// Join two VPCs with a veth pair and routes
    ///
    /// Only subnets present now get routes to the peer network; subnets
    /// added later are not routed.
    pub fn peer_vpcs(&self, vpc_a: &str, vpc_b: &str, log: &mut StepLog) -> Result<()> {
        naming::validate_vpc_name(vpc_a)?;
        naming::validate_vpc_name(vpc_b)?;
        if vpc_a == vpc_b {
            return Err(Error::InvalidName {
                name: vpc_a.to_string(),
                reason: "a VPC cannot be peered with itself".to_string(),
            });
        }

        let bridge_a = self.open_vpc(vpc_a)?;
        let bridge_b = self.open_vpc(vpc_b)?;
        let net_a = bridge_a.cidr()?.trunc();
        let net_b = bridge_b.cidr()?.trunc();

        let pair = log.run(
            format!(
                "create veth pair {} / {}",
                naming::peering_veth(vpc_a),
                naming::peering_veth(vpc_b)
            ),
            || VethPair::create_for_peering(self.runner, vpc_a, vpc_b),
        )?;
        let (end_a, end_b) = (pair.host_side(), pair.peer_side());

        log.run(format!("attach {} to {}", end_a, bridge_a.name()), || {
            bridge_a.add_member(end_a)
        })?;
        log.run(format!("attach {} to {}", end_b, bridge_b.name()), || {
            bridge_b.add_member(end_b)
        })?;
        for end in [end_a, end_b] {
            log.run(format!("bring up {}", end), || {
                link::set_interface_up(self.runner, end)
            })?;
        }

        let (addr_a, addr_b) = ip::peering_pair();
        for (end, addr) in [(end_a, addr_a), (end_b, addr_b)] {
            log.run(format!("assign {} to {}", addr, end), || {
                link::add_ipv4_address(self.runner, end, &addr)
            })?;
        }

        for (dest, via, dev) in [(net_b, addr_b, end_a), (net_a, addr_a, end_b)] {
            log.run(format!("route {} via {}", dest, via.addr()), || {
                link::replace_route(self.runner, &dest, via.addr(), dev)
            })?;
        }

        let firewall = Firewall::new(self.runner);
        for rule in firewall::isolation_rules(&net_a, &net_b) {
            log.attempt(format!("remove isolation rule: {}", rule), || {
                firewall.remove(&rule)
            });
        }
        for rule in firewall::peering_rules(vpc_a, vpc_b) {
            log.run(format!("accept rule: {}", rule), || firewall.ensure(&rule))?;
        }

        let state = self.state();
        for (vpc, peer_net) in [(vpc_a, net_b), (vpc_b, net_a)] {
            for subnet in state.subnets_of_vpc(vpc, true)? {
                let gateway = log.run(format!("read gateway of subnet {}", subnet.name), || {
                    state.subnet_gateway_address(&subnet.name)
                })?;
                let ns = Namespace::attach(self.runner, naming::subnet_namespace(&subnet.name));
                let veth = naming::subnet_veth(&subnet.name);

                log.run(
                    format!("route {} via {} in {}", peer_net, gateway, ns.name()),
                    || ns.replace_route(&peer_net, gateway, &veth),
                )?;
            }
        }

        Ok(())
    }

    /// Remove a VPC, its subnets, its peering link and its host rules
    pub fn delete_vpc(&self, name: &str, log: &mut StepLog) -> Result<Teardown> {
        naming::validate_vpc_name(name)?;
        let bridge_name = naming::vpc_bridge(name);
        if !Bridge::exists(self.runner, &bridge_name)? {
            return Ok(Teardown::NothingToDelete);
        }
        let bridge = Bridge::open(self.runner, &bridge_name)?;
        let state = self.state();

        let vpc_net = match bridge.cidr() {
            Ok(cidr) => Some(cidr.trunc()),
            Err(e) => {
                tracing::warn!(
                    vpc = %name,
                    error = %e,
                    "VPC network unknown, matching rules by tag and bridge only"
                );
                None
            }
        };

        let subnets = log
            .attempt("enumerate subnets", || state.subnets_of_vpc(name, true))
            .unwrap_or_default();

        for subnet in &subnets {
            let port = naming::subnet_bridge_port(&subnet.name);
            log.attempt(format!("delete {}", port), || {
                link::destroy_interface(self.runner, &port)
            });

            let netns = naming::subnet_namespace(&subnet.name);
            log.attempt(format!("delete namespace {}", netns), || {
                Namespace::attach(self.runner, netns).delete()
            });
        }

        Firewall::new(self.runner).teardown_vpc(name, vpc_net.as_ref(), log);

        let peer = naming::peering_veth(name);
        if log
            .attempt(format!("look up peering link {}", peer), || {
                state.interface_exists(&peer)
            })
            .unwrap_or(false)
        {
            log.attempt(format!("delete peering link {}", peer), || {
                link::destroy_interface(self.runner, &peer)
            });
        }

        log.run(format!("delete bridge {}", bridge_name), || bridge.destroy())?;

        Ok(Teardown::Removed)
    }
}
