//! Veth pair management
//!
//! Veth pairs connect subnet namespaces to VPC bridges, and VPC bridges to
//! each other for peering. For a subnet one end stays on the host (and is
//! added to the bridge), the other is moved into the namespace.

use crate::error::Result;
use crate::kernel::Runner;
use crate::naming;
use crate::network::link;

/// A veth pair
#[derive(Clone)]
pub struct VethPair<'a> {
    runner: &'a dyn Runner,
    /// End that stays on the host
    host_side: String,
    /// Opposite end (moved into a namespace, or attached to a second bridge)
    peer_side: String,
}

impl<'a> VethPair<'a> {
    /// Create a veth pair with explicit names
    pub fn create(runner: &'a dyn Runner, host_side: &str, peer_side: &str) -> Result<Self> {
        link::create_veth_pair(runner, host_side, peer_side)?;

        Ok(Self {
            runner,
            host_side: host_side.to_string(),
            peer_side: peer_side.to_string(),
        })
    }

    /// Create the `veth-<sub>-br` / `veth-<sub>` pair for a subnet
    pub fn create_for_subnet(runner: &'a dyn Runner, subnet: &str) -> Result<Self> {
        Self::create(
            runner,
            &naming::subnet_bridge_port(subnet),
            &naming::subnet_veth(subnet),
        )
    }

    /// Create the `veth-<a>` / `veth-<b>` pair joining two VPCs
    pub fn create_for_peering(runner: &'a dyn Runner, vpc_a: &str, vpc_b: &str) -> Result<Self> {
        Self::create(runner, &naming::peering_veth(vpc_a), &naming::peering_veth(vpc_b))
    }

    /// Get the host-side interface name
    pub fn host_side(&self) -> &str {
        &self.host_side
    }

    /// Get the peer-side interface name
    pub fn peer_side(&self) -> &str {
        &self.peer_side
    }

    /// Move the peer end into a network namespace
    pub fn move_peer_to_netns(&self, netns: &str) -> Result<()> {
        link::move_to_netns(self.runner, &self.peer_side, netns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::sim::SimHost;

    #[test]
    fn test_subnet_pair_names() {
        let host = SimHost::new();
        let pair = VethPair::create_for_subnet(&host, "web").unwrap();

        assert_eq!(pair.host_side(), "veth-web-br");
        assert_eq!(pair.peer_side(), "veth-web");
        assert!(host.link_exists("veth-web"));
    }

    #[test]
    fn test_move_peer_then_destroy() {
        let host = SimHost::new();
        host.add_namespace_with_address("web", "dummy0", "10.9.9.2/24");
        let pair = VethPair::create_for_subnet(&host, "web").unwrap();
        pair.move_peer_to_netns("web").unwrap();

        assert!(host.link_addrs("veth-web", Some("web")).is_empty());
        assert!(host.commands().contains(&"ip link set veth-web netns web".to_string()));

        link::destroy_interface(&host, pair.host_side()).unwrap();
        assert!(!host.link_exists("veth-web"));
        assert!(!host.link_exists("veth-web-br"));
    }

    #[test]
    fn test_peering_pair_names() {
        let host = SimHost::new();
        let pair = VethPair::create_for_peering(&host, "prod", "dev").unwrap();
        assert_eq!(pair.host_side(), "veth-prod");
        assert_eq!(pair.peer_side(), "veth-dev");
    }
}
