//! Address allocation for VPC subnets
//!
//! Provides:
//! - CIDR parsing
//! - Deterministic n-th usable host derivation
//! - Gateway/endpoint addressing for a subnet
//! - The fixed peering link pair

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Narrowest prefix that still leaves a gateway and an endpoint
pub const MAX_SUBNET_PREFIX: u8 = 30;

/// Peering address on the first VPC's end
pub const PEER_ADDR_A: Ipv4Addr = Ipv4Addr::new(192, 168, 255, 1);
/// Peering address on the second VPC's end
pub const PEER_ADDR_B: Ipv4Addr = Ipv4Addr::new(192, 168, 255, 2);
/// Prefix length of the peering link
pub const PEER_PREFIX: u8 = 30;

/// Parse an IPv4 CIDR, keeping host bits as supplied
pub fn parse_cidr(s: &str) -> Result<Ipv4Net> {
    s.trim()
        .parse::<Ipv4Net>()
        .map_err(|e| Error::InvalidCidr(format!("'{}': {}", s, e)))
}

/// First address after the network address (the conventional gateway)
pub fn first_usable_host(cidr: &Ipv4Net) -> Result<Ipv4Addr> {
    nth_usable_host(cidr, 1)
}

/// The n-th usable host of a network, counting from 1
///
/// Network and broadcast addresses are never returned. Prefixes longer
/// than /30 hold fewer than two usable hosts and are rejected.
pub fn nth_usable_host(cidr: &Ipv4Net, n: u32) -> Result<Ipv4Addr> {
    if cidr.prefix_len() > MAX_SUBNET_PREFIX {
        return Err(Error::InvalidCidr(format!(
            "{} needs a prefix of /{} or shorter to hold two usable hosts",
            cidr, MAX_SUBNET_PREFIX
        )));
    }

    let usable = usable_hosts(cidr);
    if n == 0 || u64::from(n) > usable {
        return Err(Error::InvalidCidr(format!(
            "{} has {} usable hosts, host {} requested",
            cidr, usable, n
        )));
    }

    let base = u32::from(cidr.network());
    Ok(Ipv4Addr::from(base + n))
}

fn usable_hosts(cidr: &Ipv4Net) -> u64 {
    (1u64 << (32 - u32::from(cidr.prefix_len()))) - 2
}

/// Addresses derived for one subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetAddressing {
    /// Subnet network, host bits cleared
    pub network: Ipv4Net,
    /// First usable host, placed on the VPC bridge
    pub gateway: Ipv4Addr,
    /// Second usable host, placed on the namespace veth
    pub endpoint: Ipv4Addr,
}

impl SubnetAddressing {
    pub fn for_cidr(cidr: &Ipv4Net) -> Result<Self> {
        let network = cidr.trunc();
        Ok(Self {
            network,
            gateway: nth_usable_host(&network, 1)?,
            endpoint: nth_usable_host(&network, 2)?,
        })
    }

    pub fn prefix_len(&self) -> u8 {
        self.network.prefix_len()
    }

    /// Gateway with the subnet prefix (`10.0.1.1/24`)
    pub fn gateway_cidr(&self) -> Ipv4Net {
        with_prefix(self.gateway, self.prefix_len())
    }

    /// Endpoint with the subnet prefix (`10.0.1.2/24`)
    pub fn endpoint_cidr(&self) -> Ipv4Net {
        with_prefix(self.endpoint, self.prefix_len())
    }
}

/// Peering end addresses for the (first, second) VPC of a pair
pub fn peering_pair() -> (Ipv4Net, Ipv4Net) {
    (
        with_prefix(PEER_ADDR_A, PEER_PREFIX),
        with_prefix(PEER_ADDR_B, PEER_PREFIX),
    )
}

fn with_prefix(addr: Ipv4Addr, prefix: u8) -> Ipv4Net {
    // prefix always comes from an existing Ipv4Net or a constant <= 32
    Ipv4Net::new(addr, prefix).unwrap_or_else(|_| Ipv4Net::from(addr))
}
