//! Kernel object naming
//!
//! Every VPC, subnet and peering link exists only as kernel objects named by
//! convention, so these names are the schema:
//! - VPC `<vpc>`: bridge `br-<vpc>`
//! - Subnet `<sub>`: namespace `<sub>`, veth pair `veth-<sub>` / `veth-<sub>-br`
//! - Peering `<a>`/`<b>`: veth pair `veth-<a>` / `veth-<b>`
//! - Host iptables rules installed for a VPC carry the comment `vpcctl:<vpc>`

use crate::error::{Error, Result};

/// Linux IFNAMSIZ minus the trailing NUL
pub const MAX_IFNAME_LEN: usize = 15;

const BRIDGE_PREFIX: &str = "br-";
const VETH_PREFIX: &str = "veth-";
const BRIDGE_PORT_SUFFIX: &str = "-br";
const RULE_TAG_PREFIX: &str = "vpcctl:";

/// Bridge interface for a VPC
pub fn vpc_bridge(vpc: &str) -> String {
    format!("{}{}", BRIDGE_PREFIX, vpc)
}

/// Recover the VPC name from a bridge interface name
pub fn vpc_from_bridge(ifname: &str) -> Option<&str> {
    ifname
        .strip_prefix(BRIDGE_PREFIX)
        .filter(|name| !name.is_empty())
}

/// Namespace-side veth of a subnet
pub fn subnet_veth(subnet: &str) -> String {
    format!("{}{}", VETH_PREFIX, subnet)
}

/// Bridge-side veth of a subnet (a port of the VPC bridge)
pub fn subnet_bridge_port(subnet: &str) -> String {
    format!("{}{}{}", VETH_PREFIX, subnet, BRIDGE_PORT_SUFFIX)
}

/// Recover the subnet name from a bridge port name
///
/// Only `veth-<sub>-br` ports are subnet members; peering ends
/// (`veth-<vpc>`) and foreign ports are ignored.
pub fn subnet_from_bridge_port(ifname: &str) -> Option<&str> {
    ifname
        .strip_prefix(VETH_PREFIX)?
        .strip_suffix(BRIDGE_PORT_SUFFIX)
        .filter(|name| !name.is_empty())
}

/// Peering veth end owned by a VPC
pub fn peering_veth(vpc: &str) -> String {
    format!("{}{}", VETH_PREFIX, vpc)
}

/// Namespace of a subnet
pub fn subnet_namespace(subnet: &str) -> &str {
    subnet
}

/// iptables comment attached to every host rule installed for a VPC
pub fn rule_tag(vpc: &str) -> String {
    format!("{}{}", RULE_TAG_PREFIX, vpc)
}

/// Validate a VPC name against the interface names derived from it
pub fn validate_vpc_name(name: &str) -> Result<()> {
    validate_chars(name)?;
    for ifname in [vpc_bridge(name), peering_veth(name)] {
        check_len(name, &ifname)?;
    }
    Ok(())
}

/// Validate a subnet name against the interface names derived from it
pub fn validate_subnet_name(name: &str) -> Result<()> {
    validate_chars(name)?;
    check_len(name, &subnet_bridge_port(name))
}

fn validate_chars(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!("character '{}' is not allowed", c),
        });
    }

    Ok(())
}

fn check_len(name: &str, ifname: &str) -> Result<()> {
    if ifname.len() > MAX_IFNAME_LEN {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!(
                "derived interface '{}' exceeds {} characters",
                ifname, MAX_IFNAME_LEN
            ),
        });
    }
    Ok(())
}
