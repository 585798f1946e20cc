//! Host link operations via iproute2
//!
//! One function per kernel mutation. Each issues a single `ip` command and
//! surfaces the kernel's complaint unchanged on failure.

use crate::error::Result;
use crate::kernel::{KernelCommand, Runner};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Create a bridge interface
pub fn create_bridge(runner: &dyn Runner, name: &str) -> Result<()> {
    run(runner, ["link", "add", "name", name, "type", "bridge"])
}

/// Create a veth pair
pub fn create_veth_pair(runner: &dyn Runner, name: &str, peer: &str) -> Result<()> {
    run(runner, ["link", "add", name, "type", "veth", "peer", "name", peer])
}

/// Delete an interface (for a veth this removes both ends)
pub fn destroy_interface(runner: &dyn Runner, name: &str) -> Result<()> {
    run(runner, ["link", "del", name])
}

/// Bring an interface up
pub fn set_interface_up(runner: &dyn Runner, name: &str) -> Result<()> {
    run(runner, ["link", "set", name, "up"])
}

/// Enslave an interface to a bridge
pub fn bridge_add_member(runner: &dyn Runner, bridge: &str, member: &str) -> Result<()> {
    run(runner, ["link", "set", member, "master", bridge])
}

/// Move an interface into a network namespace
pub fn move_to_netns(runner: &dyn Runner, name: &str, netns: &str) -> Result<()> {
    run(runner, ["link", "set", name, "netns", netns])
}

/// Add an IPv4 address (with prefix) to an interface
pub fn add_ipv4_address(runner: &dyn Runner, name: &str, addr: &Ipv4Net) -> Result<()> {
    let addr = addr.to_string();
    run(runner, ["addr", "add", addr.as_str(), "dev", name])
}

/// Install or overwrite a host route
pub fn replace_route(runner: &dyn Runner, dest: &Ipv4Net, via: Ipv4Addr, dev: &str) -> Result<()> {
    let (dest, via) = (dest.to_string(), via.to_string());
    run(
        runner,
        ["route", "replace", dest.as_str(), "via", via.as_str(), "dev", dev],
    )
}

fn run<const N: usize>(runner: &dyn Runner, args: [&str; N]) -> Result<()> {
    runner.run_checked(&KernelCommand::ip(args))?;
    Ok(())
}
