//! VPC bridge interface management
//!
//! Provides:
//! - Creation and destruction of `br-<vpc>` bridges
//! - Adding member interfaces
//! - Bridge addressing

use crate::error::{Error, Result};
use crate::kernel::{KernelState, Runner};
use crate::network::link;
use ipnet::Ipv4Net;

/// A bridge interface
#[derive(Clone)]
pub struct Bridge<'a> {
    runner: &'a dyn Runner,
    /// Bridge interface name (e.g., "br-prod")
    name: String,
}

impl<'a> Bridge<'a> {
    /// Create a new bridge interface, left down and unaddressed
    pub fn create(runner: &'a dyn Runner, name: &str) -> Result<Self> {
        if Self::exists(runner, name)? {
            return Err(Error::already_exists("bridge", name));
        }

        link::create_bridge(runner, name)?;

        Ok(Self {
            runner,
            name: name.to_string(),
        })
    }

    /// Open an existing bridge interface
    pub fn open(runner: &'a dyn Runner, name: &str) -> Result<Self> {
        if !Self::exists(runner, name)? {
            return Err(Error::not_found("bridge", name));
        }

        Ok(Self {
            runner,
            name: name.to_string(),
        })
    }

    /// Check if a bridge exists
    pub fn exists(runner: &dyn Runner, name: &str) -> Result<bool> {
        KernelState::new(runner).interface_exists(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First IPv4 address on the bridge (the VPC gateway and prefix)
    pub fn cidr(&self) -> Result<Ipv4Net> {
        KernelState::new(self.runner).bridge_cidr(&self.name)
    }

    /// Add an IPv4 address; the first one added is the VPC gateway
    pub fn add_address(&self, addr: &Ipv4Net) -> Result<()> {
        link::add_ipv4_address(self.runner, &self.name, addr)
    }

    /// Add a member interface to the bridge
    pub fn add_member(&self, interface: &str) -> Result<()> {
        link::bridge_add_member(self.runner, &self.name, interface)
    }

    /// Bring the bridge up
    pub fn up(&self) -> Result<()> {
        link::set_interface_up(self.runner, &self.name)
    }

    /// Destroy the bridge interface
    pub fn destroy(&self) -> Result<()> {
        link::destroy_interface(self.runner, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::sim::SimHost;

    #[test]
    fn test_bridge_exists_check() {
        let host = SimHost::new();
        host.add_bridge("br-a");

        assert!(Bridge::exists(&host, "br-a").unwrap());
        assert!(!Bridge::exists(&host, "br-nonexistent").unwrap());
    }

    #[test]
    fn test_create_then_address() {
        let host = SimHost::new();
        let bridge = Bridge::create(&host, "br-a").unwrap();
        bridge.add_address(&"10.0.0.1/16".parse().unwrap()).unwrap();
        bridge.add_address(&"10.0.1.1/24".parse().unwrap()).unwrap();
        bridge.up().unwrap();

        // The first address wins
        assert_eq!(bridge.cidr().unwrap(), "10.0.0.1/16".parse::<Ipv4Net>().unwrap());
        assert!(host.link_is_up("br-a", None));
    }

    #[test]
    fn test_create_existing_and_open_missing() {
        let host = SimHost::new();
        host.add_bridge("br-a");

        assert!(matches!(
            Bridge::create(&host, "br-a"),
            Err(Error::AlreadyExists { .. })
        ));
        assert!(matches!(
            Bridge::open(&host, "br-b"),
            Err(Error::NotFound { .. })
        ));
    }
}
