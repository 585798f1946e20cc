//! Subnet network namespace configuration
//!
//! Provides:
//! - Namespace creation and deletion
//! - Addressing, link state and routes inside a namespace
//! - iptables invocations scoped to the namespace

use crate::error::Result;
use crate::kernel::{KernelCommand, Runner};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// A network namespace backing one subnet
#[derive(Clone)]
pub struct Namespace<'a> {
    runner: &'a dyn Runner,
    name: String,
}

impl<'a> Namespace<'a> {
    /// Create a new namespace
    pub fn create(runner: &'a dyn Runner, name: &str) -> Result<Self> {
        runner.run_checked(&KernelCommand::ip(["netns", "add", name]))?;

        Ok(Self {
            runner,
            name: name.to_string(),
        })
    }

    /// Handle on a namespace without checking that it exists
    pub fn attach(runner: &'a dyn Runner, name: &str) -> Self {
        Self {
            runner,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assign an IPv4 address to an interface inside the namespace
    pub fn add_address(&self, interface: &str, addr: &Ipv4Net) -> Result<()> {
        let addr = addr.to_string();
        self.ip(["addr", "add", addr.as_str(), "dev", interface])
    }

    /// Bring an interface inside the namespace up
    pub fn link_up(&self, interface: &str) -> Result<()> {
        self.ip(["link", "set", interface, "up"])
    }

    /// On-link host route to an address reachable through `interface`
    pub fn add_host_route(&self, addr: Ipv4Addr, interface: &str) -> Result<()> {
        let dest = format!("{}/32", addr);
        self.ip(["route", "replace", dest.as_str(), "dev", interface])
    }

    /// Default route via a gateway
    pub fn set_default_route(&self, gateway: Ipv4Addr) -> Result<()> {
        let gateway = gateway.to_string();
        self.ip(["route", "replace", "default", "via", gateway.as_str()])
    }

    /// Route to a network via a gateway on `interface`
    pub fn replace_route(&self, dest: &Ipv4Net, via: Ipv4Addr, interface: &str) -> Result<()> {
        let (dest, via) = (dest.trunc().to_string(), via.to_string());
        self.ip([
            "route",
            "replace",
            dest.as_str(),
            "via",
            via.as_str(),
            "dev",
            interface,
        ])
    }

    /// Run `iptables <args>` inside the namespace
    pub fn iptables<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner
            .run_checked(&KernelCommand::iptables(args).in_netns(&self.name))?;
        Ok(())
    }

    /// Delete the namespace; interfaces inside it go with it
    pub fn delete(&self) -> Result<()> {
        self.runner
            .run_checked(&KernelCommand::ip(["netns", "del", self.name.as_str()]))?;
        Ok(())
    }

    fn ip<const N: usize>(&self, args: [&str; N]) -> Result<()> {
        self.runner
            .run_checked(&KernelCommand::ip(args).in_netns(&self.name))?;
        Ok(())
    }
}
