//! Firewall policy files
//!
//! A policy file is a JSON array of per-subnet ingress rule lists:
//!
//! ```json
//! [
//!   {
//!     "subnet": "10.0.1.0/24",
//!     "ingress": [
//!       { "port": 80, "protocol": "tcp", "action": "allow" },
//!       { "port": 22, "protocol": "tcp", "action": "deny" }
//!     ]
//!   }
//! ]
//! ```

use crate::error::{Error, Result};
use crate::network::ip;
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Ingress rules for one subnet, addressed by CIDR
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirewallPolicy {
    pub subnet: String,
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
}

impl FirewallPolicy {
    /// Subnet network the policy targets
    pub fn subnet_cidr(&self) -> Result<Ipv4Net> {
        ip::parse_cidr(&self.subnet)
    }

    /// Check the entry can become iptables rules; returns its subnet
    pub fn validate(&self) -> Result<Ipv4Net> {
        let cidr = self
            .subnet_cidr()
            .map_err(|e| Error::PolicyValidation(e.to_string()))?;

        if let Some(rule) = self.ingress.iter().find(|rule| rule.port == 0) {
            return Err(Error::PolicyValidation(format!(
                "port 0 is not a valid {} port",
                rule.protocol
            )));
        }

        Ok(cidr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IngressRule {
    pub port: u16,
    pub protocol: Protocol,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

impl Action {
    /// iptables jump target
    pub fn target(&self) -> &'static str {
        match self {
            Action::Allow => "ACCEPT",
            Action::Deny => "DROP",
        }
    }
}

/// Load a policy file
///
/// Entries are not validated here; each one is checked as it is applied
/// so that a bad entry only skips itself.
pub fn load(path: &Path) -> Result<Vec<FirewallPolicy>> {
    let content = fs::read_to_string(path).map_err(|e| Error::PolicyRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| Error::PolicyParse {
        path: path.to_path_buf(),
        source: e,
    })
}
