//! Fabric orchestrator
//!
//! Handles:
//! - Existence checks before every mutating operation
//! - Mapping operation results to structured outcomes
//! - Re-reading the affected VPC after a change
//! - Read-only list/show views, as a table or JSON

use crate::error::{Error, Result};
use crate::firewall::{Firewall, Visibility};
use crate::kernel::{KernelState, Runner};
use crate::naming;
use crate::network::{Bridge, ip};
use crate::policy;
use crate::topology::{StepLog, StepRecord, StepStatus, Teardown, Topology};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

/// High-level fabric operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    CreateVpc,
    AddSubnet,
    PeerVpcs,
    ApplyFirewall,
    DeleteVpc,
    ListVpcs,
    ShowVpc,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreateVpc => "create-vpc",
            Operation::AddSubnet => "add-subnet",
            Operation::PeerVpcs => "peer-vpcs",
            Operation::ApplyFirewall => "apply-firewall",
            Operation::DeleteVpc => "delete-vpc",
            Operation::ListVpcs => "list-vpcs",
            Operation::ShowVpc => "show-vpc",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Creation target already present; nothing was changed
    AlreadyExists,
    /// Delete target absent; nothing was changed
    NothingToDelete,
    /// A referenced entity is absent; nothing was changed
    NotFound(String),
    /// Finished, but some best-effort steps failed or were skipped
    PartialFailure(Vec<String>),
}

impl Outcome {
    /// Whether the command should exit 0
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            Outcome::Success | Outcome::AlreadyExists | Outcome::NothingToDelete
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::AlreadyExists => write!(f, "already exists"),
            Outcome::NothingToDelete => write!(f, "nothing to delete"),
            Outcome::NotFound(what) => write!(f, "not found: {}", what),
            Outcome::PartialFailure(failures) => {
                write!(f, "partial failure ({} step(s))", failures.len())
            }
        }
    }
}

/// A subnet as seen from the kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetView {
    pub name: String,
    pub addresses: Vec<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
}

/// A VPC as seen from the kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VpcView {
    pub name: String,
    /// VPC network, host bits cleared
    pub cidr: Option<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
    pub subnets: Vec<SubnetView>,
}

/// Result of one fabric operation
#[derive(Debug, Clone)]
pub struct Report {
    pub operation: Operation,
    pub target: String,
    pub outcome: Outcome,
    pub steps: Vec<StepRecord>,
    /// Affected VPC, re-read after the operation
    pub state: Option<VpcView>,
}

impl Report {
    fn new(log: StepLog, outcome: Outcome) -> Self {
        Self {
            operation: log.operation(),
            target: log.target().to_string(),
            outcome,
            steps: log.into_records(),
            state: None,
        }
    }

    fn with_state(mut self, state: Option<VpcView>) -> Self {
        self.state = state;
        self
    }

    /// Error for a delete whose cleanup was incomplete
    pub fn teardown_failure(&self) -> Option<Error> {
        match &self.outcome {
            Outcome::PartialFailure(failures) if self.operation == Operation::DeleteVpc => {
                Some(Error::PartialTeardownFailure {
                    operation: self.operation,
                    target: self.target.clone(),
                    failures: failures.clone(),
                })
            }
            _ => None,
        }
    }

    /// Human-readable summary with the step log
    pub fn render(&self) -> String {
        let mut out = format!("{} '{}': {}\n", self.operation, self.target, self.outcome);

        for step in &self.steps {
            let line = match &step.status {
                StepStatus::Done => format!("  [done]    {}\n", step.name),
                StepStatus::Failed(why) => format!("  [failed]  {}: {}\n", step.name, why),
                StepStatus::Skipped(why) => format!("  [skipped] {}: {}\n", step.name, why),
            };
            out.push_str(&line);
        }

        if let Some(view) = &self.state {
            out.push('\n');
            out.push_str(&render_vpc(view));
        }

        out
    }
}

/// Fabric Orchestrator
pub struct Fabric<'a> {
    runner: &'a dyn Runner,
}

impl<'a> Fabric<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    fn state(&self) -> KernelState<'a> {
        KernelState::new(self.runner)
    }

    fn topology(&self) -> Topology<'a> {
        Topology::new(self.runner)
    }

    /// Create a VPC; `cidr` is the gateway address with the VPC prefix
    pub fn create_vpc(&self, name: &str, cidr: &str) -> Result<Report> {
        let cidr = ip::parse_cidr(cidr)?;
        let mut log = StepLog::new(Operation::CreateVpc, name);

        let outcome = match self.topology().create_vpc(name, &cidr, &mut log) {
            Ok(()) => Outcome::Success,
            Err(Error::AlreadyExists { .. }) => Outcome::AlreadyExists,
            Err(e) => return Err(e),
        };

        Ok(Report::new(log, outcome).with_state(self.view(name).ok()))
    }

    /// Add a subnet to an existing VPC
    pub fn add_subnet(
        &self,
        vpc: &str,
        name: &str,
        cidr: &str,
        visibility: Visibility,
    ) -> Result<Report> {
        let cidr = ip::parse_cidr(cidr)?;
        let mut log = StepLog::new(Operation::AddSubnet, name);

        let outcome = match self
            .topology()
            .add_subnet(vpc, name, &cidr, visibility, &mut log)
        {
            Ok(()) => Outcome::Success,
            Err(Error::AlreadyExists { .. }) => Outcome::AlreadyExists,
            Err(Error::NotFound { kind, name }) => {
                Outcome::NotFound(format!("{} '{}'", kind, name))
            }
            Err(e) => return Err(e),
        };

        Ok(Report::new(log, outcome).with_state(self.view(vpc).ok()))
    }

    /// Peer two VPCs
    pub fn peer_vpcs(&self, vpc_a: &str, vpc_b: &str) -> Result<Report> {
        let mut log = StepLog::new(Operation::PeerVpcs, format!("{}<->{}", vpc_a, vpc_b));

        let outcome = match self.topology().peer_vpcs(vpc_a, vpc_b, &mut log) {
            Ok(()) if log.failures().is_empty() => Outcome::Success,
            Ok(()) => Outcome::PartialFailure(log.failures()),
            Err(Error::NotFound { kind, name }) => {
                Outcome::NotFound(format!("{} '{}'", kind, name))
            }
            Err(e) => return Err(e),
        };

        Ok(Report::new(log, outcome).with_state(self.view(vpc_a).ok()))
    }

    /// Apply a firewall policy file
    pub fn apply_firewall(&self, path: &Path) -> Result<Report> {
        let policies = policy::load(path)?;
        let mut log = StepLog::new(Operation::ApplyFirewall, path.display().to_string());

        Firewall::new(self.runner).apply_policies(&policies, &mut log)?;

        let failures = log.failures();
        let outcome = if failures.is_empty() {
            Outcome::Success
        } else {
            Outcome::PartialFailure(failures)
        };

        Ok(Report::new(log, outcome))
    }

    /// Delete a VPC and everything attached to it
    pub fn delete_vpc(&self, name: &str) -> Result<Report> {
        let mut log = StepLog::new(Operation::DeleteVpc, name);

        let outcome = match self.topology().delete_vpc(name, &mut log)? {
            Teardown::NothingToDelete => Outcome::NothingToDelete,
            Teardown::Removed if log.failures().is_empty() => Outcome::Success,
            Teardown::Removed => Outcome::PartialFailure(log.failures()),
        };

        Ok(Report::new(log, outcome))
    }

    /// Every VPC on the host
    pub fn list_vpcs(&self) -> Result<Vec<VpcView>> {
        self.state()
            .list_vpc_bridges()?
            .iter()
            .map(|name| self.view(name))
            .collect()
    }

    /// One VPC
    pub fn show_vpc(&self, name: &str) -> Result<VpcView> {
        naming::validate_vpc_name(name)?;
        if !Bridge::exists(self.runner, &naming::vpc_bridge(name))? {
            return Err(Error::not_found("VPC", name));
        }
        self.view(name)
    }

    fn view(&self, name: &str) -> Result<VpcView> {
        let state = self.state();
        let bridge = naming::vpc_bridge(name);
        if !state.interface_exists(&bridge)? {
            return Err(Error::not_found("VPC", name));
        }

        let cidr = state.bridge_cidr(&bridge).ok();
        let gateway = state.bridge_gateway_address(&bridge).ok();
        let subnets = state
            .subnets_of_vpc(name, false)?
            .into_iter()
            .map(|entry| SubnetView {
                gateway: entry
                    .addresses
                    .first()
                    .and_then(|addr| ip::first_usable_host(&addr.trunc()).ok()),
                name: entry.name,
                addresses: entry.addresses,
            })
            .collect();

        Ok(VpcView {
            name: name.to_string(),
            cidr: cidr.map(|c| c.trunc()),
            gateway,
            subnets,
        })
    }
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Aligned `NAME CIDR GATEWAY SUBNETS` table
pub fn render_table(views: &[VpcView]) -> String {
    let rows: Vec<[String; 4]> = views
        .iter()
        .map(|view| {
            let subnets = view
                .subnets
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            [
                view.name.clone(),
                or_dash(view.cidr),
                or_dash(view.gateway),
                if subnets.is_empty() { "-".to_string() } else { subnets },
            ]
        })
        .collect();

    let header = ["NAME", "CIDR", "GATEWAY", "SUBNETS"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: [&str; 4]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {}\n",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        )
    };

    let mut out = line(header);
    for row in &rows {
        out.push_str(&line([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
        ]));
    }
    out
}

/// Detailed view of one VPC and its subnets
pub fn render_vpc(view: &VpcView) -> String {
    let mut out = format!(
        "VPC:      {}\nCIDR:     {}\nGateway:  {}\n",
        view.name,
        or_dash(view.cidr),
        or_dash(view.gateway)
    );

    if view.subnets.is_empty() {
        out.push_str("Subnets:  none\n");
        return out;
    }

    let width = view
        .subnets
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    out.push_str("Subnets:\n");
    out.push_str(&format!("  {:<width$}  {:<18}  {}\n", "NAME", "ADDRESS", "GATEWAY"));
    for subnet in &view.subnets {
        let addresses = subnet
            .addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&format!(
            "  {:<width$}  {:<18}  {}\n",
            subnet.name,
            if addresses.is_empty() { "-".to_string() } else { addresses },
            or_dash(subnet.gateway)
        ));
    }
    out
}
