//! Packet filter and NAT rules for VPCs
//!
//! Host rules live in the FORWARD chain and the nat POSTROUTING chain and
//! carry `-m comment --comment vpcctl:<vpc>` so teardown can find them.
//! Per-subnet ingress policies live in the INPUT chain of the subnet's
//! namespace.

use crate::error::Result;
use crate::kernel::parse::RuleEntry;
use crate::kernel::{KernelCommand, KernelState, Runner};
use crate::naming;
use crate::network::Namespace;
use crate::policy::FirewallPolicy;
use crate::topology::steps::StepLog;
use ipnet::Ipv4Net;
use std::fmt;

/// Whether a subnet reaches outside its VPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Visibility {
    /// Masqueraded out of the host
    Public,
    /// Confined to the VPC network
    #[default]
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `-A`: after existing rules
    Append,
    /// `-I`: ahead of existing rules
    Insert,
}

/// A rule in a host chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRule {
    pub table: &'static str,
    pub chain: &'static str,
    pub placement: Placement,
    /// Matches and target, as passed after `-A <chain>`
    pub spec: Vec<String>,
}

impl HostRule {
    /// Rule tagged for `vpc`; the comment match goes right before `-j`
    fn tagged(vpc: &str, table: &'static str, chain: &'static str, args: &[&str]) -> Self {
        let mut spec: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let at = spec.iter().position(|a| a == "-j").unwrap_or(spec.len());
        let tag = [
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            naming::rule_tag(vpc),
        ];
        let tail = spec.split_off(at);
        spec.extend(tag);
        spec.extend(tail);

        Self {
            table,
            chain,
            placement: Placement::Append,
            spec,
        }
    }

    fn inserted(mut self) -> Self {
        self.placement = Placement::Insert;
        self
    }

    fn command(&self, op: &str) -> KernelCommand {
        let mut args = vec![
            "-t".to_string(),
            self.table.to_string(),
            op.to_string(),
            self.chain.to_string(),
        ];
        args.extend(self.spec.iter().cloned());
        KernelCommand::iptables(args)
    }
}

impl fmt::Display for HostRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.table, self.chain, self.spec.join(" "))
    }
}

/// Host rules giving a subnet its visibility
///
/// For a private subnet the intra-VPC accepts come before the catch-all
/// drop, since the first matching FORWARD rule wins.
pub fn subnet_rules(
    vpc: &str,
    subnet: &Ipv4Net,
    vpc_net: &Ipv4Net,
    visibility: Visibility,
) -> Vec<HostRule> {
    let bridge = naming::vpc_bridge(vpc);
    let subnet = subnet.trunc().to_string();
    let vpc_net = vpc_net.trunc().to_string();

    match visibility {
        Visibility::Public => vec![
            HostRule::tagged(
                vpc,
                "nat",
                "POSTROUTING",
                &["-s", &subnet, "!", "-o", &bridge, "-j", "MASQUERADE"],
            ),
            HostRule::tagged(vpc, "filter", "FORWARD", &["-s", &subnet, "-j", "ACCEPT"]),
            HostRule::tagged(
                vpc,
                "filter",
                "FORWARD",
                &[
                    "-d",
                    &subnet,
                    "-m",
                    "conntrack",
                    "--ctstate",
                    "ESTABLISHED,RELATED",
                    "-j",
                    "ACCEPT",
                ],
            ),
        ],
        Visibility::Private => vec![
            HostRule::tagged(
                vpc,
                "filter",
                "FORWARD",
                &["-s", &subnet, "-d", &vpc_net, "-j", "ACCEPT"],
            ),
            HostRule::tagged(
                vpc,
                "filter",
                "FORWARD",
                &["-s", &vpc_net, "-d", &subnet, "-j", "ACCEPT"],
            ),
            HostRule::tagged(
                vpc,
                "filter",
                "FORWARD",
                &["-s", &subnet, "!", "-d", &vpc_net, "-j", "DROP"],
            ),
        ],
    }
}

/// ACCEPT rules between two peered bridges, placed ahead of any subnet drops
pub fn peering_rules(vpc_a: &str, vpc_b: &str) -> Vec<HostRule> {
    let (br_a, br_b) = (naming::vpc_bridge(vpc_a), naming::vpc_bridge(vpc_b));
    vec![
        HostRule::tagged(vpc_a, "filter", "FORWARD", &["-i", &br_a, "-o", &br_b, "-j", "ACCEPT"])
            .inserted(),
        HostRule::tagged(vpc_b, "filter", "FORWARD", &["-i", &br_b, "-o", &br_a, "-j", "ACCEPT"])
            .inserted(),
    ]
}

/// Untagged DROP rules that isolated two VPC networks from each other
pub fn isolation_rules(net_a: &Ipv4Net, net_b: &Ipv4Net) -> Vec<HostRule> {
    let (a, b) = (net_a.trunc().to_string(), net_b.trunc().to_string());
    [(&a, &b), (&b, &a)]
        .into_iter()
        .map(|(src, dst)| HostRule {
            table: "filter",
            chain: "FORWARD",
            placement: Placement::Append,
            spec: ["-s", src.as_str(), "-d", dst.as_str(), "-j", "DROP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
        .collect()
}

/// Namespace INPUT rule sequence for one policy, after the flush
pub fn policy_rules(policy: &FirewallPolicy) -> Vec<Vec<String>> {
    let mut rules: Vec<Vec<String>> = policy
        .ingress
        .iter()
        .map(|rule| {
            vec![
                "-A".to_string(),
                "INPUT".to_string(),
                "-p".to_string(),
                rule.protocol.to_string(),
                "--dport".to_string(),
                rule.port.to_string(),
                "-j".to_string(),
                rule.action.target().to_string(),
            ]
        })
        .collect();

    let standing: [&[&str]; 3] = [
        &["-A", "INPUT", "-m", "conntrack", "--ctstate", "ESTABLISHED,RELATED", "-j", "ACCEPT"],
        &["-A", "INPUT", "-i", "lo", "-j", "ACCEPT"],
        &["-P", "INPUT", "DROP"],
    ];
    rules.extend(
        standing
            .iter()
            .map(|args| args.iter().map(|s| s.to_string()).collect::<Vec<String>>()),
    );
    rules
}

/// Applies and removes rules through a [`Runner`]
pub struct Firewall<'a> {
    runner: &'a dyn Runner,
}

impl<'a> Firewall<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Install a host rule unless an identical one is present
    ///
    /// Returns whether a rule was added.
    pub fn ensure(&self, rule: &HostRule) -> Result<bool> {
        let state = KernelState::new(self.runner);
        if state.rule_exists(rule.table, rule.chain, &rule.spec)? {
            tracing::debug!(rule = %rule, "rule already present");
            return Ok(false);
        }

        let op = match rule.placement {
            Placement::Append => "-A",
            Placement::Insert => "-I",
        };
        self.runner.run_checked(&rule.command(op))?;
        Ok(true)
    }

    /// Delete a host rule if present; returns whether one was deleted
    pub fn remove(&self, rule: &HostRule) -> Result<bool> {
        let state = KernelState::new(self.runner);
        if !state.rule_exists(rule.table, rule.chain, &rule.spec)? {
            return Ok(false);
        }

        self.runner.run_checked(&rule.command("-D"))?;
        Ok(true)
    }

    /// Install the visibility shape of a subnet, one step per rule
    pub fn apply_subnet_shape(
        &self,
        vpc: &str,
        subnet: &Ipv4Net,
        vpc_net: &Ipv4Net,
        visibility: Visibility,
        log: &mut StepLog,
    ) -> Result<()> {
        for rule in subnet_rules(vpc, subnet, vpc_net, visibility) {
            log.run(format!("{} rule: {}", visibility, rule), || self.ensure(&rule))?;
        }
        Ok(())
    }

    /// Replace the INPUT chain of a namespace with a policy
    pub fn apply_policy(&self, netns: &str, policy: &FirewallPolicy) -> Result<()> {
        let ns = Namespace::attach(self.runner, netns);
        ns.iptables(["-F", "INPUT"])?;
        for args in policy_rules(policy) {
            ns.iptables(args)?;
        }
        Ok(())
    }

    /// Apply a list of policies
    ///
    /// An invalid policy, or one whose subnet no namespace carries, is
    /// skipped and the rest still apply; a kernel failure stops the run.
    pub fn apply_policies(&self, policies: &[FirewallPolicy], log: &mut StepLog) -> Result<()> {
        let state = KernelState::new(self.runner);

        for policy in policies {
            let step = format!("policy for {}", policy.subnet);
            let cidr = match policy.validate() {
                Ok(cidr) => cidr,
                Err(e) => {
                    log.skip(step, e.to_string());
                    continue;
                }
            };

            let Some(netns) = state.namespace_has_address(&cidr)? else {
                log.skip(step, format!("no namespace has an address in {}", cidr.trunc()));
                continue;
            };

            log.run(format!("{} (namespace {})", step, netns), || {
                self.apply_policy(&netns, policy)
            })?;
        }

        Ok(())
    }

    /// Host rules installed for a VPC
    ///
    /// Matches the VPC tag, the VPC bridge as in/out interface, or the VPC
    /// network as source/destination.
    pub fn vpc_rules(&self, vpc: &str, vpc_net: Option<&Ipv4Net>) -> Result<Vec<HostRule>> {
        let state = KernelState::new(self.runner);
        let tag = naming::rule_tag(vpc);
        let bridge = naming::vpc_bridge(vpc);
        let net = vpc_net.map(|n| n.trunc().to_string());

        let belongs = |entry: &RuleEntry| {
            entry.has_arg("--comment", &tag)
                || entry.has_arg("-i", &bridge)
                || entry.has_arg("-o", &bridge)
                || net
                    .as_ref()
                    .is_some_and(|n| entry.has_arg("-s", n) || entry.has_arg("-d", n))
        };

        let mut rules = Vec::new();
        for (table, chain) in [("filter", "FORWARD"), ("nat", "POSTROUTING")] {
            rules.extend(
                state
                    .firewall_rules(table, chain)?
                    .into_iter()
                    .filter(|entry| belongs(entry))
                    .map(|entry| HostRule {
                        table,
                        chain,
                        placement: Placement::Append,
                        spec: entry.spec,
                    }),
            );
        }

        Ok(rules)
    }

    /// Delete every host rule of a VPC, continuing past failures
    pub fn teardown_vpc(&self, vpc: &str, vpc_net: Option<&Ipv4Net>, log: &mut StepLog) {
        let Some(rules) = log.attempt("list host rules", || self.vpc_rules(vpc, vpc_net)) else {
            return;
        };

        for rule in rules {
            log.attempt(format!("delete rule: {}", rule), || {
                self.runner.run_checked(&rule.command("-D"))
            });
        }
    }
}
