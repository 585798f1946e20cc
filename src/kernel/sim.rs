//! In-memory kernel used by tests
//!
//! Interprets the subset of `ip` and `iptables` that vpcctl issues and
//! answers with output in the same text format as the real tools, so the
//! parsers and the mutation sequences are exercised together.

use crate::error::Result;
use crate::kernel::{CommandOutput, KernelCommand, Runner, Tool};
use ipnet::Ipv4Net;
use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum LinkKind {
    Bridge,
    Veth { peer: String },
    Plain,
}

#[derive(Debug, Clone)]
struct Link {
    index: u32,
    name: String,
    kind: LinkKind,
    netns: Option<String>,
    master: Option<String>,
    up: bool,
    addrs: Vec<Ipv4Net>,
}

#[derive(Debug, Default)]
struct Table {
    chains: BTreeMap<String, Vec<Vec<String>>>,
    policies: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Host {
    next_index: u32,
    links: Vec<Link>,
    namespaces: Vec<String>,
    routes: BTreeMap<Option<String>, Vec<String>>,
    tables: BTreeMap<(Option<String>, String), Table>,
    history: Vec<KernelCommand>,
    failures: Vec<(String, String)>,
}

/// Simulated host network stack
#[derive(Debug, Default)]
pub struct SimHost {
    inner: RefCell<Host>,
}

type Outcome = std::result::Result<String, String>;

impl SimHost {
    pub fn new() -> Self {
        let host = Host {
            next_index: 2,
            ..Default::default()
        };
        Self {
            inner: RefCell::new(host),
        }
    }

    /// Make every command whose rendering contains `pattern` fail with `stderr`
    pub fn fail_when(&self, pattern: &str, stderr: &str) {
        self.inner
            .borrow_mut()
            .failures
            .push((pattern.to_string(), stderr.to_string()));
    }

    /// Create a bridge directly, bypassing the command log
    pub fn add_bridge(&self, name: &str) {
        let mut host = self.inner.borrow_mut();
        host.add_link(name, LinkKind::Bridge, None);
    }

    /// Create a namespace holding one interface with an address
    pub fn add_namespace_with_address(&self, ns: &str, ifname: &str, cidr: &str) {
        let mut host = self.inner.borrow_mut();
        host.namespaces.push(ns.to_string());
        host.add_link(ifname, LinkKind::Plain, Some(ns.to_string()));
        if let Some(link) = host.links.last_mut() {
            link.addrs.push(cidr.parse().expect("test cidr"));
            link.up = true;
        }
    }

    /// Every command received, rendered
    pub fn commands(&self) -> Vec<String> {
        self.inner
            .borrow()
            .history
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Commands that would change kernel state
    pub fn mutations(&self) -> Vec<String> {
        self.inner
            .borrow()
            .history
            .iter()
            .filter(|cmd| !is_read_only(cmd))
            .map(ToString::to_string)
            .collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.inner.borrow().namespaces.clone()
    }

    pub fn link_exists(&self, name: &str) -> bool {
        self.inner.borrow().links.iter().any(|l| l.name == name)
    }

    /// Number of links with a given name across all namespaces
    pub fn link_count(&self, name: &str) -> usize {
        self.inner
            .borrow()
            .links
            .iter()
            .filter(|l| l.name == name)
            .count()
    }

    pub fn link_master(&self, name: &str) -> Option<String> {
        self.inner
            .borrow()
            .links
            .iter()
            .find(|l| l.name == name)
            .and_then(|l| l.master.clone())
    }

    pub fn link_addrs(&self, name: &str, netns: Option<&str>) -> Vec<String> {
        self.inner
            .borrow()
            .links
            .iter()
            .find(|l| l.name == name && l.netns.as_deref() == netns)
            .map(|l| l.addrs.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    pub fn link_is_up(&self, name: &str, netns: Option<&str>) -> bool {
        self.inner
            .borrow()
            .links
            .iter()
            .any(|l| l.name == name && l.netns.as_deref() == netns && l.up)
    }

    pub fn routes(&self, netns: Option<&str>) -> Vec<String> {
        self.inner
            .borrow()
            .routes
            .get(&netns.map(str::to_string))
            .cloned()
            .unwrap_or_default()
    }

    /// Rules of a chain, each rendered as its joined spec
    pub fn rules(&self, netns: Option<&str>, table: &str, chain: &str) -> Vec<String> {
        self.inner
            .borrow()
            .tables
            .get(&(netns.map(str::to_string), table.to_string()))
            .and_then(|t| t.chains.get(chain))
            .map(|rules| rules.iter().map(|r| r.join(" ")).collect())
            .unwrap_or_default()
    }

    pub fn policy(&self, netns: Option<&str>, chain: &str) -> Option<String> {
        self.inner
            .borrow()
            .tables
            .get(&(netns.map(str::to_string), "filter".to_string()))
            .and_then(|t| t.policies.get(chain).cloned())
    }
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

impl Runner for SimHost {
    fn run(&self, command: &KernelCommand) -> Result<CommandOutput> {
        let mut host = self.inner.borrow_mut();
        host.history.push(command.clone());

        let rendered = command.to_string();
        if let Some((_, stderr)) = host
            .failures
            .iter()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))
        {
            return Ok(CommandOutput::failed(2, stderr.clone()));
        }

        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        let ns = command.netns.clone();

        if let Some(ns) = &ns
            && !host.namespaces.contains(ns)
        {
            return Ok(CommandOutput::failed(
                1,
                format!("Cannot open network namespace \"{}\": No such file or directory", ns),
            ));
        }

        let result = match command.tool {
            Tool::Ip => host.ip(ns, &args),
            Tool::Iptables => host.iptables(ns, &args),
        };

        Ok(match result {
            Ok(stdout) => CommandOutput::ok(stdout),
            Err(stderr) => CommandOutput::failed(if stderr.is_empty() { 1 } else { 2 }, stderr),
        })
    }
}

fn is_read_only(cmd: &KernelCommand) -> bool {
    let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
    match cmd.tool {
        Tool::Ip => args.contains(&"show") || args == ["netns", "list"],
        Tool::Iptables => args.contains(&"-S") || args.contains(&"-C"),
    }
}

fn exists_err() -> String {
    "RTNETLINK answers: File exists".to_string()
}

fn no_device(name: &str) -> String {
    format!("Cannot find device \"{}\"", name)
}

impl Host {
    fn add_link(&mut self, name: &str, kind: LinkKind, netns: Option<String>) {
        let index = self.next_index;
        self.next_index += 1;
        self.links.push(Link {
            index,
            name: name.to_string(),
            kind,
            netns,
            master: None,
            up: false,
            addrs: Vec::new(),
        });
    }

    fn find(&self, ns: &Option<String>, name: &str) -> Option<usize> {
        self.links
            .iter()
            .position(|l| l.name == name && &l.netns == ns)
    }

    fn remove_link(&mut self, idx: usize) {
        let link = self.links.remove(idx);
        self.drop_routes(&link.netns, &link.name);
        if let LinkKind::Veth { peer } = &link.kind
            && let Some(pos) = self.links.iter().position(|l| &l.name == peer)
        {
            let peer = self.links.remove(pos);
            self.drop_routes(&peer.netns, &peer.name);
        }
        for other in self.links.iter_mut() {
            if other.master.as_deref() == Some(link.name.as_str()) {
                other.master = None;
            }
        }
    }

    /// Routes through a device vanish with it
    fn drop_routes(&mut self, ns: &Option<String>, dev: &str) {
        let suffix = format!(" dev {}", dev);
        if let Some(routes) = self.routes.get_mut(ns) {
            routes.retain(|r| !r.ends_with(&suffix) && !r.contains(&format!("{} ", suffix)));
        }
    }

    fn ip(&mut self, ns: Option<String>, args: &[&str]) -> Outcome {
        match args {
            ["netns", "list"] => Ok(self
                .namespaces
                .iter()
                .rev()
                .map(|n| format!("{}\n", n))
                .collect()),
            ["netns", "add", name] => {
                if self.namespaces.iter().any(|n| n == name) {
                    return Err(format!(
                        "Cannot create namespace file \"/run/netns/{}\": File exists",
                        name
                    ));
                }
                self.namespaces.push(name.to_string());
                Ok(String::new())
            }
            ["netns", "del", name] => {
                let Some(pos) = self.namespaces.iter().position(|n| n == name) else {
                    return Err(format!(
                        "Cannot remove namespace file \"/run/netns/{}\": No such file or directory",
                        name
                    ));
                };
                self.namespaces.remove(pos);
                let owned = Some(name.to_string());
                while let Some(idx) = self.links.iter().position(|l| l.netns == owned) {
                    self.remove_link(idx);
                }
                self.routes.remove(&owned);
                self.tables.retain(|(table_ns, _), _| table_ns != &owned);
                Ok(String::new())
            }
            ["link", "add", "name", name, "type", "bridge"] => {
                if self.find(&ns, name).is_some() {
                    return Err(exists_err());
                }
                self.add_link(name, LinkKind::Bridge, ns);
                Ok(String::new())
            }
            ["link", "add", a, "type", "veth", "peer", "name", b] => {
                if self.find(&ns, a).is_some() || self.find(&ns, b).is_some() {
                    return Err(exists_err());
                }
                self.add_link(a, LinkKind::Veth { peer: b.to_string() }, ns.clone());
                self.add_link(b, LinkKind::Veth { peer: a.to_string() }, ns);
                Ok(String::new())
            }
            ["link", "set", name, "up"] => {
                if *name == "lo" && ns.is_some() {
                    return Ok(String::new());
                }
                let idx = self.find(&ns, name).ok_or_else(|| no_device(name))?;
                self.links[idx].up = true;
                Ok(String::new())
            }
            ["link", "set", name, "master", bridge] => {
                let idx = self.find(&ns, name).ok_or_else(|| no_device(name))?;
                let br = self.find(&ns, bridge).ok_or_else(|| no_device(bridge))?;
                if !matches!(self.links[br].kind, LinkKind::Bridge) {
                    return Err("RTNETLINK answers: Operation not supported".to_string());
                }
                self.links[idx].master = Some(bridge.to_string());
                Ok(String::new())
            }
            ["link", "set", name, "netns", target] => {
                let idx = self.find(&ns, name).ok_or_else(|| no_device(name))?;
                if !self.namespaces.iter().any(|n| n == target) {
                    return Err(format!(
                        "Cannot open network namespace \"{}\": No such file or directory",
                        target
                    ));
                }
                let link = &mut self.links[idx];
                link.netns = Some(target.to_string());
                link.master = None;
                link.up = false;
                link.addrs.clear();
                Ok(String::new())
            }
            ["link", "del", name] => {
                let idx = self.find(&ns, name).ok_or_else(|| no_device(name))?;
                self.remove_link(idx);
                Ok(String::new())
            }
            ["link", "show", "dev", name] => {
                let idx = self
                    .find(&ns, name)
                    .ok_or_else(|| format!("Device \"{}\" does not exist.", name))?;
                Ok(self.link_line(&self.links[idx]))
            }
            ["-o", "link", "show", "master", bridge] => {
                if self.find(&ns, bridge).is_none() {
                    return Err(format!("Device \"{}\" does not exist.", bridge));
                }
                Ok(self
                    .links
                    .iter()
                    .filter(|l| l.netns == ns && l.master.as_deref() == Some(*bridge))
                    .map(|l| self.link_line(l))
                    .collect())
            }
            ["-o", "link", "show", "type", "bridge"] => Ok(self
                .links
                .iter()
                .filter(|l| l.netns == ns && matches!(l.kind, LinkKind::Bridge))
                .map(|l| self.link_line(l))
                .collect()),
            ["addr", "add", cidr, "dev", name] => {
                let addr: Ipv4Net = cidr.parse().map_err(|_| {
                    format!("Error: any valid prefix is expected rather than \"{}\".", cidr)
                })?;
                let idx = self.find(&ns, name).ok_or_else(|| no_device(name))?;
                if self.links[idx].addrs.contains(&addr) {
                    return Err("RTNETLINK answers: File exists".to_string());
                }
                self.links[idx].addrs.push(addr);
                Ok(String::new())
            }
            ["-4", "addr", "show", "dev", name] => {
                let idx = self
                    .find(&ns, name)
                    .ok_or_else(|| format!("Device \"{}\" does not exist.", name))?;
                let link = &self.links[idx];
                let mut out = self
                    .link_line(link)
                    .replace("\\    link/ether 02:00:00:00:00:00", "");
                for addr in &link.addrs {
                    out.push_str(&format!(
                        "    inet {} scope global {}\n       valid_lft forever preferred_lft forever\n",
                        addr, link.name
                    ));
                }
                Ok(out)
            }
            ["-4", "-o", "addr", "show"] => {
                let mut out = String::new();
                if ns.is_some() {
                    out.push_str(
                        "1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever\n",
                    );
                }
                for link in self.links.iter().filter(|l| l.netns == ns) {
                    for addr in &link.addrs {
                        out.push_str(&format!(
                            "{}: {}    inet {} scope global {}\\       valid_lft forever preferred_lft forever\n",
                            link.index, link.name, addr, link.name
                        ));
                    }
                }
                Ok(out)
            }
            ["route", verb @ ("add" | "replace"), dest, rest @ ..] => {
                if let Some(pos) = rest.iter().position(|a| *a == "dev")
                    && let Some(dev) = rest.get(pos + 1)
                    && self.find(&ns, dev).is_none()
                {
                    return Err(no_device(dev));
                }
                let routes = self.routes.entry(ns).or_default();
                let entry = std::iter::once(*dest)
                    .chain(rest.iter().copied())
                    .collect::<Vec<_>>()
                    .join(" ");
                let prefix = format!("{} ", dest);
                match routes.iter().position(|r| r.starts_with(&prefix)) {
                    Some(_) if *verb == "add" => Err(exists_err()),
                    Some(pos) => {
                        routes[pos] = entry;
                        Ok(String::new())
                    }
                    None => {
                        routes.push(entry);
                        Ok(String::new())
                    }
                }
            }
            _ => Err(format!("sim: unsupported ip command: {}", args.join(" "))),
        }
    }

    fn link_line(&self, link: &Link) -> String {
        let peer = match &link.kind {
            LinkKind::Veth { peer } => match self.links.iter().find(|l| &l.name == peer) {
                Some(p) if p.netns == link.netns => format!("@{}", p.name),
                Some(p) => format!("@if{}", p.index),
                None => "@NONE".to_string(),
            },
            _ => String::new(),
        };
        let master = link
            .master
            .as_ref()
            .map(|m| format!(" master {}", m))
            .unwrap_or_default();
        let state = if link.up { "UP" } else { "DOWN" };
        format!(
            "{}: {}{}: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue{} state {} mode DEFAULT group default qlen 1000\\    link/ether 02:00:00:00:00:00\n",
            link.index, link.name, peer, master, state
        )
    }

    fn iptables(&mut self, ns: Option<String>, args: &[&str]) -> Outcome {
        let (table, args) = match args {
            ["-t", table, rest @ ..] => (table.to_string(), rest),
            rest => ("filter".to_string(), rest),
        };
        let t = self.tables.entry((ns, table)).or_default();
        let bad_rule =
            || "iptables: Bad rule (does a matching rule exist in that chain?).".to_string();

        match args {
            ["-A", chain, spec @ ..] => {
                t.chains
                    .entry(chain.to_string())
                    .or_default()
                    .push(spec.iter().map(|s| s.to_string()).collect());
                Ok(String::new())
            }
            ["-I", chain, spec @ ..] => {
                t.chains
                    .entry(chain.to_string())
                    .or_default()
                    .insert(0, spec.iter().map(|s| s.to_string()).collect());
                Ok(String::new())
            }
            ["-C", chain, spec @ ..] => {
                let found = t
                    .chains
                    .get(*chain)
                    .is_some_and(|rules| rules.iter().any(|r| r == spec));
                if found { Ok(String::new()) } else { Err(bad_rule()) }
            }
            ["-D", chain, spec @ ..] => {
                let rules = t.chains.entry(chain.to_string()).or_default();
                let pos = rules.iter().position(|r| r == spec).ok_or_else(bad_rule)?;
                rules.remove(pos);
                Ok(String::new())
            }
            ["-F", chain] => {
                t.chains.remove(*chain);
                Ok(String::new())
            }
            ["-P", chain, target] => {
                t.policies.insert(chain.to_string(), target.to_string());
                Ok(String::new())
            }
            ["-S", chain] => {
                let policy = t
                    .policies
                    .get(*chain)
                    .cloned()
                    .unwrap_or_else(|| "ACCEPT".to_string());
                let mut out = format!("-P {} {}\n", chain, policy);
                for rule in t.chains.get(*chain).into_iter().flatten() {
                    let spec: Vec<String> = rule
                        .iter()
                        .map(|arg| {
                            if arg.contains(' ') {
                                format!("\"{}\"", arg)
                            } else {
                                arg.clone()
                            }
                        })
                        .collect();
                    out.push_str(&format!("-A {} {}\n", chain, spec.join(" ")));
                }
                Ok(out)
            }
            _ => Err(format!("sim: unsupported iptables command: {}", args.join(" "))),
        }
    }
}
