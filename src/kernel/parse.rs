//! Parsers for `ip` and `iptables` text output
//!
//! Handles:
//! - `ip -o link show ...` one-line link records
//! - `ip -4 [-o] addr show ...` inet records
//! - `ip netns list`
//! - `iptables -S <chain>` rule specs

use ipnet::Ipv4Net;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{map_res, opt},
    multi::many0,
    sequence::{delimited, preceded},
};
use std::net::Ipv4Addr;

/// One interface from `ip -o link show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub index: u32,
    pub name: String,
    /// Peer or parent after `@` (e.g. `if4` for a veth whose peer is elsewhere)
    pub peer: Option<String>,
}

/// One IPv4 address from `ip -4 addr show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrEntry {
    /// Owning interface, present in `-o` output only
    pub ifname: Option<String>,
    pub addr: Ipv4Net,
}

impl AddrEntry {
    pub fn is_loopback(&self) -> bool {
        self.ifname.as_deref() == Some("lo") || self.addr.addr().is_loopback()
    }
}

/// One rule from `iptables -S <chain>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub chain: String,
    /// Match and target arguments after `-A <chain>`
    pub spec: Vec<String>,
}

impl RuleEntry {
    /// Whether `flag value` appears in the spec (e.g. `--comment vpcctl:a`)
    pub fn has_arg(&self, flag: &str, value: &str) -> bool {
        self.spec
            .windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }
}

/// Parse `ip -o link show` output
pub fn parse_links(output: &str) -> Vec<LinkEntry> {
    output
        .lines()
        .filter_map(|line| link_header(line).ok())
        .map(|(_, (index, name, peer))| LinkEntry {
            index,
            name: name.to_string(),
            peer: peer.map(str::to_string),
        })
        .collect()
}

/// Parse IPv4 records from `ip -4 addr show` (with or without `-o`)
///
/// In multi-line output the owner of each address is taken from the
/// preceding link header.
pub fn parse_addrs(output: &str) -> Vec<AddrEntry> {
    let mut entries = Vec::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if let Ok((_, (owner, cidr))) = addr_line(line) {
            let Some(addr) = parse_addr(cidr) else {
                continue;
            };
            let ifname = owner
                .map(strip_peer)
                .or(current.as_deref())
                .map(str::to_string);
            entries.push(AddrEntry { ifname, addr });
        } else if let Ok((_, (_, name, _))) = link_header(line) {
            current = Some(name.to_string());
        }
    }

    entries
}

/// Parse `ip netns list`; each line is `<name>` optionally followed by `(id: N)`
pub fn parse_netns(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Parse `iptables -S` output into appended rules; policy lines are skipped
pub fn parse_rules(output: &str) -> Vec<RuleEntry> {
    output.lines().filter_map(parse_rule_line).collect()
}

fn parse_rule_line(line: &str) -> Option<RuleEntry> {
    let (_, tokens) = many0(rule_token).parse(line.trim()).ok()?;
    match tokens.as_slice() {
        ["-A", chain, spec @ ..] => Some(RuleEntry {
            chain: chain.to_string(),
            spec: spec.iter().map(|s| s.to_string()).collect(),
        }),
        _ => None,
    }
}

fn parse_addr(cidr: &str) -> Option<Ipv4Net> {
    cidr.parse::<Ipv4Net>().ok().or_else(|| {
        cidr.parse::<Ipv4Addr>()
            .ok()
            .and_then(|addr| Ipv4Net::new(addr, 32).ok())
    })
}

fn strip_peer(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

// Nom parsers

fn ifindex(input: &str) -> IResult<&str, u32> {
    map_res(preceded(space0, digit1), |s: &str| s.parse::<u32>()).parse(input)
}

fn ifname(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != ':' && c != '@' && !c.is_whitespace()).parse(input)
}

/// `5: veth-web-br@if4: <BROADCAST,...> ...`
fn link_header(input: &str) -> IResult<&str, (u32, &str, Option<&str>)> {
    let (input, index) = ifindex(input)?;
    let (input, _) = (char(':'), space1).parse(input)?;
    let (input, name) = ifname(input)?;
    let (input, peer) = opt(preceded(char('@'), take_till(|c: char| c == ':'))).parse(input)?;
    let (input, _) = char(':').parse(input)?;
    Ok((input, (index, name, peer)))
}

/// `4: br-prod    inet ...` prefix of `ip -o addr` lines
fn addr_owner(input: &str) -> IResult<&str, &str> {
    let (input, _) = ifindex(input)?;
    let (input, _) = (char(':'), space1).parse(input)?;
    let (input, name) = take_while1(|c: char| !c.is_whitespace()).parse(input)?;
    Ok((input, name.trim_end_matches(':')))
}

fn inet(input: &str) -> IResult<&str, &str> {
    preceded(
        (space0, tag("inet"), space1),
        take_while1(|c: char| !c.is_whitespace()),
    )
    .parse(input)
}

fn addr_line(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    (opt(addr_owner), inet).parse(input)
}

fn rule_token(input: &str) -> IResult<&str, &str> {
    preceded(
        space0,
        alt((
            delimited(char('"'), take_till(|c: char| c == '"'), char('"')),
            take_while1(|c: char| !c.is_whitespace()),
        )),
    )
    .parse(input)
}
