// ── Typed rule model ──
//
// Rules are kept as the exact argument vector iptables receives, built
// through typed helpers so callers never concatenate strings. The same
// argument vector is what `-S` prints back, which lets listings be parsed
// into `Rule` values and compared or deleted verbatim.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use strum::{AsRefStr, Display, EnumString};

// ── Tables and chains ───────────────────────────────────────────────

/// A netfilter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Table {
    Filter,
    Nat,
}

/// A chain inside a table. Built-in chains have dedicated variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Chain {
    Input,
    Forward,
    Output,
    Prerouting,
    Postrouting,
    Custom(String),
}

impl Chain {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Input => "INPUT",
            Self::Forward => "FORWARD",
            Self::Output => "OUTPUT",
            Self::Prerouting => "PREROUTING",
            Self::Postrouting => "POSTROUTING",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "INPUT" => Self::Input,
            "FORWARD" => Self::Forward,
            "OUTPUT" => Self::Output,
            "PREROUTING" => Self::Prerouting,
            "POSTROUTING" => Self::Postrouting,
            other => Self::Custom(other.to_owned()),
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default policy of a built-in chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Policy {
    Accept,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Connection-tracking states usable in a stateful match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnState {
    New,
    Established,
    Related,
    Invalid,
}

/// What a matching packet does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Accept,
    Drop,
    Return,
    Masquerade,
    Dnat(SocketAddrV4),
}

impl Target {
    fn push_args(self, args: &mut Vec<String>) {
        args.push("-j".into());
        match self {
            Self::Accept => args.push("ACCEPT".into()),
            Self::Drop => args.push("DROP".into()),
            Self::Return => args.push("RETURN".into()),
            Self::Masquerade => args.push("MASQUERADE".into()),
            Self::Dnat(to) => {
                args.push("DNAT".into());
                args.push("--to-destination".into());
                args.push(to.to_string());
            }
        }
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// A single rule specification (everything after `-A CHAIN`).
///
/// Builder methods append in call order, matching how iptables expects
/// its arguments: a protocol must precede `dport`/`sport`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Rule {
    args: Vec<String>,
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already tokenized specification.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn protocol(mut self, proto: Protocol) -> Self {
        self.push(["-p".to_owned(), proto.to_string()]);
        self
    }

    pub fn source(mut self, ip: Ipv4Addr) -> Self {
        self.push(["-s".to_owned(), ip.to_string()]);
        self
    }

    pub fn destination(mut self, ip: Ipv4Addr) -> Self {
        self.push(["-d".to_owned(), ip.to_string()]);
        self
    }

    pub fn in_interface(mut self, iface: &str) -> Self {
        self.push(["-i", iface]);
        self
    }

    pub fn out_interface(mut self, iface: &str) -> Self {
        self.push(["-o", iface]);
        self
    }

    /// Match the link-layer source address (`-m mac --mac-source`).
    pub fn mac_source(mut self, mac: &str) -> Self {
        self.push(["-m", "mac", "--mac-source", mac]);
        self
    }

    pub fn dport(mut self, port: u16) -> Self {
        self.push(["--dport".to_owned(), port.to_string()]);
        self
    }

    pub fn sport(mut self, port: u16) -> Self {
        self.push(["--sport".to_owned(), port.to_string()]);
        self
    }

    /// Stateful match through the conntrack module.
    pub fn ctstate(mut self, states: &[ConnState]) -> Self {
        let states = join_states(states);
        self.push(["-m", "conntrack", "--ctstate", states.as_str()]);
        self
    }

    /// Stateful match through the legacy `state` module, for kernels
    /// without conntrack match support.
    pub fn state(mut self, states: &[ConnState]) -> Self {
        let states = join_states(states);
        self.push(["-m", "state", "--state", states.as_str()]);
        self
    }

    /// Attach a `-m comment` tag. Tags must not contain whitespace.
    pub fn comment(mut self, tag: &str) -> Self {
        self.push(["-m", "comment", "--comment", tag]);
        self
    }

    pub fn jump(mut self, target: Target) -> Self {
        target.push_args(&mut self.args);
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The jump target name (`ACCEPT`, `DROP`, `DNAT`, ...), if any.
    pub fn target(&self) -> Option<&str> {
        self.value_after("-j")
    }

    /// The `-m comment` tag, if any.
    pub fn comment_tag(&self) -> Option<&str> {
        self.value_after("--comment")
    }

    /// Parse one line of `iptables -S` output.
    ///
    /// Returns `None` for lines that are not rule appends (`-P`/`-N`
    /// policy and chain declarations).
    pub fn from_listing(line: &str) -> Option<(Chain, Self)> {
        let mut tokens = tokenize(line).into_iter();
        if tokens.next().as_deref() != Some("-A") {
            return None;
        }
        let chain = Chain::parse(&tokens.next()?);
        Some((chain, Self::from_args(tokens)))
    }

    fn value_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    fn push<I, S>(&mut self, parts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(parts.into_iter().map(Into::into));
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

fn join_states(states: &[ConnState]) -> String {
    states
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a `-S` line on whitespace, honouring double-quoted comments.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_token = false;

    for ch in line.trim().chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

// ── Invocations ─────────────────────────────────────────────────────

/// The argument vector for one iptables invocation.
///
/// Both backends render operations through here, so the in-memory
/// journal shows exactly what the process adapter would run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation(Vec<String>);

impl Invocation {
    fn base(table: Table, op: &str, chain: Option<&Chain>) -> Vec<String> {
        let mut args = vec!["-t".to_owned(), table.to_string(), op.to_owned()];
        if let Some(chain) = chain {
            args.push(chain.to_string());
        }
        args
    }

    pub fn insert_head(table: Table, chain: &Chain, rule: &Rule) -> Self {
        let mut args = Self::base(table, "-I", Some(chain));
        args.push("1".into());
        args.extend(rule.args().iter().cloned());
        Self(args)
    }

    pub fn append(table: Table, chain: &Chain, rule: &Rule) -> Self {
        let mut args = Self::base(table, "-A", Some(chain));
        args.extend(rule.args().iter().cloned());
        Self(args)
    }

    pub fn delete(table: Table, chain: &Chain, rule: &Rule) -> Self {
        let mut args = Self::base(table, "-D", Some(chain));
        args.extend(rule.args().iter().cloned());
        Self(args)
    }

    pub fn check(table: Table, chain: &Chain, rule: &Rule) -> Self {
        let mut args = Self::base(table, "-C", Some(chain));
        args.extend(rule.args().iter().cloned());
        Self(args)
    }

    pub fn list(table: Table, chain: &Chain) -> Self {
        Self(Self::base(table, "-S", Some(chain)))
    }

    pub fn flush(table: Table, chain: Option<&Chain>) -> Self {
        Self(Self::base(table, "-F", chain))
    }

    pub fn delete_chains(table: Table) -> Self {
        Self(Self::base(table, "-X", None))
    }

    pub fn set_policy(table: Table, chain: &Chain, policy: Policy) -> Self {
        let mut args = Self::base(table, "-P", Some(chain));
        args.push(policy.to_string());
        Self(args)
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}
