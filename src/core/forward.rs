//! Forwarding intent data structures and nftables rule generation
//!
//! A [`ForwardIntent`] is the operator-supplied tuple (family, local port,
//! remote address, remote port). One intent always expands into exactly four
//! low-level rules:
//!
//! - DNAT for TCP and UDP in the `prerouting` chain, rewriting traffic that
//!   arrives on the local port to the remote destination
//! - masquerade for TCP and UDP in the `postrouting` chain, so return
//!   traffic from the remote host routes back through this machine
//!
//! The four rules are serialized into a single nftables JSON batch, which
//! the engine applies all-or-nothing. Partial installation of an intent is
//! therefore not possible.
//!
//! # Example
//!
//! ```
//! use pfwd::core::forward::{AddrFamily, ForwardIntent};
//!
//! let intent = ForwardIntent::new(AddrFamily::V4, 8080, "10.0.0.5".to_string(), None);
//! assert_eq!(intent.remote_port, 8080); // defaults to the local port
//! assert_eq!(intent.expand().len(), 4);
//! ```

use crate::core::engine::{RuleEngine, TABLE_FAMILY, TABLE_NAME};
use crate::core::error::{Error, Result};
use crate::core::table;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::info;

/// Address family of a forwarding intent
///
/// `Copy` trait allows efficient passing by value for this small enum.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum AddrFamily {
    /// IPv4
    #[strum(to_string = "ipv4", serialize = "4", serialize = "v4")]
    V4,
    /// IPv6
    #[strum(to_string = "ipv6", serialize = "6", serialize = "v6")]
    V6,
}

impl AddrFamily {
    /// Returns the `meta nfproto` token selecting this family in an inet chain
    pub const fn nfproto(self) -> &'static str {
        match self {
            AddrFamily::V4 => "ipv4",
            AddrFamily::V6 => "ipv6",
        }
    }

    /// Returns the payload protocol token (`ip`/`ip6`) for address matches
    /// and NAT targets
    pub const fn payload_protocol(self) -> &'static str {
        match self {
            AddrFamily::V4 => "ip",
            AddrFamily::V6 => "ip6",
        }
    }

    /// Returns display name for prompts
    pub const fn display_name(self) -> &'static str {
        match self {
            AddrFamily::V4 => "IPv4",
            AddrFamily::V6 => "IPv6",
        }
    }
}

/// Transport protocol of one generated rule
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Protocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
}

impl Protocol {
    /// Returns lowercase protocol name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// NAT chain a generated rule lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatChain {
    /// Destination-NAT hook point
    Prerouting,
    /// Source-NAT/masquerade hook point
    Postrouting,
}

impl NatChain {
    pub const fn as_str(self) -> &'static str {
        match self {
            NatChain::Prerouting => table::PREROUTING,
            NatChain::Postrouting => table::POSTROUTING,
        }
    }
}

/// One operator-supplied forwarding intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardIntent {
    pub family: AddrFamily,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
}

impl ForwardIntent {
    /// Creates an intent; a missing remote port defaults to the local port.
    pub fn new(
        family: AddrFamily,
        local_port: u16,
        remote_addr: String,
        remote_port: Option<u16>,
    ) -> Self {
        Self {
            family,
            local_port,
            remote_addr,
            remote_port: remote_port.unwrap_or(local_port),
        }
    }

    /// Validates every field, returning the first field-level error.
    ///
    /// Interactive callers validate at the prompt instead and re-ask for the
    /// single offending field; this whole-intent check is the non-interactive
    /// (CLI) boundary.
    pub fn validate(&self) -> Result<()> {
        if self.local_port == 0 {
            return Err(Error::Validation {
                field: "local_port".to_string(),
                message: "port must be between 1 and 65535".to_string(),
            });
        }
        if !crate::validators::validate_addr(self.family, &self.remote_addr) {
            return Err(Error::Validation {
                field: "remote_addr".to_string(),
                message: format!(
                    "not a valid {} address: {}",
                    self.family.display_name(),
                    self.remote_addr
                ),
            });
        }
        if self.remote_port == 0 {
            return Err(Error::Validation {
                field: "remote_port".to_string(),
                message: "port must be between 1 and 65535".to_string(),
            });
        }
        Ok(())
    }

    /// Renders the DNAT destination literal. IPv6 addresses are bracketed to
    /// disambiguate the port separator from the address's own colons.
    pub fn dnat_target(&self) -> String {
        match self.family {
            AddrFamily::V4 => format!("{}:{}", self.remote_addr, self.remote_port),
            AddrFamily::V6 => format!("[{}]:{}", self.remote_addr, self.remote_port),
        }
    }

    /// Expands the intent into its four underlying rules.
    ///
    /// Always DNAT + masquerade, for TCP and UDP each. Never a subset.
    pub fn expand(&self) -> Vec<NatRule> {
        use strum::IntoEnumIterator;

        let mut rules = Vec::with_capacity(4);
        for protocol in Protocol::iter() {
            rules.push(NatRule {
                chain: NatChain::Prerouting,
                protocol,
                intent: self.clone(),
            });
        }
        for protocol in Protocol::iter() {
            rules.push(NatRule {
                chain: NatChain::Postrouting,
                protocol,
                intent: self.clone(),
            });
        }
        rules
    }

    /// Serializes the four rules of this intent into one nftables JSON batch.
    pub fn to_nftables_json(&self) -> serde_json::Value {
        let stmts: Vec<serde_json::Value> =
            self.expand().iter().map(NatRule::to_json_stmt).collect();
        json!({ "nftables": stmts })
    }

    /// Renders the four rules as human-readable nft text.
    pub fn to_nft_text(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for rule in self.expand() {
            let _ = writeln!(out, "{rule}");
        }
        out
    }
}

/// One low-level rule generated from an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub chain: NatChain,
    pub protocol: Protocol,
    pub intent: ForwardIntent,
}

impl NatRule {
    /// Rule comment tying the kernel rule back to its intent; shows up in
    /// `nft list ruleset` output.
    pub fn comment(&self) -> String {
        format!(
            "fwd {} -> {}/{}",
            self.intent.local_port,
            self.intent.dnat_target(),
            self.protocol.as_str()
        )
    }

    /// Builds the `add rule` JSON statement for this rule.
    pub fn to_json_stmt(&self) -> serde_json::Value {
        let expr = match self.chain {
            NatChain::Prerouting => self.dnat_expr(),
            NatChain::Postrouting => self.masquerade_expr(),
        };

        json!({
            "add": {
                "rule": {
                    "family": TABLE_FAMILY,
                    "table": TABLE_NAME,
                    "chain": self.chain.as_str(),
                    "expr": expr,
                    "comment": self.comment()
                }
            }
        })
    }

    /// DNAT: match family + local dport, rewrite destination to the remote
    /// address and port.
    fn dnat_expr(&self) -> Vec<serde_json::Value> {
        let intent = &self.intent;
        vec![
            json!({
                "match": {
                    "left": { "meta": { "key": "nfproto" } },
                    "op": "==",
                    "right": intent.family.nfproto()
                }
            }),
            json!({
                "match": {
                    "left": { "payload": { "protocol": self.protocol.as_str(), "field": "dport" } },
                    "op": "==",
                    "right": intent.local_port
                }
            }),
            json!({
                "dnat": {
                    "family": intent.family.payload_protocol(),
                    "addr": intent.remote_addr,
                    "port": intent.remote_port
                }
            }),
        ]
    }

    /// Masquerade: match packets headed for the rewritten destination and
    /// source-NAT them to the egress address.
    fn masquerade_expr(&self) -> Vec<serde_json::Value> {
        let intent = &self.intent;
        vec![
            json!({
                "match": {
                    "left": {
                        "payload": {
                            "protocol": intent.family.payload_protocol(),
                            "field": "daddr"
                        }
                    },
                    "op": "==",
                    "right": intent.remote_addr
                }
            }),
            json!({
                "match": {
                    "left": { "payload": { "protocol": self.protocol.as_str(), "field": "dport" } },
                    "op": "==",
                    "right": intent.remote_port
                }
            }),
            json!({ "masquerade": null }),
        ]
    }
}

impl fmt::Display for NatRule {
    /// nft text form of the rule, as it would appear inside its chain.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let intent = &self.intent;
        match self.chain {
            NatChain::Prerouting => write!(
                f,
                "meta nfproto {} {} dport {} dnat {} to {}",
                intent.family.nfproto(),
                self.protocol.as_str(),
                intent.local_port,
                intent.family.payload_protocol(),
                intent.dnat_target()
            ),
            NatChain::Postrouting => write!(
                f,
                "{} daddr {} {} dport {} masquerade",
                intent.family.payload_protocol(),
                intent.remote_addr,
                self.protocol.as_str(),
                intent.remote_port
            ),
        }
    }
}

/// Installs a forwarding intent into the kernel.
///
/// Ensures the table and chains exist (live-probed, created if absent), then
/// applies the intent's four rules as one batch.
pub fn install(engine: &dyn RuleEngine, intent: &ForwardIntent) -> Result<()> {
    debug_assert!(intent.validate().is_ok());

    table::ensure_table(engine)?;
    table::ensure_chains(engine)?;

    engine.apply(&intent.to_nftables_json())?;
    info!(
        "installed forward {} -> {} ({})",
        intent.local_port,
        intent.dnat_target(),
        intent.family.display_name()
    );
    Ok(())
}
