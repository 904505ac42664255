//! Typed views into the external per-host policy configuration

use serde::{Deserialize, Serialize};
use snifrag_dns::RecordType;
use std::collections::HashMap;

/// Address family requested by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    Ipv4,
    Ipv6,
}

impl IpFamily {
    pub fn record_type(self) -> RecordType {
        match self {
            IpFamily::Ipv4 => RecordType::A,
            IpFamily::Ipv6 => RecordType::AAAA,
        }
    }
}

/// Per-host overrides. Any subset of the keys may be present; a missing key
/// means "unspecified". There is no error path: an unknown host yields the
/// empty policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Skip DNS resolution and connect here
    #[serde(default)]
    pub ip: Option<String>,
    /// Override the destination port
    #[serde(default)]
    pub port: Option<u16>,
    /// Address family for resolution; `ipv6` selects AAAA lookups
    #[serde(default)]
    pub ip_type: Option<IpFamily>,
}

/// Host-keyed policy table, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    entries: HashMap<String, Policy>,
}

impl PolicyTable {
    pub fn new(entries: HashMap<String, Policy>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(host, policy)| (host.to_lowercase(), policy))
            .collect();
        Self { entries }
    }

    pub fn get_policy(&self, host: &str) -> Policy {
        self.entries
            .get(&host.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}
