//! Network inventory records

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::ValidationError;

/// An IPv4 or IPv6 network in canonical form (host bits cleared)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr(IpNetwork);

impl Cidr {
    pub fn network(&self) -> IpNetwork {
        self.0
    }

    pub fn prefix(&self) -> u8 {
        self.0.prefix()
    }

    pub fn is_ipv4(&self) -> bool {
        self.0.is_ipv4()
    }
}

impl FromStr for Cidr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = |reason: String| ValidationError::InvalidCidr {
            value: s.to_string(),
            reason,
        };

        if !trimmed.contains('/') {
            return Err(invalid("missing prefix length".to_string()));
        }

        let parsed: IpNetwork = trimmed.parse().map_err(|e| invalid(format!("{}", e)))?;
        let canonical =
            IpNetwork::new(parsed.network(), parsed.prefix()).map_err(|e| invalid(format!("{}", e)))?;
        Ok(Cidr(canonical))
    }
}

impl TryFrom<String> for Cidr {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.network(), self.0.prefix())
    }
}

impl Serialize for Cidr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Aws,
    Azure,
    Gcp,
    Alibaba,
    #[default]
    Csv,
    Authority,
}

/// A network to reconcile against the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub cidr: Cidr,

    /// Display name; written as the network comment on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Source tag name to tag value
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub source: RecordSource,
}

impl NetworkRecord {
    pub fn new(cidr: Cidr, source: RecordSource) -> Self {
        Self {
            cidr,
            name: None,
            attributes: BTreeMap::new(),
            source,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(tag.into(), value.into());
        self
    }
}

/// Reject record sets containing the same CIDR twice
pub fn ensure_unique_cidrs(records: &[NetworkRecord]) -> Result<(), ValidationError> {
    let mut seen: HashMap<Cidr, usize> = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        if let Some(first) = seen.insert(record.cidr, index) {
            return Err(ValidationError::DuplicateCidr {
                cidr: record.cidr.to_string(),
                first,
                second: index,
            });
        }
    }
    Ok(())
}

/// Distinct tag names across a record set, in first-seen order
pub fn distinct_tags(records: &[NetworkRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut tags = Vec::new();
    for record in records {
        for tag in record.attributes.keys() {
            if seen.insert(tag.as_str()) {
                tags.push(tag.clone());
            }
        }
    }
    tags
}
