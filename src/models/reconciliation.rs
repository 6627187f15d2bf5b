//! Classification output of the reconciliation engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::NetworkRecord;

/// Authority value versus incoming value for one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDiff {
    pub attribute: String,
    /// `None` when the authority has no value for the attribute
    pub authority_value: Option<String>,
    pub incoming_value: String,
}

/// The CIDR exists on the authority, but not in the requested view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMismatch {
    pub expected_view: String,
    pub found_in: Vec<String>,
}

/// A record absent from the authority, with its projected attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedRecord {
    pub record: NetworkRecord,
    pub attributes: BTreeMap<String, String>,
}

/// A record already present and identical on the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedRecord {
    pub record: NetworkRecord,
    pub attributes: BTreeMap<String, String>,
    pub authority_ref: String,
}

/// A record present on the authority with differing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingRecord {
    pub record: NetworkRecord,
    pub attributes: BTreeMap<String, String>,
    /// Reference of the network in the requested view, if it exists there
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_mismatch: Option<ViewMismatch>,
    pub differences: Vec<AttributeDiff>,
}

/// Disjoint, exhaustive, input-ordered partition of a record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub network_view: String,
    pub new: Vec<ProjectedRecord>,
    pub existing_unchanged: Vec<MatchedRecord>,
    pub existing_conflicting: Vec<ConflictingRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub total: usize,
    pub new: usize,
    pub unchanged: usize,
    pub conflicting: usize,
    pub view_mismatches: usize,
}

impl ClassificationResult {
    pub fn empty(network_view: impl Into<String>) -> Self {
        Self {
            network_view: network_view.into(),
            new: Vec::new(),
            existing_unchanged: Vec::new(),
            existing_conflicting: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.existing_unchanged.len() + self.existing_conflicting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> ClassificationSummary {
        ClassificationSummary {
            total: self.len(),
            new: self.new.len(),
            unchanged: self.existing_unchanged.len(),
            conflicting: self.existing_conflicting.len(),
            view_mismatches: self
                .existing_conflicting
                .iter()
                .filter(|c| c.view_mismatch.is_some())
                .count(),
        }
    }
}
