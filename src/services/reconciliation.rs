//! Reconciliation engine
//!
//! Classifies incoming network records against the authority's current
//! state. Everything here is pure: the caller fetches authority networks and
//! the schema, and the same inputs always give the same classification.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::models::{
    ensure_unique_cidrs, AttributeDiff, AttributeSchema, AuthorityNetwork, Cidr,
    ClassificationResult, ConflictingRecord, FrozenMapping, MatchedRecord, NetworkRecord,
    ProjectedRecord, ViewMismatch,
};
use crate::utils::error::{ValidationError, ValueViolation};
use crate::utils::validation::check_attribute_value;

/// Reject requests carrying more records than allowed
pub fn check_record_limit(count: usize, limit: usize) -> Result<(), ValidationError> {
    if count > limit {
        return Err(ValidationError::TooManyRecords { count, limit });
    }
    Ok(())
}

/// Authority networks indexed by canonical CIDR
struct AuthorityIndex<'a> {
    in_view: HashMap<Cidr, &'a AuthorityNetwork>,
    elsewhere: HashMap<Cidr, BTreeSet<&'a str>>,
}

impl<'a> AuthorityIndex<'a> {
    fn build(view: &str, networks: &'a [AuthorityNetwork]) -> Self {
        let mut in_view = HashMap::new();
        let mut elsewhere: HashMap<Cidr, BTreeSet<&'a str>> = HashMap::new();

        for network in networks {
            let cidr = match network.cidr() {
                Ok(cidr) => cidr,
                Err(e) => {
                    warn!(reference = %network.reference, error = %e, "Skipping authority network with unparseable CIDR");
                    continue;
                }
            };
            if network.network_view == view {
                in_view.entry(cidr).or_insert(network);
            } else {
                elsewhere
                    .entry(cidr)
                    .or_default()
                    .insert(network.network_view.as_str());
            }
        }

        Self { in_view, elsewhere }
    }
}

/// Partition records into new, unchanged and conflicting
///
/// `authority` may hold networks from any view; those outside `view` are
/// only used to flag view mismatches. Each output sequence keeps input order.
pub fn classify(
    records: &[NetworkRecord],
    mapping: &FrozenMapping,
    view: &str,
    authority: &[AuthorityNetwork],
) -> Result<ClassificationResult, ValidationError> {
    let view = view.trim();
    if view.is_empty() {
        return Err(ValidationError::EmptyView);
    }
    ensure_unique_cidrs(records)?;

    let index = AuthorityIndex::build(view, authority);
    let mut result = ClassificationResult::empty(view);

    for record in records {
        let attributes = mapping.project(&record.attributes);

        if let Some(existing) = index.in_view.get(&record.cidr) {
            let differences = diff_attributes(&attributes, existing);
            if differences.is_empty() {
                result.existing_unchanged.push(MatchedRecord {
                    record: record.clone(),
                    attributes,
                    authority_ref: existing.reference.clone(),
                });
            } else {
                result.existing_conflicting.push(ConflictingRecord {
                    record: record.clone(),
                    attributes,
                    authority_ref: Some(existing.reference.clone()),
                    view_mismatch: None,
                    differences,
                });
            }
        } else if let Some(views) = index.elsewhere.get(&record.cidr) {
            result.existing_conflicting.push(ConflictingRecord {
                record: record.clone(),
                attributes,
                authority_ref: None,
                view_mismatch: Some(ViewMismatch {
                    expected_view: view.to_string(),
                    found_in: views.iter().map(|v| v.to_string()).collect(),
                }),
                differences: Vec::new(),
            });
        } else {
            result.new.push(ProjectedRecord {
                record: record.clone(),
                attributes,
            });
        }
    }

    let summary = result.summary();
    debug!(
        view = view,
        total = summary.total,
        new = summary.new,
        unchanged = summary.unchanged,
        conflicting = summary.conflicting,
        "Classified records"
    );
    Ok(result)
}

/// Attributes whose incoming value differs from, or is missing on, the authority
fn diff_attributes(
    attributes: &std::collections::BTreeMap<String, String>,
    existing: &AuthorityNetwork,
) -> Vec<AttributeDiff> {
    attributes
        .iter()
        .filter_map(|(attribute, incoming)| {
            let current = existing.attribute_value(attribute);
            (current.as_deref() != Some(incoming.as_str())).then(|| AttributeDiff {
                attribute: attribute.clone(),
                authority_value: current,
                incoming_value: incoming.clone(),
            })
        })
        .collect()
}

/// Check projected values against the declared attribute types
pub fn validate_values(
    records: &[NetworkRecord],
    mapping: &FrozenMapping,
    schema: &AttributeSchema,
) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    for record in records {
        for (attribute, value) in mapping.project(&record.attributes) {
            let Some(definition) = schema.get(&attribute) else {
                continue;
            };
            if let Err(reason) = check_attribute_value(definition, &value) {
                violations.push(ValueViolation {
                    cidr: record.cidr.to_string(),
                    attribute,
                    reason,
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::InvalidValues { violations })
    }
}
