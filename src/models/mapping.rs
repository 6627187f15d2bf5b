//! Tag-to-attribute mapping model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::AttributeSchema;
use crate::utils::error::ValidationError;

/// Which rule produced a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    ExactMatch,
    CaseInsensitiveMatch,
    FuzzyMatch,
    NoMatch,
}

/// A candidate authority attribute for one source tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestion {
    /// Absent for `NoMatch`
    pub authority_attribute: Option<String>,
    /// 0..=100
    pub confidence: u8,
    pub reason: MatchReason,
}

impl MappingSuggestion {
    pub fn no_match() -> Self {
        Self {
            authority_attribute: None,
            confidence: 0,
            reason: MatchReason::NoMatch,
        }
    }
}

/// Ranked suggestions for a single tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSuggestions {
    pub tag: String,
    pub suggestions: Vec<MappingSuggestion>,
    /// True when no attribute matches exactly, so creating one is an option
    pub can_create_new: bool,
}

impl TagSuggestions {
    pub fn best(&self) -> Option<&MappingSuggestion> {
        self.suggestions.first()
    }
}

/// Transform applied to a tag value before it is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueTransform {
    #[default]
    None,
    Uppercase,
    Lowercase,
    Capitalize,
}

impl ValueTransform {
    pub fn apply(&self, value: &str) -> String {
        match self {
            ValueTransform::None => value.to_string(),
            ValueTransform::Uppercase => value.to_uppercase(),
            ValueTransform::Lowercase => value.to_lowercase(),
            ValueTransform::Capitalize => {
                let mut chars = value.chars();
                match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.as_str().to_lowercase().chars())
                        .collect(),
                    None => String::new(),
                }
            }
        }
    }
}

/// Target of one mapping entry; accepts a bare attribute name or an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MappingTargetRepr")]
pub struct MappingTarget {
    pub attribute: String,
    #[serde(default)]
    pub transform: ValueTransform,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MappingTargetRepr {
    Name(String),
    Full {
        attribute: String,
        #[serde(default)]
        transform: ValueTransform,
    },
}

impl From<MappingTargetRepr> for MappingTarget {
    fn from(repr: MappingTargetRepr) -> Self {
        match repr {
            MappingTargetRepr::Name(attribute) => MappingTarget::new(attribute),
            MappingTargetRepr::Full {
                attribute,
                transform,
            } => MappingTarget {
                attribute,
                transform,
            },
        }
    }
}

impl MappingTarget {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            transform: ValueTransform::None,
        }
    }

    pub fn with_transform(mut self, transform: ValueTransform) -> Self {
        self.transform = transform;
        self
    }
}

/// Editable tag-to-attribute mapping
///
/// Tags without an entry are dropped during projection. Entries whose target
/// attribute is empty are treated as rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    #[serde(default)]
    pub entries: BTreeMap<String, MappingTarget>,
    /// Permit several tags to feed the same attribute
    #[serde(default)]
    pub allow_shared_targets: bool,
}

impl AttributeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a mapping from the best suggestion of each tag
    pub fn from_suggestions(suggestions: &[TagSuggestions], min_confidence: u8) -> Self {
        let mut mapping = Self::new();
        for tag in suggestions {
            let best = tag
                .best()
                .filter(|s| s.reason != MatchReason::NoMatch && s.confidence >= min_confidence);
            if let Some(attribute) = best.and_then(|s| s.authority_attribute.as_deref()) {
                mapping.accept(&tag.tag, attribute);
            }
        }
        mapping
    }

    pub fn accept(&mut self, tag: &str, attribute: &str) {
        self.set(tag, MappingTarget::new(attribute));
    }

    pub fn set(&mut self, tag: &str, target: MappingTarget) {
        if target.attribute.trim().is_empty() {
            self.reject(tag);
        } else {
            self.entries.insert(tag.to_string(), target);
        }
    }

    pub fn reject(&mut self, tag: &str) {
        self.entries.remove(tag);
    }

    pub fn get(&self, tag: &str) -> Option<&MappingTarget> {
        self.entries.get(tag)
    }

    pub fn len(&self) -> usize {
        self.active().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn active(&self) -> impl Iterator<Item = (&String, &MappingTarget)> {
        self.entries
            .iter()
            .filter(|(_, target)| !target.attribute.trim().is_empty())
    }

    /// Check every target exists and, unless allowed, is used only once
    pub fn validate(&self, schema: &AttributeSchema) -> Result<(), ValidationError> {
        let mut by_target: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (tag, target) in self.active() {
            if !schema.contains(&target.attribute) {
                return Err(ValidationError::UnknownAttribute {
                    tag: tag.clone(),
                    attribute: target.attribute.clone(),
                });
            }
            by_target
                .entry(target.attribute.as_str())
                .or_default()
                .push(tag.clone());
        }

        if !self.allow_shared_targets {
            if let Some((attribute, tags)) = by_target.into_iter().find(|(_, tags)| tags.len() > 1)
            {
                return Err(ValidationError::SharedTarget {
                    attribute: attribute.to_string(),
                    tags,
                });
            }
        }
        Ok(())
    }

    /// Validate against the schema and produce the immutable form
    pub fn freeze(mut self, schema: &AttributeSchema) -> Result<FrozenMapping, ValidationError> {
        self.validate(schema)?;
        self.entries
            .retain(|_, target| !target.attribute.trim().is_empty());
        Ok(FrozenMapping(Arc::new(self)))
    }
}

/// A validated mapping; cheap to clone and never modified
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenMapping(Arc<AttributeMapping>);

impl FrozenMapping {
    pub fn mapping(&self) -> &AttributeMapping {
        &self.0
    }

    /// Target attribute names in tag order
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.0.entries.values().map(|t| t.attribute.as_str())
    }

    /// Project source tags onto authority attributes
    ///
    /// Unmapped tags and blank values are dropped. When several tags feed the
    /// same attribute the first tag in lexicographic order wins.
    pub fn project(&self, attributes: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut projected = BTreeMap::new();
        for (tag, value) in attributes {
            let Some(target) = self.0.entries.get(tag) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            projected
                .entry(target.attribute.clone())
                .or_insert_with(|| target.transform.apply(value));
        }
        projected
    }
}
