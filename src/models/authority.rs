//! Objects owned by the DDI authority

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Cidr;
use crate::utils::error::ValidationError;

/// A network view (routing domain) on the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkView {
    #[serde(rename = "_ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Declared type of an extensible attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeType {
    #[default]
    String,
    Integer,
    Email,
    Url,
    Date,
    Enum,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: String,
}

/// Extensible attribute definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub attribute_type: AttributeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list_values: Vec<EnumValue>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            comment: None,
            list_values: Vec::new(),
        }
    }
}

/// The set of attribute definitions known to the authority, keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSchema {
    definitions: BTreeMap<String, AttributeDefinition>,
}

impl AttributeSchema {
    pub fn new(definitions: impl IntoIterator<Item = AttributeDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|def| (def.name.clone(), def))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Attribute names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl From<Vec<AttributeDefinition>> for AttributeSchema {
    fn from(definitions: Vec<AttributeDefinition>) -> Self {
        Self::new(definitions)
    }
}

/// Wrapped extensible attribute value as returned by the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtAttrValue {
    pub value: serde_json::Value,
}

/// A network object as stored on the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityNetwork {
    #[serde(rename = "_ref")]
    pub reference: String,
    pub network: String,
    #[serde(default)]
    pub network_view: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub extattrs: BTreeMap<String, ExtAttrValue>,
}

impl AuthorityNetwork {
    pub fn cidr(&self) -> Result<Cidr, ValidationError> {
        self.network.parse()
    }

    /// Attribute value rendered as a trimmed string
    pub fn attribute_value(&self, name: &str) -> Option<String> {
        self.extattrs.get(name).map(|attr| match &attr.value {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
    }
}
