//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{AttributeDefinition, AttributeType};

/// Extensible attribute names accepted by the authority
static ATTRIBUTE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").unwrap());

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?\.)*[a-zA-Z0-9-]+(?::\d+)?(?:/\S*)?$")
        .unwrap()
});

/// Field names of the network object that cannot be reused as attributes
pub const RESERVED_ATTRIBUTE_NAMES: &[&str] = &["network", "network_view", "comment", "_ref"];

pub const MAX_ATTRIBUTE_NAME_LEN: usize = 64;

/// Check a proposed attribute name, returning the reason it is rejected
pub fn check_attribute_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_ATTRIBUTE_NAME_LEN {
        return Err(format!(
            "must be between 1 and {} characters",
            MAX_ATTRIBUTE_NAME_LEN
        ));
    }
    if !ATTRIBUTE_NAME_REGEX.is_match(name) {
        return Err(
            "must start with a letter and contain only letters, digits and underscores"
                .to_string(),
        );
    }
    if RESERVED_ATTRIBUTE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err("is reserved".to_string());
    }
    Ok(())
}

/// Validate an attribute name
pub fn validate_attribute_name(name: &str) -> bool {
    check_attribute_name(name).is_ok()
}

/// Check a value against the declared type of an attribute
pub fn check_attribute_value(definition: &AttributeDefinition, value: &str) -> Result<(), String> {
    match definition.attribute_type {
        AttributeType::Integer => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| format!("'{}' is not an integer", value)),
        AttributeType::Email => {
            if EMAIL_REGEX.is_match(value) {
                Ok(())
            } else {
                Err(format!("'{}' is not an email address", value))
            }
        }
        AttributeType::Url => {
            if URL_REGEX.is_match(value) {
                Ok(())
            } else {
                Err(format!("'{}' is not a URL", value))
            }
        }
        AttributeType::Date => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|_| ())
            .or_else(|_| chrono::DateTime::parse_from_rfc3339(value).map(|_| ()))
            .map_err(|_| format!("'{}' is not a date", value)),
        AttributeType::Enum => {
            if definition.list_values.is_empty()
                || definition.list_values.iter().any(|v| v.value == value)
            {
                Ok(())
            } else {
                Err(format!(
                    "'{}' is not one of: {}",
                    value,
                    definition
                        .list_values
                        .iter()
                        .map(|v| v.value.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }
        }
        AttributeType::String | AttributeType::Other => Ok(()),
    }
}
