//! Common step definitions used across features

use cucumber::gherkin::Step;
use cucumber::given;

use crate::features::support::TestWorld;
use ddi_sync::models::{AttributeDefinition, AttributeType};

/// Rows of a step table as (header, cell) maps, header row skipped
pub fn table_rows(step: &Step) -> Vec<Vec<(String, String)>> {
    let table = step.table.as_ref().expect("step requires a table");
    let header = &table.rows[0];
    table.rows[1..]
        .iter()
        .map(|row| {
            header
                .iter()
                .cloned()
                .zip(row.iter().map(|cell| cell.trim().to_string()))
                .collect()
        })
        .collect()
}

pub fn cell<'a>(row: &'a [(String, String)], column: &str) -> &'a str {
    row.iter()
        .find(|(name, _)| name == column)
        .map(|(_, value)| value.as_str())
        .unwrap_or_else(|| panic!("missing column {}", column))
}

#[given("the authority defines the attributes:")]
async fn authority_defines_attributes(world: &mut TestWorld, step: &Step) {
    world.definitions = table_rows(step)
        .iter()
        .map(|row| {
            let attribute_type: AttributeType =
                serde_json::from_value(serde_json::json!(cell(row, "type")))
                    .expect("known attribute type");
            AttributeDefinition::new(cell(row, "name"), attribute_type)
        })
        .collect();
}

#[given(expr = "the tag {string} is mapped to {string}")]
async fn tag_is_mapped(world: &mut TestWorld, tag: String, attribute: String) {
    world.mapping.accept(&tag, &attribute);
}
