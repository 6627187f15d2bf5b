//! Reconciliation step definitions

use cucumber::gherkin::Step;
use cucumber::{given, then, when};
use serde_json::json;

use super::common_steps::{cell, table_rows};
use crate::features::support::TestWorld;
use ddi_sync::models::{AuthorityNetwork, NetworkRecord, RecordSource};
use ddi_sync::services::classify;

#[given("the authority holds the networks:")]
async fn authority_holds_networks(world: &mut TestWorld, step: &Step) {
    world.authority_networks = table_rows(step)
        .iter()
        .map(|row| {
            let cidr = cell(row, "cidr");
            let view = cell(row, "view");
            let extattrs: serde_json::Map<String, serde_json::Value> = row
                .iter()
                .filter(|(name, value)| name != "cidr" && name != "view" && !value.is_empty())
                .map(|(name, value)| (name.clone(), json!({ "value": value })))
                .collect();
            serde_json::from_value::<AuthorityNetwork>(json!({
                "_ref": format!("network/ZG5z:{}/{}", cidr, view),
                "network": cidr,
                "network_view": view,
                "extattrs": extattrs,
            }))
            .expect("valid network")
        })
        .collect();
}

#[given("the inventory records:")]
async fn inventory_records(world: &mut TestWorld, step: &Step) {
    world.records = table_rows(step)
        .iter()
        .map(|row| {
            let cidr = cell(row, "cidr").parse().expect("valid CIDR");
            row.iter()
                .filter(|(name, value)| name != "cidr" && !value.is_empty())
                .fold(
                    NetworkRecord::new(cidr, RecordSource::Aws),
                    |record, (tag, value)| record.with_attribute(tag.as_str(), value.as_str()),
                )
        })
        .collect();
}

#[when(expr = "I classify the records against view {string}")]
async fn classify_records(world: &mut TestWorld, view: String) {
    let schema = world.schema();
    let outcome = world
        .mapping
        .clone()
        .freeze(&schema)
        .and_then(|mapping| classify(&world.records, &mapping, &view, &world.authority_networks))
        .map_err(|e| e.to_string());
    world.classification = Some(outcome);
}

#[then(expr = "{int} record(s) should be new")]
async fn new_count(world: &mut TestWorld, count: usize) {
    assert_eq!(world.classification().new.len(), count);
}

#[then(expr = "{int} record(s) should be unchanged")]
async fn unchanged_count(world: &mut TestWorld, count: usize) {
    assert_eq!(world.classification().existing_unchanged.len(), count);
}

#[then(expr = "{int} record(s) should be conflicting")]
async fn conflicting_count(world: &mut TestWorld, count: usize) {
    assert_eq!(world.classification().existing_conflicting.len(), count);
}

#[then(expr = "the conflict for {string} should change {string} from {string} to {string}")]
async fn conflict_changes(
    world: &mut TestWorld,
    cidr: String,
    attribute: String,
    from: String,
    to: String,
) {
    let conflict = world
        .classification()
        .existing_conflicting
        .iter()
        .find(|c| c.record.cidr.to_string() == cidr)
        .unwrap_or_else(|| panic!("{} is not conflicting", cidr));
    let diff = conflict
        .differences
        .iter()
        .find(|d| d.attribute == attribute)
        .unwrap_or_else(|| panic!("{} has no difference on {}", cidr, attribute));

    let expected_from = if from.is_empty() { None } else { Some(from) };
    assert_eq!(diff.authority_value, expected_from);
    assert_eq!(diff.incoming_value, to);
}

#[then(expr = "the conflict for {string} should be a view mismatch found in {string}")]
async fn conflict_view_mismatch(world: &mut TestWorld, cidr: String, view: String) {
    let conflict = world
        .classification()
        .existing_conflicting
        .iter()
        .find(|c| c.record.cidr.to_string() == cidr)
        .unwrap_or_else(|| panic!("{} is not conflicting", cidr));
    let mismatch = conflict.view_mismatch.as_ref().expect("view mismatch reported");
    assert!(conflict.authority_ref.is_none());
    assert!(mismatch.found_in.contains(&view));
}

#[then("classifying again gives the same result")]
async fn classification_is_idempotent(world: &mut TestWorld) {
    let first = world.classification().clone();
    let mapping = world.mapping.clone().freeze(&world.schema()).expect("valid mapping");
    let second = classify(
        &world.records,
        &mapping,
        &first.network_view,
        &world.authority_networks,
    )
    .expect("classification succeeds");
    assert_eq!(first, second);
}

#[then(expr = "classification should fail with {string}")]
async fn classification_fails(world: &mut TestWorld, message: String) {
    match &world.classification {
        Some(Err(e)) => assert!(e.contains(&message), "'{}' does not mention '{}'", e, message),
        Some(Ok(_)) => panic!("Classification unexpectedly succeeded"),
        None => panic!("No classification has been run"),
    }
}
