//! Mapping suggestion step definitions

use cucumber::{then, when};

use crate::features::support::TestWorld;
use ddi_sync::models::{MatchReason, TagSuggestions};
use ddi_sync::services::AttributeSuggester;

fn suggestions_for<'a>(world: &'a TestWorld, tag: &str) -> &'a TagSuggestions {
    world
        .suggestions
        .iter()
        .find(|s| s.tag == tag)
        .unwrap_or_else(|| panic!("no suggestions for tag {}", tag))
}

#[when(expr = "I ask for suggestions for tag {string}")]
async fn ask_for_suggestion(world: &mut TestWorld, tag: String) {
    let suggester = AttributeSuggester::default();
    world.suggestions = suggester.suggest(&[tag], &world.schema());
}

#[when(expr = "I ask for suggestions for tags {string}")]
async fn ask_for_suggestions(world: &mut TestWorld, tags: String) {
    let tags: Vec<&str> = tags.split(',').map(str::trim).collect();
    let suggester = AttributeSuggester::default();
    world.suggestions = suggester.suggest(&tags, &world.schema());
}

#[then(expr = "the best suggestion for {string} should be {string} with reason {string}")]
async fn best_suggestion(world: &mut TestWorld, tag: String, attribute: String, reason: String) {
    let best = suggestions_for(world, &tag).best().expect("at least one suggestion");
    assert_eq!(best.authority_attribute.as_deref(), Some(attribute.as_str()));
    assert_eq!(format!("{:?}", best.reason), reason);
}

#[then(expr = "its confidence should be {int}")]
async fn best_confidence(world: &mut TestWorld, confidence: u8) {
    let tags = &world.suggestions;
    let last = tags.last().expect("suggestions requested");
    let best = last.best().expect("at least one suggestion");
    assert_eq!(best.confidence, confidence);
}

#[then(expr = "its confidence should be between {int} and {int}")]
async fn best_confidence_between(world: &mut TestWorld, low: u8, high: u8) {
    let last = world.suggestions.last().expect("suggestions requested");
    let best = last.best().expect("at least one suggestion");
    assert!(
        (low..=high).contains(&best.confidence),
        "confidence {} outside {}..={}",
        best.confidence,
        low,
        high
    );
}

#[then(expr = "the tag {string} should have no match")]
async fn no_match(world: &mut TestWorld, tag: String) {
    let suggestions = suggestions_for(world, &tag);
    assert_eq!(suggestions.suggestions.len(), 1);
    assert_eq!(suggestions.suggestions[0].reason, MatchReason::NoMatch);
    assert_eq!(suggestions.suggestions[0].confidence, 0);
    assert!(suggestions.suggestions[0].authority_attribute.is_none());
}

#[then(expr = "a new attribute should be offered for {string}")]
async fn new_attribute_offered(world: &mut TestWorld, tag: String) {
    assert!(suggestions_for(world, &tag).can_create_new);
}

#[then(expr = "a new attribute should not be offered for {string}")]
async fn new_attribute_not_offered(world: &mut TestWorld, tag: String) {
    assert!(!suggestions_for(world, &tag).can_create_new);
}

#[then(expr = "suggestions should be returned for {int} tag(s)")]
async fn suggestion_count(world: &mut TestWorld, count: usize) {
    assert_eq!(world.suggestions.len(), count);
}

#[then(expr = "the suggestions for {string} should be ranked by confidence")]
async fn ranked_by_confidence(world: &mut TestWorld, tag: String) {
    let confidences: Vec<u8> = suggestions_for(world, &tag)
        .suggestions
        .iter()
        .map(|s| s.confidence)
        .collect();
    assert!(confidences.windows(2).all(|pair| pair[0] >= pair[1]));
}
