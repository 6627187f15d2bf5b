//! Attribute mapping suggestions
//!
//! Ranks the authority's extensible attributes as targets for each source
//! tag. Rules are tried in order per candidate: exact name, case-insensitive
//! name, then fuzzy similarity of normalized names. Output is deterministic
//! for a given input and configuration.

use std::collections::{HashMap, HashSet};

use crate::config::{SimilarityMetric, SuggesterConfig};
use crate::models::{AttributeSchema, MappingSuggestion, MatchReason, TagSuggestions};

const EXACT_CONFIDENCE: u8 = 100;
const CASE_INSENSITIVE_CONFIDENCE: u8 = 90;
const SYNONYM_SIMILARITY: f64 = 0.95;
const SUBSTRING_SIMILARITY: f64 = 0.85;
const MIN_SUBSTRING_LEN: usize = 3;

/// Case-fold and drop everything but letters and digits
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split on separators and camelCase boundaries, lowercased
pub fn tokenize(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }

        let boundary = c.is_uppercase()
            && i > 0
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_ascii_digit()
                || (chars[i - 1].is_uppercase()
                    && chars.get(i + 1).is_some_and(|next| next.is_lowercase())));
        if boundary && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current.extend(c.to_lowercase());
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn token_overlap(a: &str, b: &str) -> f64 {
    let left: HashSet<String> = tokenize(a).into_iter().collect();
    let right: HashSet<String> = tokenize(b).into_iter().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union as f64
}

/// Suggests authority attributes for source tags
#[derive(Debug, Clone)]
pub struct AttributeSuggester {
    config: SuggesterConfig,
    /// Normalized name to synonym group index
    synonyms: HashMap<String, usize>,
}

impl Default for AttributeSuggester {
    fn default() -> Self {
        Self::new(SuggesterConfig::default())
    }
}

impl AttributeSuggester {
    pub fn new(config: SuggesterConfig) -> Self {
        let synonyms = config
            .synonyms
            .iter()
            .enumerate()
            .flat_map(|(group, names)| names.iter().map(move |name| (normalize_name(name), group)))
            .collect();
        Self { config, synonyms }
    }

    pub fn config(&self) -> &SuggesterConfig {
        &self.config
    }

    /// Similarity of two names in 0.0..=1.0 under the configured metric
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let left = normalize_name(a);
        let right = normalize_name(b);
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }
        if left == right {
            return 1.0;
        }

        let mut score = match self.config.metric {
            SimilarityMetric::Levenshtein => strsim::normalized_levenshtein(&left, &right),
            SimilarityMetric::JaroWinkler => strsim::jaro_winkler(&left, &right),
            SimilarityMetric::TokenOverlap => token_overlap(a, b),
            SimilarityMetric::Combined => strsim::normalized_levenshtein(&left, &right)
                .max(strsim::jaro_winkler(&left, &right))
                .max(token_overlap(a, b)),
        };

        if let (Some(x), Some(y)) = (self.synonyms.get(&left), self.synonyms.get(&right)) {
            if x == y {
                score = score.max(SYNONYM_SIMILARITY);
            }
        }

        if left.len().min(right.len()) >= MIN_SUBSTRING_LEN
            && (left.contains(&right) || right.contains(&left))
        {
            score = score.max(SUBSTRING_SIMILARITY);
        }

        score
    }

    /// Map a similarity at or above the threshold onto the fuzzy confidence band
    fn fuzzy_confidence(&self, similarity: f64) -> u8 {
        let floor = self.config.fuzzy_min_confidence as f64;
        let ceiling = self.config.fuzzy_max_confidence as f64;
        let threshold = self.config.threshold;

        let position = if threshold >= 1.0 {
            1.0
        } else {
            ((similarity - threshold) / (1.0 - threshold)).clamp(0.0, 1.0)
        };
        (floor + position * (ceiling - floor)).round().clamp(floor, ceiling) as u8
    }

    fn score(&self, tag: &str, attribute: &str) -> Option<MappingSuggestion> {
        let (confidence, reason) = if tag == attribute {
            (EXACT_CONFIDENCE, MatchReason::ExactMatch)
        } else if tag.to_lowercase() == attribute.to_lowercase() {
            (CASE_INSENSITIVE_CONFIDENCE, MatchReason::CaseInsensitiveMatch)
        } else {
            let similarity = self.similarity(tag, attribute);
            if similarity < self.config.threshold {
                return None;
            }
            (self.fuzzy_confidence(similarity), MatchReason::FuzzyMatch)
        };

        Some(MappingSuggestion {
            authority_attribute: Some(attribute.to_string()),
            confidence,
            reason,
        })
    }

    /// Ranked candidates for one tag
    pub fn suggest_tag(&self, tag: &str, schema: &AttributeSchema) -> TagSuggestions {
        let mut suggestions: Vec<MappingSuggestion> = schema
            .names()
            .filter_map(|attribute| self.score(tag, attribute))
            .collect();

        suggestions.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.authority_attribute.cmp(&b.authority_attribute))
        });
        if self.config.max_suggestions > 0 {
            suggestions.truncate(self.config.max_suggestions);
        }

        let can_create_new = !suggestions
            .iter()
            .any(|s| s.reason == MatchReason::ExactMatch);
        if suggestions.is_empty() {
            suggestions.push(MappingSuggestion::no_match());
        }

        TagSuggestions {
            tag: tag.to_string(),
            suggestions,
            can_create_new,
        }
    }

    /// Suggestions for each distinct tag, in first-seen order
    pub fn suggest<S: AsRef<str>>(&self, tags: &[S], schema: &AttributeSchema) -> Vec<TagSuggestions> {
        let mut seen = HashSet::new();
        tags.iter()
            .map(AsRef::as_ref)
            .filter(|tag| seen.insert(*tag))
            .map(|tag| self.suggest_tag(tag, schema))
            .collect()
    }
}
