//! Mention extraction: candidate entity spans in a raw question.
//!
//! Two stages behind one trait. The primary extractor asks the generation
//! model for named entities as JSON; the heuristic extractor recovers
//! probable names and codes with ordered patterns when the model yields
//! nothing (or is unavailable). A proper-noun supplement scan always runs,
//! catching names the primary stage missed.

use crate::error::{AssistantError, Result};
use crate::index::EntityCategory;
use crate::llm::GenerativeModel;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Model- or pattern-provided label for a mention, before category inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryHint {
    Person,
    Org,
    Gpe,
    Loc,
    PersonCandidate,
    LocationCode,
    Code,
    Other(String),
}

impl CategoryHint {
    pub fn from_label(label: &str) -> Self {
        match label.to_uppercase().as_str() {
            "PERSON" => CategoryHint::Person,
            "ORG" => CategoryHint::Org,
            "GPE" => CategoryHint::Gpe,
            "LOC" | "LOCATION" | "FAC" => CategoryHint::Loc,
            "PERSON_CANDIDATE" => CategoryHint::PersonCandidate,
            other => CategoryHint::Other(other.to_string()),
        }
    }

    /// Categories worth searching for a mention carrying this hint.
    pub fn plausible_categories(&self) -> Vec<EntityCategory> {
        match self {
            CategoryHint::Person | CategoryHint::PersonCandidate => vec![EntityCategory::Person],
            CategoryHint::Org => vec![EntityCategory::Department, EntityCategory::Place],
            CategoryHint::Gpe | CategoryHint::Loc | CategoryHint::LocationCode => {
                vec![EntityCategory::Place]
            }
            CategoryHint::Code => vec![EntityCategory::Activity, EntityCategory::Place],
            CategoryHint::Other(_) => EntityCategory::ALL.to_vec(),
        }
    }
}

/// Candidate entity span. Offsets are byte positions into the source
/// question, always on UTF-8 boundaries.
#[derive(Debug, Clone)]
pub struct MentionCandidate {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub hint: CategoryHint,
    pub confidence: f64,
}

#[async_trait]
pub trait MentionExtractor: Send + Sync {
    async fn extract(&self, question: &str) -> Result<Vec<MentionCandidate>>;
}

/// Named-entity extraction through the generation model.
pub struct ModelMentionExtractor {
    model: Arc<dyn GenerativeModel>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    text: String,
    label: String,
}

impl ModelMentionExtractor {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl MentionExtractor for ModelMentionExtractor {
    async fn extract(&self, question: &str) -> Result<Vec<MentionCandidate>> {
        let prompt = format!(
            r#"Extract named entities from this question about a workforce time-tracking database.
Labels: PERSON (people), ORG (departments, organizations), GPE (places), LOC (locations, sites).

QUESTION: "{}"

Return JSON only (no markdown, no explanations):
[{{"text": "Rosalinda Rodriguez", "label": "PERSON"}}]

Return [] if there are no named entities.

JSON:"#,
            question
        );

        let response = self.model.generate(&prompt).await?;
        let cleaned = response
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let raw: Vec<RawEntity> = serde_json::from_str(cleaned).map_err(|e| {
            AssistantError::Extraction(format!(
                "Failed to parse entity response: {}. Response: {}",
                e, cleaned
            ))
        })?;

        let mut candidates = Vec::new();
        for entity in raw {
            // Locate the span in the question; entities the model invented
            // (not present verbatim) are dropped.
            if let Some(start) = find_case_insensitive(question, &entity.text) {
                let end = start + entity.text.len();
                candidates.push(MentionCandidate {
                    text: question[start..end].to_string(),
                    start,
                    end,
                    hint: CategoryHint::from_label(&entity.label),
                    confidence: 1.0,
                });
            }
        }

        debug!(count = candidates.len(), "model extraction");
        Ok(candidates)
    }
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .to_lowercase()
        .find(&needle.to_lowercase())
        .filter(|&pos| haystack.is_char_boundary(pos) && haystack.is_char_boundary(pos + needle.len()))
}

lazy_static! {
    /// Ordered fallback patterns: verb-led name, name-led verb, any
    /// capitalized bigram.
    static ref VERB_NAME: Regex =
        Regex::new(r"(?:(?i:where does|who is|find|locate))\s+([A-Z][a-z]+\s+[A-Z][a-z]+)").unwrap();
    static ref NAME_VERB: Regex =
        Regex::new(r"([A-Z][a-z]+\s+[A-Z][a-z]+)\s+(?:(?i:work|works|working))").unwrap();
    static ref CAP_BIGRAM: Regex = Regex::new(r"\b([A-Z][a-z]+\s+[A-Z][a-z]+)\b").unwrap();
    /// Short numeric codes with an optional trailing letter ("061", "061x").
    static ref LOCATION_CODE: Regex = Regex::new(r"\b(\d{2,4}[A-Za-z]?)\b").unwrap();
    static ref WORD: Regex = Regex::new(r"\b[A-Za-z]+\b").unwrap();
}

/// Question-leading words that look like proper nouns but never name entities.
const QUESTION_WORDS: &[&str] = &[
    "which", "where", "what", "who", "whom", "when", "why", "how", "show", "list", "find",
    "locate", "give", "tell", "does", "the", "please", "many", "much",
];

/// Pattern-based extraction used when the model stage yields nothing.
#[derive(Debug, Default)]
pub struct HeuristicMentionExtractor;

impl HeuristicMentionExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Ordered fallback patterns for probable person names and codes.
    pub fn fallback_candidates(&self, question: &str) -> Vec<MentionCandidate> {
        let mut candidates = Vec::new();

        for (pattern, confidence) in [(&*VERB_NAME, 0.8), (&*NAME_VERB, 0.8), (&*CAP_BIGRAM, 0.8)] {
            for caps in pattern.captures_iter(question) {
                if let Some(m) = caps.get(1) {
                    candidates.push(MentionCandidate {
                        text: m.as_str().to_string(),
                        start: m.start(),
                        end: m.end(),
                        hint: CategoryHint::Person,
                        confidence,
                    });
                }
            }
        }

        for caps in LOCATION_CODE.captures_iter(question) {
            if let Some(m) = caps.get(1) {
                candidates.push(MentionCandidate {
                    text: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                    hint: CategoryHint::LocationCode,
                    confidence: 0.7,
                });
            }
        }

        candidates
    }

    /// Scan for proper-noun tokens not covered by an existing candidate:
    /// consecutive pairs become person candidates, all-caps tokens become
    /// code candidates, lone capitalized tokens are weak person candidates.
    pub fn proper_noun_supplement(
        &self,
        question: &str,
        existing: &[MentionCandidate],
    ) -> Vec<MentionCandidate> {
        let covered = |start: usize, end: usize| {
            existing.iter().any(|c| start < c.end && end > c.start)
        };

        let tokens: Vec<(usize, usize, &str)> = WORD
            .find_iter(question)
            .map(|m| (m.start(), m.end(), m.as_str()))
            .collect();

        let mut supplements = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let (start, end, word) = tokens[i];
            if covered(start, end) || QUESTION_WORDS.contains(&word.to_lowercase().as_str()) {
                i += 1;
                continue;
            }

            if is_code_token(word) {
                supplements.push(MentionCandidate {
                    text: word.to_string(),
                    start,
                    end,
                    hint: CategoryHint::Code,
                    confidence: 0.7,
                });
                i += 1;
                continue;
            }

            if is_proper_noun(word) {
                if i + 1 < tokens.len() && is_proper_noun(tokens[i + 1].2) && !covered(tokens[i + 1].0, tokens[i + 1].1)
                {
                    let (_, next_end, next_word) = tokens[i + 1];
                    supplements.push(MentionCandidate {
                        text: format!("{} {}", word, next_word),
                        start,
                        end: next_end,
                        hint: CategoryHint::Person,
                        confidence: 0.9,
                    });
                    i += 2;
                    continue;
                }
                supplements.push(MentionCandidate {
                    text: word.to_string(),
                    start,
                    end,
                    hint: CategoryHint::PersonCandidate,
                    confidence: 0.7,
                });
            }
            i += 1;
        }

        supplements
    }
}

fn is_proper_noun(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {}
        _ => return false,
    }
    word.len() > 2 && chars.all(|c| c.is_lowercase())
}

fn is_code_token(word: &str) -> bool {
    (3..=8).contains(&word.len()) && word.chars().all(|c| c.is_ascii_uppercase())
}

#[async_trait]
impl MentionExtractor for HeuristicMentionExtractor {
    async fn extract(&self, question: &str) -> Result<Vec<MentionCandidate>> {
        let mut candidates = self.fallback_candidates(question);
        let supplements = self.proper_noun_supplement(question, &candidates);
        candidates.extend(supplements);
        Ok(dedupe(candidates))
    }
}

/// Primary extractor with heuristic fallback and the supplement scan.
pub struct TwoStageExtractor {
    primary: Option<Arc<dyn MentionExtractor>>,
    heuristic: HeuristicMentionExtractor,
}

impl TwoStageExtractor {
    pub fn new(primary: Option<Arc<dyn MentionExtractor>>) -> Self {
        Self {
            primary,
            heuristic: HeuristicMentionExtractor::new(),
        }
    }
}

#[async_trait]
impl MentionExtractor for TwoStageExtractor {
    async fn extract(&self, question: &str) -> Result<Vec<MentionCandidate>> {
        let mut candidates = match &self.primary {
            Some(primary) => match primary.extract(question).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "primary extractor failed, falling back to patterns");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        if candidates.is_empty() {
            candidates = self.heuristic.fallback_candidates(question);
        }

        let supplements = self.heuristic.proper_noun_supplement(question, &candidates);
        candidates.extend(supplements);

        Ok(dedupe(candidates))
    }
}

/// Deduplicate by lower-cased text, keeping the highest-confidence instance.
fn dedupe(candidates: Vec<MentionCandidate>) -> Vec<MentionCandidate> {
    let mut best: HashMap<String, MentionCandidate> = HashMap::new();
    for candidate in candidates {
        let key = candidate.text.to_lowercase();
        match best.get(&key) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_extracts_name_from_question_pattern() {
        let extractor = HeuristicMentionExtractor::new();
        let candidates = extractor
            .extract("Where does Rosalinda Rodriguz work?")
            .await
            .unwrap();

        assert!(candidates
            .iter()
            .any(|c| c.text == "Rosalinda Rodriguz" && c.hint == CategoryHint::Person));
    }

    #[tokio::test]
    async fn test_location_code_is_extracted() {
        let extractor = HeuristicMentionExtractor::new();
        let candidates = extractor
            .extract("Show me pending time entries for location 061x")
            .await
            .unwrap();

        let code = candidates.iter().find(|c| c.text == "061x").unwrap();
        assert_eq!(code.hint, CategoryHint::LocationCode);
        assert!(code.confidence < 1.0);
    }

    #[tokio::test]
    async fn test_no_mentions_in_plain_question() {
        let extractor = HeuristicMentionExtractor::new();
        let candidates = extractor
            .extract("how many hours were logged last month?")
            .await
            .unwrap();
        assert!(candidates.is_empty(), "got {:?}", candidates);
    }

    #[tokio::test]
    async fn test_dedupe_keeps_highest_confidence() {
        let candidates = vec![
            MentionCandidate {
                text: "Rosalinda Rodriguez".into(),
                start: 0,
                end: 19,
                hint: CategoryHint::PersonCandidate,
                confidence: 0.7,
            },
            MentionCandidate {
                text: "rosalinda rodriguez".into(),
                start: 0,
                end: 19,
                hint: CategoryHint::Person,
                confidence: 0.9,
            },
        ];
        let deduped = dedupe(candidates);
        assert_eq!(deduped.len(), 1);
        assert!((deduped[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_span_offsets_match_source_text() {
        let extractor = HeuristicMentionExtractor::new();
        let question = "Where does Rosalinda Rodriguz work?";
        for candidate in extractor.fallback_candidates(question) {
            assert_eq!(&question[candidate.start..candidate.end], candidate.text);
        }
    }

    #[test]
    fn test_all_caps_activity_code_supplement() {
        let extractor = HeuristicMentionExtractor::new();
        let supplements =
            extractor.proper_noun_supplement("Who worked activity DBOUTM last month?", &[]);
        let code = supplements.iter().find(|c| c.text == "DBOUTM").unwrap();
        assert_eq!(code.hint, CategoryHint::Code);
    }

    #[test]
    fn test_hint_category_mapping() {
        assert_eq!(
            CategoryHint::Person.plausible_categories(),
            vec![EntityCategory::Person]
        );
        assert_eq!(
            CategoryHint::Org.plausible_categories(),
            vec![EntityCategory::Department, EntityCategory::Place]
        );
        assert_eq!(CategoryHint::Other("MONEY".into()).plausible_categories().len(), 4);
    }
}
