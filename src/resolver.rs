//! Entity resolution: map fuzzy mentions in a question to exact database
//! values and rewrite the question with them.
//!
//! Resolution is advisory. Any internal failure degrades to "use the original
//! question" and is reported in the result status, never raised to the caller.

use crate::error::Result;
use crate::extract::{MentionCandidate, MentionExtractor};
use crate::index::{EntityCategory, EntityIndex, EntityMatch};
use crate::session::TurnContext;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a resolution attempt ended. `Degraded` means a subsystem failed and
/// the original question was passed through; callers that care can tell this
/// apart from a clean "nothing to resolve".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    Resolved,
    NoMentions,
    Degraded(String),
}

/// Aggregate result of resolving one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub original_query: String,
    pub enhanced_query: String,
    pub resolved_entities: Vec<EntityMatch>,
    pub overall_confidence: f64,
    pub used_fallback: bool,
    pub status: ResolutionStatus,
}

impl ResolutionResult {
    fn passthrough(question: &str, status: ResolutionStatus) -> Self {
        Self {
            original_query: question.to_string(),
            enhanced_query: question.to_string(),
            resolved_entities: Vec::new(),
            overall_confidence: 1.0,
            used_fallback: false,
            status,
        }
    }
}

/// One "did you mean" candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub original: String,
    pub suggestion: String,
    pub confidence: f64,
    pub category: EntityCategory,
    pub reason: String,
}

/// Analysis attached to a zero-row result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoResultsAnalysis {
    pub likely_issues: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    pub recommended_actions: Vec<String>,
}

pub struct EntityResolver {
    extractor: Arc<dyn MentionExtractor>,
    index: Arc<EntityIndex>,
    min_query_confidence: f64,
    exploration_threshold: f64,
    max_suggestions_per_entity: usize,
}

impl EntityResolver {
    pub fn new(
        extractor: Arc<dyn MentionExtractor>,
        index: Arc<EntityIndex>,
        min_query_confidence: f64,
        exploration_threshold: f64,
        max_suggestions_per_entity: usize,
    ) -> Self {
        Self {
            extractor,
            index,
            min_query_confidence,
            exploration_threshold,
            max_suggestions_per_entity,
        }
    }

    /// Resolve every mention in `question` and splice the canonical values
    /// into the query text. Never fails: errors degrade to the original
    /// question with the reason recorded in the status.
    pub async fn enhance_query(
        &self,
        question: &str,
        context: Option<&TurnContext>,
    ) -> ResolutionResult {
        match self.try_enhance(question, context).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "entity resolution degraded, using original query");
                ResolutionResult::passthrough(question, ResolutionStatus::Degraded(e.to_string()))
            }
        }
    }

    async fn try_enhance(
        &self,
        question: &str,
        context: Option<&TurnContext>,
    ) -> Result<ResolutionResult> {
        let candidates = self.extractor.extract(question).await?;
        if candidates.is_empty() {
            debug!("no mentions extracted");
            return Ok(ResolutionResult::passthrough(
                question,
                ResolutionStatus::NoMentions,
            ));
        }

        // Rightmost-first, so earlier spans stay valid while later ones are
        // rewritten.
        let ordered: Vec<&MentionCandidate> = candidates
            .iter()
            .sorted_by(|a, b| b.start.cmp(&a.start))
            .collect();

        let mut enhanced = question.to_string();
        let mut resolved: Vec<EntityMatch> = Vec::new();
        let mut accepted_spans: Vec<(usize, usize)> = Vec::new();

        for candidate in ordered {
            if accepted_spans
                .iter()
                .any(|&(s, e)| candidate.start < e && candidate.end > s)
            {
                continue;
            }

            // Mentions already resolved on the previous turn are canonical;
            // skip the index round-trip.
            if let Some(ctx) = context {
                if ctx
                    .resolved_entities
                    .iter()
                    .any(|e| e.resolved_text.eq_ignore_ascii_case(&candidate.text))
                {
                    debug!(text = %candidate.text, "mention already canonical from previous turn");
                    continue;
                }
            }

            let Some(best) = self.best_match(candidate).await? else {
                continue;
            };

            enhanced = format!(
                "{}{}{}",
                &enhanced[..candidate.start],
                best.resolved_text,
                &enhanced[candidate.end..]
            );
            accepted_spans.push((candidate.start, candidate.end));
            info!(
                original = %best.original_text,
                resolved = %best.resolved_text,
                confidence = best.confidence,
                "resolved mention"
            );
            resolved.push(best);
        }

        let overall_confidence = Self::weighted_confidence(&resolved);
        let used_fallback = overall_confidence < self.min_query_confidence;
        let status = if resolved.is_empty() {
            ResolutionStatus::NoMentions
        } else {
            ResolutionStatus::Resolved
        };

        Ok(ResolutionResult {
            original_query: question.to_string(),
            enhanced_query: if used_fallback {
                question.to_string()
            } else {
                enhanced
            },
            resolved_entities: resolved,
            overall_confidence,
            used_fallback,
            status,
        })
    }

    /// Best accepted match for one mention across its plausible categories.
    async fn best_match(&self, candidate: &MentionCandidate) -> Result<Option<EntityMatch>> {
        let mut best: Option<EntityMatch> = None;
        for category in candidate.hint.plausible_categories() {
            let matches = self.index.search(&candidate.text, category, 1).await?;
            if let Some(m) = matches.into_iter().next() {
                if best.as_ref().map_or(true, |b| m.confidence > b.confidence) {
                    best = Some(m);
                }
            }
        }
        Ok(best)
    }

    /// Length-weighted average: long matched spans dominate, so a resolved
    /// two-word name outweighs a one-letter false positive. Full confidence
    /// when nothing was resolved (the original text stands as-is).
    fn weighted_confidence(resolved: &[EntityMatch]) -> f64 {
        if resolved.is_empty() {
            return 1.0;
        }
        let mut total_weight = 0.0;
        let mut weighted = 0.0;
        for entity in resolved {
            let weight = entity.original_text.len() as f64;
            weighted += entity.confidence * weight;
            total_weight += weight;
        }
        if total_weight == 0.0 {
            return 0.0;
        }
        weighted / total_weight
    }

    /// Context block describing each resolution, for the generation prompt.
    pub fn resolution_context(&self, result: &ResolutionResult) -> String {
        if result.resolved_entities.is_empty() {
            return String::new();
        }

        let mut parts = vec!["ENTITY RESOLUTION CONTEXT:".to_string()];
        for entity in &result.resolved_entities {
            parts.push(format!(
                "- User input '{}' resolved to '{}' (category: {}, confidence: {:.2})",
                entity.original_text, entity.resolved_text, entity.category, entity.confidence
            ));
        }
        if result.used_fallback {
            parts.push("Note: low confidence resolution, using original query".to_string());
        } else {
            parts.push(format!(
                "Overall confidence: {:.2}",
                result.overall_confidence
            ));
        }
        parts.push(String::new());
        parts.join("\n")
    }

    /// Top correction candidates per mention, near-misses included (no
    /// acceptance cutoff), identical values excluded.
    pub async fn suggest_corrections(
        &self,
        question: &str,
        max_per_entity: Option<usize>,
    ) -> Vec<Suggestion> {
        let max_per_entity = max_per_entity.unwrap_or(self.max_suggestions_per_entity);

        let candidates = match self.extractor.extract(question).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "extraction failed, no suggestions");
                return Vec::new();
            }
        };

        let mut suggestions: Vec<Suggestion> = Vec::new();
        for candidate in &candidates {
            for category in candidate.hint.plausible_categories() {
                let matches = match self
                    .index
                    .search_with_threshold(&candidate.text, category, max_per_entity, 0.0)
                    .await
                {
                    Ok(matches) => matches,
                    Err(e) => {
                        warn!(error = %e, %category, "suggestion search failed");
                        continue;
                    }
                };

                for m in matches {
                    if m.resolved_text.eq_ignore_ascii_case(&candidate.text) {
                        continue;
                    }
                    suggestions.push(Suggestion {
                        original: candidate.text.clone(),
                        suggestion: m.resolved_text,
                        confidence: m.confidence,
                        category,
                        reason: format!("Similar {} found", category),
                    });
                }
            }
        }

        suggestions
            .into_iter()
            .sorted_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .take(max_per_entity * 2)
            .collect()
    }

    /// Whether a value exists in the database, judged by a very high
    /// confidence match in its category.
    pub async fn entity_exists(&self, text: &str, category: EntityCategory) -> bool {
        match self.index.search_with_threshold(text, category, 1, 0.9).await {
            Ok(matches) => !matches.is_empty(),
            Err(e) => {
                warn!(error = %e, "existence check failed");
                false
            }
        }
    }

    /// Analysis for a syntactically valid query that returned zero rows.
    pub async fn handle_no_results_case(
        &self,
        original_query: &str,
        generated_sql: &str,
    ) -> NoResultsAnalysis {
        info!(query = %original_query, sql = %generated_sql, "analyzing empty result");

        let suggestions = self.suggest_corrections(original_query, None).await;
        let mut analysis = NoResultsAnalysis {
            suggestions,
            ..Default::default()
        };

        let candidates = match self.extractor.extract(original_query).await {
            Ok(candidates) => candidates,
            Err(_) => Vec::new(),
        };

        for candidate in &candidates {
            let mut has_similar = false;
            for category in candidate.hint.plausible_categories() {
                let matches = self
                    .index
                    .search_with_threshold(&candidate.text, category, 1, self.exploration_threshold)
                    .await
                    .unwrap_or_default();
                if !matches.is_empty() {
                    has_similar = true;
                    break;
                }
            }
            if has_similar {
                analysis
                    .likely_issues
                    .push(format!("'{}' might be misspelled or abbreviated", candidate.text));
            }
        }

        if !analysis.suggestions.is_empty() {
            analysis
                .recommended_actions
                .push("Try the suggested corrections above".to_string());
        }
        analysis.recommended_actions.extend([
            "Check spelling of names and locations".to_string(),
            "Try using different variations (e.g., 'HS' vs 'High School')".to_string(),
            "Verify the entity exists in the database".to_string(),
        ]);

        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::CharGramEmbedder;
    use crate::extract::HeuristicMentionExtractor;
    use std::collections::HashMap;

    async fn resolver_with(entries: &[(&str, EntityCategory)]) -> EntityResolver {
        let index = Arc::new(EntityIndex::new(Arc::new(CharGramEmbedder::new()), 0.5, None));
        for (text, category) in entries {
            index
                .insert(text, *category, HashMap::new())
                .await
                .unwrap();
        }
        EntityResolver::new(
            Arc::new(HeuristicMentionExtractor::new()),
            index,
            0.3,
            0.5,
            3,
        )
    }

    #[tokio::test]
    async fn test_no_mentions_is_full_confidence_noop() {
        let resolver = resolver_with(&[]).await;
        let result = resolver
            .enhance_query("how many hours were logged last month?", None)
            .await;

        assert_eq!(result.enhanced_query, result.original_query);
        assert_eq!(result.overall_confidence, 1.0);
        assert!(!result.used_fallback);
        assert_eq!(result.status, ResolutionStatus::NoMentions);
    }

    #[tokio::test]
    async fn test_misspelled_name_is_spliced_into_query() {
        let resolver = resolver_with(&[("Rosalinda Rodriguez", EntityCategory::Person)]).await;
        let result = resolver
            .enhance_query("Where does Rosalinda Rodriguz work?", None)
            .await;

        assert_eq!(result.status, ResolutionStatus::Resolved);
        assert_eq!(result.resolved_entities.len(), 1);
        assert_eq!(
            result.resolved_entities[0].resolved_text,
            "Rosalinda Rodriguez"
        );
        assert!(result.enhanced_query.contains("Rosalinda Rodriguez"));
        assert!(result.enhanced_query.ends_with("work?"));
        assert!(!result.used_fallback);
    }

    #[tokio::test]
    async fn test_splice_preserves_surrounding_text() {
        let resolver = resolver_with(&[
            ("Rosalinda Rodriguez", EntityCategory::Person),
            ("Marcus Webb", EntityCategory::Person),
        ])
        .await;
        let question = "Compare hours for Marcus Web and Rosalinda Rodriguz this month";
        let result = resolver.enhance_query(question, None).await;

        assert_eq!(result.resolved_entities.len(), 2);
        assert_eq!(
            result.enhanced_query,
            "Compare hours for Marcus Webb and Rosalinda Rodriguez this month"
        );
    }

    #[tokio::test]
    async fn test_unmatchable_mention_leaves_query_unchanged() {
        let resolver = resolver_with(&[("Rosalinda Rodriguez", EntityCategory::Person)]).await;
        let result = resolver
            .enhance_query("Where does Zebulon Quixote work?", None)
            .await;

        assert!(result.resolved_entities.is_empty());
        assert_eq!(result.enhanced_query, result.original_query);
        assert_eq!(result.overall_confidence, 1.0);
    }

    #[tokio::test]
    async fn test_previously_resolved_mention_is_skipped() {
        let resolver = resolver_with(&[("Rosalinda Rodriguez", EntityCategory::Person)]).await;
        let context = TurnContext::builder("s1")
            .resolved_entities(vec![EntityMatch {
                original_text: "Rosalinda Rodriguz".into(),
                resolved_text: "Rosalinda Rodriguez".into(),
                category: EntityCategory::Person,
                confidence: 0.9,
                metadata: HashMap::new(),
            }])
            .build();

        let result = resolver
            .enhance_query("Where does Rosalinda Rodriguez work?", Some(&context))
            .await;
        assert!(result.resolved_entities.is_empty());
        assert_eq!(result.enhanced_query, result.original_query);
    }

    #[tokio::test]
    async fn test_suggestions_exclude_identical_value() {
        let resolver = resolver_with(&[("Rosalinda Rodriguez", EntityCategory::Person)]).await;

        let exact = resolver
            .suggest_corrections("Where does Rosalinda Rodriguez work?", None)
            .await;
        assert!(exact.is_empty());

        let misspelled = resolver
            .suggest_corrections("Where does Rosalinda Rodriguz work?", None)
            .await;
        assert_eq!(misspelled.len(), 1);
        assert_eq!(misspelled[0].suggestion, "Rosalinda Rodriguez");
        assert_eq!(misspelled[0].category, EntityCategory::Person);
    }

    #[tokio::test]
    async fn test_no_results_analysis_flags_similar_code() {
        let resolver = resolver_with(&[("061", EntityCategory::Place)]).await;
        let analysis = resolver
            .handle_no_results_case(
                "Show pending entries for location 061x",
                "SELECT * FROM time_entry WHERE location_code = '061x'",
            )
            .await;

        assert!(analysis
            .likely_issues
            .iter()
            .any(|issue| issue.contains("061x")));
        assert!(analysis
            .suggestions
            .iter()
            .any(|s| s.original == "061x" && s.suggestion == "061"));
        assert!(!analysis.recommended_actions.is_empty());
    }

    #[tokio::test]
    async fn test_entity_existence_requires_near_exact_match() {
        let resolver = resolver_with(&[("Rosalinda Rodriguez", EntityCategory::Person)]).await;
        assert!(
            resolver
                .entity_exists("Rosalinda Rodriguez", EntityCategory::Person)
                .await
        );
        assert!(
            !resolver
                .entity_exists("Zebulon Quixote", EntityCategory::Person)
                .await
        );
    }

    #[tokio::test]
    async fn test_resolution_context_lists_mappings() {
        let resolver = resolver_with(&[("Rosalinda Rodriguez", EntityCategory::Person)]).await;
        let result = resolver
            .enhance_query("Where does Rosalinda Rodriguz work?", None)
            .await;

        let context = resolver.resolution_context(&result);
        assert!(context.starts_with("ENTITY RESOLUTION CONTEXT:"));
        assert!(context.contains("'Rosalinda Rodriguz' resolved to 'Rosalinda Rodriguez'"));
        assert!(context.contains("Overall confidence"));

        let noop = resolver.enhance_query("how many hours in total?", None).await;
        assert!(resolver.resolution_context(&noop).is_empty());
    }
}
