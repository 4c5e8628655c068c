//! Workflow matching: label-candidate selection, confidence scoring, and
//! the ambiguity-safe decision policy.
//!
//! The core safety property lives here: a wrong silent assignment is worse
//! than an explicit clarification, so any two candidates within the tie
//! margin of each other always resolve to `Clarify`, never `Assign`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use vigil_shared::{
    AssignmentAction, AssignmentDecision, MatcherConfig, Result, WorkflowDefinition,
};

use crate::registry::WorkflowRegistry;

// ---------------------------------------------------------------------------
// Semantic scorer seam
// ---------------------------------------------------------------------------

/// Optional content-signal scorer (external collaborator).
///
/// When absent, the matcher falls back to label-only scoring: confidence
/// 1.0 for any label match, 0 otherwise.
#[async_trait]
pub trait SemanticScorer: Send + Sync {
    /// Score how well `text` matches a workflow's keywords, in [0, 1].
    async fn score(&self, text: &str, keywords: &BTreeSet<String>) -> Result<f64>;
}

/// Built-in scorer: plain keyword-overlap fraction over lowercased text.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

#[async_trait]
impl SemanticScorer for KeywordScorer {
    async fn score(&self, text: &str, keywords: &BTreeSet<String>) -> Result<f64> {
        if keywords.is_empty() {
            return Ok(0.0);
        }
        let haystack = text.to_lowercase();
        let hits = keywords
            .iter()
            .filter(|k| haystack.contains(&k.to_lowercase()))
            .count();
        Ok(hits as f64 / keywords.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// One scored candidate, internal to the decision policy.
struct ScoredCandidate {
    workflow: Arc<WorkflowDefinition>,
    confidence: f64,
}

/// Selects zero/one/many candidate workflows for a ticket and resolves
/// ambiguity. Deterministic for a fixed `(labels, text, registry)`.
#[derive(Clone)]
pub struct WorkflowMatcher {
    registry: Arc<WorkflowRegistry>,
    scorer: Option<Arc<dyn SemanticScorer>>,
    config: MatcherConfig,
}

impl WorkflowMatcher {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        scorer: Option<Arc<dyn SemanticScorer>>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            registry,
            scorer,
            config,
        }
    }

    /// Match a ticket's labels (and optionally its text) against the
    /// registry, producing a fresh [`AssignmentDecision`].
    #[instrument(skip_all, fields(ticket_id = %ticket_id))]
    pub async fn match_ticket(
        &self,
        ticket_id: &str,
        labels: &BTreeSet<String>,
        text: Option<&str>,
    ) -> AssignmentDecision {
        // (1) Label-candidate set: definitions whose trigger labels
        // intersect the ticket labels. Iterate per ticket label against the
        // O(1) trigger index, dedup by id, sort for determinism.
        let mut candidates: Vec<Arc<WorkflowDefinition>> = Vec::new();
        for label in labels {
            for wf in self.registry.find_by_trigger_label(label) {
                if !candidates.iter().any(|c| c.id == wf.id) {
                    candidates.push(wf);
                }
            }
        }
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        if candidates.is_empty() {
            return self.no_candidate_decision(ticket_id, labels);
        }

        // (2) Confidence per candidate.
        let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(candidates.len());
        for workflow in candidates {
            let confidence = match self.confidence(&workflow, labels, text).await {
                Ok(c) => c,
                Err(e) => {
                    return AssignmentDecision {
                        ticket_id: ticket_id.to_string(),
                        action: AssignmentAction::Error,
                        matched: None,
                        confidence: 0.0,
                        rationale: format!("scoring failed for '{}': {e}", workflow.id),
                    };
                }
            };
            debug!(workflow = %workflow.id, confidence, "candidate scored");
            scored.push(ScoredCandidate {
                workflow,
                confidence,
            });
        }

        // (3) Decision policy.
        self.decide(ticket_id, scored)
    }

    /// Blend label overlap with the content-keyword signal.
    async fn confidence(
        &self,
        workflow: &WorkflowDefinition,
        labels: &BTreeSet<String>,
        text: Option<&str>,
    ) -> Result<f64> {
        let overlap = workflow.trigger_labels.intersection(labels).count();
        let label_score = overlap as f64 / workflow.trigger_labels.len() as f64;

        match (text, &self.scorer) {
            (Some(text), Some(scorer)) if !text.is_empty() => {
                let content_score = scorer.score(text, &workflow.content_keywords).await?;
                Ok((self.config.label_weight * label_score
                    + self.config.content_weight * content_score)
                    .clamp(0.0, 1.0))
            }
            // Label-only fallback: any label match is full confidence.
            _ => Ok(if overlap > 0 { 1.0 } else { 0.0 }),
        }
    }

    fn no_candidate_decision(
        &self,
        ticket_id: &str,
        labels: &BTreeSet<String>,
    ) -> AssignmentDecision {
        let universe = self.registry.trigger_labels();
        let has_trigger_eligible = labels.iter().any(|l| universe.contains(l));

        if has_trigger_eligible {
            // With a single registry snapshot an eligible label always
            // yields a candidate, so this leg is reached only when a
            // registry reload lands between the candidate scan and this
            // check. Suggest the full universe rather than guessing.
            AssignmentDecision {
                ticket_id: ticket_id.to_string(),
                action: AssignmentAction::Clarify,
                matched: None,
                confidence: 0.0,
                rationale: format!(
                    "no workflow matched; known trigger labels: {}",
                    universe.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            }
        } else {
            AssignmentDecision {
                ticket_id: ticket_id.to_string(),
                action: AssignmentAction::Skip,
                matched: None,
                confidence: 0.0,
                rationale: "ticket carries no trigger-eligible labels".to_string(),
            }
        }
    }

    fn decide(&self, ticket_id: &str, mut scored: Vec<ScoredCandidate>) -> AssignmentDecision {
        // Highest confidence first; id ascending keeps equal rows stable.
        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.workflow.id.cmp(&b.workflow.id))
        });

        let top = &scored[0];

        if top.confidence < self.config.confidence_threshold {
            let suggestions = self.registry.trigger_labels();
            return AssignmentDecision {
                ticket_id: ticket_id.to_string(),
                action: AssignmentAction::Clarify,
                matched: None,
                confidence: top.confidence,
                rationale: format!(
                    "best candidate '{}' at confidence {:.2} is below the threshold {:.2}; \
                     known trigger labels: {}",
                    top.workflow.id,
                    top.confidence,
                    self.config.confidence_threshold,
                    suggestions.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            };
        }

        let tied: Vec<&ScoredCandidate> = scored
            .iter()
            .filter(|c| top.confidence - c.confidence < self.config.tie_margin)
            .collect();

        if tied.len() == 1 {
            // Exactly one candidate clearly ahead: assign even if others
            // matched some labels.
            return self.assign(ticket_id, top);
        }

        // Priority breaks ties only on mathematically equal confidences.
        let all_equal = tied.iter().all(|c| c.confidence == top.confidence);
        if all_equal {
            let max_priority = tied.iter().map(|c| c.workflow.priority).max().unwrap_or(0);
            let mut at_max: Vec<&&ScoredCandidate> = tied
                .iter()
                .filter(|c| c.workflow.priority == max_priority)
                .collect();
            at_max.sort_by(|a, b| a.workflow.id.cmp(&b.workflow.id));
            if at_max.len() == 1 {
                return self.assign(ticket_id, at_max[0]);
            }
        }

        // Ambiguity is intentional: name every tied workflow, never pick one.
        let names: Vec<String> = tied.iter().map(|c| c.workflow.id.clone()).collect();
        AssignmentDecision {
            ticket_id: ticket_id.to_string(),
            action: AssignmentAction::Clarify,
            matched: None,
            confidence: top.confidence,
            rationale: format!(
                "ambiguous match between workflows: {} (confidence delta below {:.2})",
                names.join(", "),
                self.config.tie_margin
            ),
        }
    }

    fn assign(&self, ticket_id: &str, candidate: &ScoredCandidate) -> AssignmentDecision {
        AssignmentDecision {
            ticket_id: ticket_id.to_string(),
            action: AssignmentAction::Assign,
            matched: Some((*candidate.workflow).clone()),
            confidence: candidate.confidence,
            rationale: format!(
                "matched workflow '{}' at confidence {:.2}",
                candidate.workflow.id, candidate.confidence
            ),
        }
    }
}
