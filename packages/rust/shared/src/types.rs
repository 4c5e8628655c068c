//! Core domain types for the Vigil processing engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label family prefix for specialist (assigned-state) labels.
///
/// A ticket carrying any `specialist/...` label is in the assigned state;
/// the suffix names the workflow it was assigned to.
pub const SPECIALIST_PREFIX: &str = "specialist/";

// ---------------------------------------------------------------------------
// StateTag
// ---------------------------------------------------------------------------

/// The lifecycle stage of a ticket.
///
/// A ticket's state is *derived* from its current label set by the label
/// state machine's detection rule. It is never stored on the ticket itself,
/// so it cannot drift from the observable labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTag {
    /// Freshly filed by discovery, not yet triaged.
    Discovery,
    /// Under triage; awaiting a clear workflow match (possibly human input).
    Analysis,
    /// Matched to a workflow; carries a `specialist/` label.
    Assigned,
    /// Deliverables are being produced.
    Processing,
    /// Deliverables committed; awaiting final sign-off.
    Ready,
    /// Fully processed and closed out.
    Complete,
    /// No canonical state label present.
    Unknown,
}

impl StateTag {
    /// Short lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Analysis => "analysis",
            Self::Assigned => "assigned",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Complete => "complete",
            Self::Unknown => "unknown",
        }
    }

    /// The fixed forward processing order. `Unknown` is not part of it.
    pub const ORDER: [StateTag; 6] = [
        Self::Discovery,
        Self::Analysis,
        Self::Assigned,
        Self::Processing,
        Self::Ready,
        Self::Complete,
    ];

    /// Position in the forward order, or `None` for `Unknown`.
    pub fn position(&self) -> Option<usize> {
        Self::ORDER.iter().position(|s| s == self)
    }
}

impl std::fmt::Display for StateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A transient, read-mostly projection of an issue in the external tracker.
///
/// The tracker is the source of truth. Mutations happen only through
/// explicit label/assignee operations that are echoed back to the tracker;
/// this struct is refetched per processing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Tracker-assigned identifier (issue number or key).
    pub id: String,
    /// Issue title.
    pub title: String,
    /// Issue body text.
    #[serde(default)]
    pub body: String,
    /// Current label set. Sorted for deterministic reporting.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Current assignee, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl Ticket {
    /// Specialist labels currently on the ticket (assigned-state family).
    pub fn specialist_labels(&self) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|l| l.starts_with(SPECIALIST_PREFIX))
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ContentFingerprint
// ---------------------------------------------------------------------------

/// A short deterministic digest identifying one piece of discovered content.
///
/// Written at most once per `(normalized url, lowercased title)` pair and
/// never mutated afterwards; the dedup index keys on `hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFingerprint {
    /// 16-hex-char truncated SHA-256 digest.
    pub hash: String,
    /// When this content was first discovered.
    pub first_seen: DateTime<Utc>,
    /// The discovered URL (pre-normalization).
    pub source_url: String,
    /// Lowercased title used in the digest input.
    pub normalized_title: String,
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A single deliverable a workflow produces, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverableSpec {
    /// Deliverable name (used in commit messages and reports).
    pub name: String,
    /// Inline handlebars template for the document body.
    pub template: String,
    /// Handlebars pattern for the output path within the deliverable repo
    /// (e.g., `reports/{{ticket.id}}/summary.md`).
    pub output_path: String,
}

/// An immutable, validated analysis workflow loaded from a YAML definition.
///
/// Specialization is data: there is no per-workflow code, only this struct
/// plus the stage handlers that interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique id across all loaded definitions.
    pub id: String,
    /// Human-readable name for reports and comments.
    pub display_name: String,
    /// Labels that make this workflow a candidate match.
    pub trigger_labels: BTreeSet<String>,
    /// Keywords used for content-signal scoring.
    #[serde(default)]
    pub content_keywords: BTreeSet<String>,
    /// Ordered deliverables to produce during the processing stage.
    pub deliverables: Vec<DeliverableSpec>,
    /// Tie-break priority; higher wins on mathematically equal confidence.
    #[serde(default)]
    pub priority: i32,
    /// Actor the ticket is assigned to at handoff, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl WorkflowDefinition {
    /// The specialist label this workflow stamps on assigned tickets.
    pub fn specialist_label(&self) -> String {
        format!("{SPECIALIST_PREFIX}{}", self.id)
    }
}

// ---------------------------------------------------------------------------
// AssignmentDecision
// ---------------------------------------------------------------------------

/// The action a matching attempt resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    /// Exactly one workflow is clearly the right match.
    Assign,
    /// Ambiguous or under-specified; requires human/label input.
    /// Never silently picks a workflow.
    Clarify,
    /// The ticket carries no trigger-eligible labels at all.
    Skip,
    /// Matching itself failed (scorer error, etc.).
    Error,
}

/// Outcome of one workflow-matching attempt. Produced fresh per attempt,
/// never persisted beyond the processing result.
#[derive(Debug, Clone)]
pub struct AssignmentDecision {
    /// The ticket this decision is about.
    pub ticket_id: String,
    /// Resolved action.
    pub action: AssignmentAction,
    /// Matched workflow when `action` is `Assign`.
    pub matched: Option<WorkflowDefinition>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Human-readable reason, suitable for a ticket comment.
    pub rationale: String,
}

// ---------------------------------------------------------------------------
// ProcessingResult / BatchResult
// ---------------------------------------------------------------------------

/// Terminal status of one ticket within a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// The stage handler ran and the transition applied.
    Success,
    /// Not processed (stage filter, cooperative stop, or nothing to do).
    Skipped,
    /// The matcher found no applicable workflow.
    NoMatch,
    /// The stage handler or a tracker call failed.
    Error,
}

/// Immutable record of one ticket's pass through the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Ticket this result belongs to.
    pub ticket_id: String,
    /// Terminal status.
    pub status: ProcessingStatus,
    /// The stage the ticket was in when processed.
    pub stage: StateTag,
    /// Short human-readable detail (error reason, clarify summary, ...).
    pub detail: String,
    /// Wall-clock processing time for this ticket.
    pub duration_ms: u64,
}

/// Immutable summary of one `run_batch` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Batch run identifier (UUID v7, time-sortable) for telemetry.
    pub run_id: Uuid,
    /// One entry per candidate, in original candidate order.
    pub results: Vec<ProcessingResult>,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the batch finished.
    pub finished_at: DateTime<Utc>,
}

impl BatchResult {
    /// Count of results with the given status.
    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One discovered piece of content, pre-dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Snippet/summary text used as the ticket body.
    #[serde(default)]
    pub snippet: String,
}
