//! Label-driven state machine for ticket lifecycle stages.
//!
//! A ticket's [`StateTag`] is derived from its label set by one pure
//! detection rule; it is never stored on the ticket. Transitions are
//! strictly forward through the fixed stage order; each transition's
//! cleanup rule removes the previous state's labels and adds the target's
//! as a single logical operation the caller applies atomically against the
//! external tracker.

use std::collections::BTreeSet;

use tracing::warn;

use vigil_shared::{Result, SPECIALIST_PREFIX, StateTag, Ticket, VigilError, WorkflowDefinition};

/// Canonical label per single-label state. The assigned state has no single
/// canonical label; it is the `specialist/` family.
const STATE_LABELS: [(StateTag, &str); 5] = [
    (StateTag::Discovery, "site-monitor"),
    (StateTag::Analysis, "needs-analysis"),
    (StateTag::Processing, "in-progress"),
    (StateTag::Ready, "ready-for-review"),
    (StateTag::Complete, "complete"),
];

/// Canonical label for a single-label state, `None` for `Assigned` (the
/// `specialist/` family) and `Unknown`.
pub fn state_label(tag: StateTag) -> Option<&'static str> {
    STATE_LABELS
        .iter()
        .find(|(state, _)| *state == tag)
        .map(|(_, label)| *label)
}

/// The add/remove label sets for one transition.
///
/// Both sets must be applied against the tracker as one logical operation
/// (or retried until both succeed) so a ticket is never observably in two
/// states at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    /// The state this plan moves the ticket into.
    pub target: StateTag,
    /// Labels to add.
    pub labels_to_add: Vec<String>,
    /// Labels to remove.
    pub labels_to_remove: Vec<String>,
}

impl TransitionPlan {
    /// The label set after this plan is applied (for detection checks and
    /// dry-run reporting).
    pub fn apply_to(&self, labels: &BTreeSet<String>) -> BTreeSet<String> {
        let mut next = labels.clone();
        for label in &self.labels_to_remove {
            next.remove(label);
        }
        for label in &self.labels_to_add {
            next.insert(label.clone());
        }
        next
    }
}

/// Validates and plans label state transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelStateMachine;

impl LabelStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Canonical label for a single-label state.
    fn canonical_label(state: StateTag) -> Option<&'static str> {
        STATE_LABELS
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, l)| *l)
    }

    /// Whether the label set matches `state`.
    fn matches(labels: &BTreeSet<String>, state: StateTag) -> bool {
        match state {
            StateTag::Assigned => labels.iter().any(|l| l.starts_with(SPECIALIST_PREFIX)),
            StateTag::Unknown => false,
            other => Self::canonical_label(other)
                .map(|canonical| labels.contains(canonical))
                .unwrap_or(false),
        }
    }

    /// Derive the current state from a label set.
    ///
    /// When labels from several states are present (drift from manual
    /// edits), the furthest-advanced state wins and a warning is logged;
    /// detection never errors, so batch processing cannot stall on dirty
    /// input. No canonical label at all means `Unknown`.
    pub fn detect_state(&self, labels: &BTreeSet<String>) -> StateTag {
        let matched: Vec<StateTag> = StateTag::ORDER
            .into_iter()
            .filter(|s| Self::matches(labels, *s))
            .collect();

        match matched.as_slice() {
            [] => StateTag::Unknown,
            [single] => *single,
            many => {
                let furthest = *many.last().unwrap_or(&StateTag::Unknown);
                let non_adjacent = many
                    .windows(2)
                    .any(|w| w[1].position().unwrap_or(0) > w[0].position().unwrap_or(0) + 1);
                if non_adjacent {
                    warn!(
                        states = ?many,
                        resolved = %furthest,
                        "label drift: labels from non-adjacent states, using furthest-advanced"
                    );
                }
                furthest
            }
        }
    }

    /// Plan a strictly-forward transition for `ticket` into `target`.
    ///
    /// `workflow` is required when `target` is `Assigned`: the plan stamps
    /// that workflow's `specialist/` label. Fails with `InvalidTransition`
    /// when `target` is not strictly forward of the detected current state.
    pub fn plan_transition(
        &self,
        ticket: &Ticket,
        target: StateTag,
        workflow: Option<&WorkflowDefinition>,
    ) -> Result<TransitionPlan> {
        let current = self.detect_state(&ticket.labels);

        let (Some(from_pos), Some(to_pos)) = (current.position(), target.position()) else {
            return Err(VigilError::invalid_transition(
                current.as_str(),
                target.as_str(),
            ));
        };
        if to_pos <= from_pos {
            return Err(VigilError::invalid_transition(
                current.as_str(),
                target.as_str(),
            ));
        }

        // Cleanup rule: remove the previous state's labels...
        let mut labels_to_remove: Vec<String> = match current {
            StateTag::Assigned => ticket
                .specialist_labels()
                .into_iter()
                .map(String::from)
                .collect(),
            other => Self::canonical_label(other)
                .filter(|l| ticket.labels.contains(*l))
                .map(|l| vec![l.to_string()])
                .unwrap_or_default(),
        };

        // ...and, on completion, every accumulated specialist label
        // (wildcard cleanup: multiple specialists may have piled up).
        if target == StateTag::Complete {
            for label in ticket.specialist_labels() {
                if !labels_to_remove.iter().any(|l| l == label) {
                    labels_to_remove.push(label.to_string());
                }
            }
        }

        let labels_to_add: Vec<String> = match target {
            StateTag::Assigned => {
                let workflow = workflow.ok_or_else(|| {
                    VigilError::validation(
                        "transition into assigned requires a matched workflow",
                    )
                })?;
                vec![workflow.specialist_label()]
            }
            other => Self::canonical_label(other)
                .map(|l| vec![l.to_string()])
                .unwrap_or_default(),
        };

        Ok(TransitionPlan {
            target,
            labels_to_add,
            labels_to_remove,
        })
    }

    /// Plan a reset back to the discovery state.
    ///
    /// This is the explicit escape hatch outside the normal forward path:
    /// it strips every state and specialist label and re-adds the discovery
    /// label, so the ticket re-enters the pipeline from scratch.
    pub fn plan_reset(&self, ticket: &Ticket) -> TransitionPlan {
        let mut labels_to_remove: Vec<String> = Vec::new();
        for (_, label) in STATE_LABELS {
            if ticket.labels.contains(label) {
                labels_to_remove.push(label.to_string());
            }
        }
        for label in ticket.specialist_labels() {
            labels_to_remove.push(label.to_string());
        }

        TransitionPlan {
            target: StateTag::Discovery,
            labels_to_add: vec!["site-monitor".to_string()],
            labels_to_remove,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(labels: &[&str]) -> Ticket {
        Ticket {
            id: "1".into(),
            title: "t".into(),
            body: String::new(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignee: None,
        }
    }

    fn workflow(id: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.into(),
            display_name: id.into(),
            trigger_labels: [id.to_string()].into(),
            content_keywords: BTreeSet::new(),
            deliverables: vec![],
            priority: 0,
            assignee: None,
        }
    }

    #[test]
    fn detects_each_canonical_state() {
        let sm = LabelStateMachine::new();
        assert_eq!(sm.detect_state(&ticket(&["site-monitor"]).labels), StateTag::Discovery);
        assert_eq!(sm.detect_state(&ticket(&["needs-analysis"]).labels), StateTag::Analysis);
        assert_eq!(
            sm.detect_state(&ticket(&["specialist/threat-analysis"]).labels),
            StateTag::Assigned
        );
        assert_eq!(sm.detect_state(&ticket(&["in-progress"]).labels), StateTag::Processing);
        assert_eq!(sm.detect_state(&ticket(&["ready-for-review"]).labels), StateTag::Ready);
        assert_eq!(sm.detect_state(&ticket(&["complete"]).labels), StateTag::Complete);
        assert_eq!(sm.detect_state(&ticket(&["threat-analysis"]).labels), StateTag::Unknown);
    }

    #[test]
    fn drift_resolves_to_furthest_advanced() {
        let sm = LabelStateMachine::new();
        // site-monitor (discovery) + in-progress (processing): non-adjacent drift.
        let state = sm.detect_state(&ticket(&["site-monitor", "in-progress"]).labels);
        assert_eq!(state, StateTag::Processing);
    }

    #[test]
    fn transition_atomicity_detect_returns_exactly_target() {
        let sm = LabelStateMachine::new();
        let wf = workflow("threat-analysis");

        // Walk a ticket through every forward transition; after each applied
        // plan, detection must return exactly the target state.
        let mut current = ticket(&["site-monitor", "threat-analysis"]);
        let path = [
            StateTag::Analysis,
            StateTag::Assigned,
            StateTag::Processing,
            StateTag::Ready,
            StateTag::Complete,
        ];
        for target in path {
            let plan = sm
                .plan_transition(&current, target, Some(&wf))
                .unwrap_or_else(|e| panic!("plan to {target}: {e}"));
            current.labels = plan.apply_to(&current.labels);
            assert_eq!(sm.detect_state(&current.labels), target);
        }
        // Topic label is untouched throughout.
        assert!(current.labels.contains("threat-analysis"));
    }

    #[test]
    fn backward_and_self_transitions_are_invalid() {
        let sm = LabelStateMachine::new();
        let t = ticket(&["in-progress"]);

        for target in [StateTag::Discovery, StateTag::Analysis, StateTag::Processing] {
            let err = sm
                .plan_transition(&t, target, None)
                .expect_err("must reject non-forward transition");
            assert!(matches!(err, VigilError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn unknown_state_cannot_transition() {
        let sm = LabelStateMachine::new();
        let t = ticket(&["some-random-label"]);
        let err = sm
            .plan_transition(&t, StateTag::Analysis, None)
            .expect_err("unknown state must not transition");
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn forward_transitions_may_skip_states() {
        let sm = LabelStateMachine::new();
        let wf = workflow("threat-analysis");
        let t = ticket(&["site-monitor"]);

        // Discovery straight to Assigned (the clean-assign fast path).
        let plan = sm
            .plan_transition(&t, StateTag::Assigned, Some(&wf))
            .expect("skip-ahead plan");
        assert_eq!(plan.labels_to_remove, vec!["site-monitor"]);
        assert_eq!(plan.labels_to_add, vec!["specialist/threat-analysis"]);
    }

    #[test]
    fn assigned_requires_workflow() {
        let sm = LabelStateMachine::new();
        let t = ticket(&["needs-analysis"]);
        let err = sm
            .plan_transition(&t, StateTag::Assigned, None)
            .expect_err("assigned without workflow");
        assert!(matches!(err, VigilError::Validation { .. }));
    }

    #[test]
    fn complete_wildcard_cleans_all_specialist_labels() {
        let sm = LabelStateMachine::new();
        let t = ticket(&[
            "ready-for-review",
            "specialist/threat-analysis",
            "specialist/phishing-response",
            "threat-analysis",
        ]);

        let plan = sm
            .plan_transition(&t, StateTag::Complete, None)
            .expect("completion plan");
        let next = plan.apply_to(&t.labels);

        assert!(next.contains("complete"));
        assert!(!next.iter().any(|l| l.starts_with("specialist/")));
        // Only declared source/target families are touched.
        assert!(next.contains("threat-analysis"));
        assert_eq!(sm.detect_state(&next), StateTag::Complete);
    }

    #[test]
    fn reset_returns_ticket_to_discovery() {
        let sm = LabelStateMachine::new();
        let t = ticket(&["in-progress", "specialist/threat-analysis", "threat-analysis"]);

        let plan = sm.plan_reset(&t);
        let next = plan.apply_to(&t.labels);
        assert_eq!(sm.detect_state(&next), StateTag::Discovery);
        assert!(next.contains("threat-analysis"));
        assert!(!next.contains("in-progress"));
    }
}
