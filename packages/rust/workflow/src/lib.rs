//! Workflow registry, matcher, and label state machine.
//!
//! Workflows are data, not subtypes: a validated [`WorkflowDefinition`]
//! plus the stage handlers in `vigil-core` replace any per-specialist
//! class hierarchy. This crate answers three questions:
//! - which workflows exist and which labels trigger them ([`registry`])
//! - which workflow applies to a given ticket ([`matcher`])
//! - what stage a ticket is in and how it moves forward ([`state`])

pub mod matcher;
pub mod registry;
pub mod state;

pub use matcher::{KeywordScorer, SemanticScorer, WorkflowMatcher};
pub use registry::{WorkflowRegistry, load_all};
pub use state::{LabelStateMachine, TransitionPlan, state_label};

#[doc(inline)]
pub use vigil_shared::WorkflowDefinition;
