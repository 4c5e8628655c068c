//! Shared types, error model, and configuration for Vigil.
//!
//! This crate is the foundation depended on by all other Vigil crates.
//! It provides:
//! - [`VigilError`] — the unified error type
//! - Domain types ([`Ticket`], [`StateTag`], [`WorkflowDefinition`],
//!   [`ContentFingerprint`], [`AssignmentDecision`], [`BatchResult`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, DedupConfig, DiscoveryConfig, MatcherConfig, MonitorEntry,
    TrackerConfig, WorkflowsConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_tracker_token,
};
pub use error::{Result, VigilError};
pub use types::{
    AssignmentAction, AssignmentDecision, BatchResult, Candidate, ContentFingerprint,
    DeliverableSpec, ProcessingResult, ProcessingStatus, SPECIALIST_PREFIX, StateTag, Ticket,
    WorkflowDefinition,
};
