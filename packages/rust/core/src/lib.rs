//! Batch processing engine: orchestrator, stage handlers, deliverable
//! rendering, and the version-control committer.
//!
//! The [`Engine`] owns no policy of its own beyond stage routing; matching
//! and state transitions live in `vigil-workflow`, tracker access behind
//! the `vigil-tracker` trait. Everything external is injected, so the
//! whole engine runs against in-memory collaborators in tests.

pub mod committer;
pub mod orchestrator;
pub mod render;
pub mod report;
mod stages;

pub use committer::{Committer, GitCommitter, NoopCommitter};
pub use orchestrator::{BatchOptions, Engine};
pub use render::{HandlebarsRenderer, RenderedFile, Renderer, render_context};
pub use report::render_summary;
