//! Deliverable rendering.
//!
//! Deliverable bodies and output paths are handlebars templates in the
//! workflow definition; the context bag is a JSON map built from the
//! ticket and workflow. Output is opaque to the engine.

use handlebars::Handlebars;
use serde_json::Value;

use vigil_shared::{DeliverableSpec, Result, Ticket, VigilError, WorkflowDefinition};

/// A rendered deliverable ready to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Path within the deliverable repository.
    pub path: String,
    pub content: String,
}

/// Renders deliverable templates against a context bag.
pub trait Renderer: Send + Sync {
    fn render(&self, spec: &DeliverableSpec, context: &Value) -> Result<RenderedFile>;
}

/// Handlebars-backed [`Renderer`].
pub struct HandlebarsRenderer {
    registry: Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        // Missing fields render empty rather than failing a whole batch.
        registry.set_strict_mode(false);
        Self { registry }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for HandlebarsRenderer {
    fn render(&self, spec: &DeliverableSpec, context: &Value) -> Result<RenderedFile> {
        let path = self
            .registry
            .render_template(&spec.output_path, context)
            .map_err(|e| VigilError::Render(format!("{}: output path: {e}", spec.name)))?;
        let content = self
            .registry
            .render_template(&spec.template, context)
            .map_err(|e| VigilError::Render(format!("{}: {e}", spec.name)))?;
        Ok(RenderedFile { path, content })
    }
}

/// Context bag for one ticket/workflow pair.
pub fn render_context(ticket: &Ticket, workflow: &WorkflowDefinition) -> Value {
    serde_json::json!({
        "ticket": {
            "id": ticket.id,
            "title": ticket.title,
            "body": ticket.body,
            "labels": ticket.labels,
        },
        "workflow": {
            "id": workflow.id,
            "display_name": workflow.display_name,
        },
    })
}
