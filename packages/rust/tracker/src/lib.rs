//! Ticket tracker client: the narrow seam between the processing engine and
//! the external issue tracker.
//!
//! The tracker is the source of truth for tickets. Everything the engine
//! does to a ticket goes through [`TrackerClient`]; rate-limit and auth
//! failures surface distinguishably (`TransientApi` vs `FatalApi`) so the
//! orchestrator can retry the former and abort the batch on the latter.

mod http;
mod limiter;
mod memory;
mod retry;

use std::collections::BTreeSet;

use async_trait::async_trait;

pub use http::HttpTracker;
pub use limiter::RateLimiter;
pub use memory::InMemoryTracker;
pub use retry::with_retries;

use vigil_shared::{Result, Ticket};

// ---------------------------------------------------------------------------
// TicketFilter
// ---------------------------------------------------------------------------

/// Server-side filter for `get_tickets`.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    /// Only tickets carrying at least one of these labels. Empty = all open.
    pub labels_any: Vec<String>,
    /// Cap on the number of tickets returned.
    pub limit: Option<usize>,
}

impl TicketFilter {
    /// Filter on a single label.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            labels_any: vec![label.into()],
            limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TrackerClient
// ---------------------------------------------------------------------------

/// Narrow interface to the external issue tracker.
///
/// Implementations must map rate-limit/timeout failures to
/// [`VigilError::TransientApi`] and auth/permission failures to
/// [`VigilError::FatalApi`].
///
/// [`VigilError::TransientApi`]: vigil_shared::VigilError::TransientApi
/// [`VigilError::FatalApi`]: vigil_shared::VigilError::FatalApi
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Fetch open tickets matching `filter`.
    async fn get_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>>;

    /// File a new ticket; returns the tracker's projection of it.
    async fn create_ticket(&self, title: &str, body: &str, labels: &[String]) -> Result<Ticket>;

    /// Replace the ticket's label set. Add and remove sets from a
    /// transition plan are applied through this single call so a ticket is
    /// never observably in two states at once.
    async fn set_labels(&self, ticket_id: &str, labels: &BTreeSet<String>) -> Result<()>;

    /// Post a comment on the ticket.
    async fn add_comment(&self, ticket_id: &str, text: &str) -> Result<()>;

    /// Assign the ticket to an actor.
    async fn assign(&self, ticket_id: &str, actor: &str) -> Result<()>;
}
