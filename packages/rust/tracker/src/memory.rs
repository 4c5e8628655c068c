//! In-memory [`TrackerClient`] for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use vigil_shared::{Result, Ticket, VigilError};

use crate::{TicketFilter, TrackerClient};

#[derive(Default)]
struct State {
    tickets: BTreeMap<String, Ticket>,
    comments: BTreeMap<String, Vec<String>>,
    fail_set_labels: HashSet<String>,
}

/// Tracker backed by process memory. Tickets can be seeded up front and
/// individual operations can be made to fail for specific tickets, which
/// is how batch-isolation behavior gets exercised.
#[derive(Default)]
pub struct InMemoryTracker {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Seed a ticket as if it already existed in the tracker.
    pub fn seed(&self, ticket: Ticket) {
        self.lock().tickets.insert(ticket.id.clone(), ticket);
    }

    /// Make every `set_labels` call for `ticket_id` fail with a transient
    /// error.
    pub fn fail_set_labels_for(&self, ticket_id: impl Into<String>) {
        self.lock().fail_set_labels.insert(ticket_id.into());
    }

    /// Current snapshot of a ticket.
    pub fn ticket(&self, ticket_id: &str) -> Option<Ticket> {
        self.lock().tickets.get(ticket_id).cloned()
    }

    /// Comments posted to a ticket, in order.
    pub fn comments(&self, ticket_id: &str) -> Vec<String> {
        self.lock()
            .comments
            .get(ticket_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All tickets, ordered by id.
    pub fn all_tickets(&self) -> Vec<Ticket> {
        self.lock().tickets.values().cloned().collect()
    }
}

#[async_trait]
impl TrackerClient for InMemoryTracker {
    async fn get_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        let state = self.lock();
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| {
                filter.labels_any.is_empty()
                    || filter.labels_any.iter().any(|l| t.labels.contains(l))
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            tickets.truncate(limit);
        }
        Ok(tickets)
    }

    async fn create_ticket(&self, title: &str, body: &str, labels: &[String]) -> Result<Ticket> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let ticket = Ticket {
            id: id.clone(),
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().cloned().collect(),
            assignee: None,
        };
        self.lock().tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn set_labels(&self, ticket_id: &str, labels: &BTreeSet<String>) -> Result<()> {
        let mut state = self.lock();
        if state.fail_set_labels.contains(ticket_id) {
            return Err(VigilError::TransientApi(format!(
                "injected set_labels failure for ticket {ticket_id}"
            )));
        }
        let ticket = state
            .tickets
            .get_mut(ticket_id)
            .ok_or_else(|| VigilError::FatalApi(format!("no such ticket: {ticket_id}")))?;
        ticket.labels = labels.clone();
        Ok(())
    }

    async fn add_comment(&self, ticket_id: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.tickets.contains_key(ticket_id) {
            return Err(VigilError::FatalApi(format!("no such ticket: {ticket_id}")));
        }
        state
            .comments
            .entry(ticket_id.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }

    async fn assign(&self, ticket_id: &str, actor: &str) -> Result<()> {
        let mut state = self.lock();
        let ticket = state
            .tickets
            .get_mut(ticket_id)
            .ok_or_else(|| VigilError::FatalApi(format!("no such ticket: {ticket_id}")))?;
        ticket.assignee = Some(actor.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(id: &str, labels: &[&str]) -> Ticket {
        Ticket {
            id: id.into(),
            title: format!("ticket {id}"),
            body: String::new(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            assignee: None,
        }
    }

    #[tokio::test]
    async fn filters_by_any_label() {
        let tracker = InMemoryTracker::new();
        tracker.seed(ticket("1", &["site-monitor"]));
        tracker.seed(ticket("2", &["needs-analysis"]));
        tracker.seed(ticket("3", &["complete"]));

        let found = tracker
            .get_tickets(&TicketFilter {
                labels_any: vec!["site-monitor".into(), "needs-analysis".into()],
                limit: None,
            })
            .await
            .expect("fetch");
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let tracker = InMemoryTracker::new();
        let a = tracker
            .create_ticket("a", "", &["site-monitor".into()])
            .await
            .expect("create");
        let b = tracker.create_ticket("b", "", &[]).await.expect("create");
        assert_ne!(a.id, b.id);
        assert!(tracker.ticket(&a.id).is_some());
    }

    #[tokio::test]
    async fn injected_failure_only_hits_target_ticket() {
        let tracker = InMemoryTracker::new();
        tracker.seed(ticket("1", &["site-monitor"]));
        tracker.seed(ticket("2", &["site-monitor"]));
        tracker.fail_set_labels_for("1");

        let labels: BTreeSet<String> = ["needs-analysis".to_string()].into();
        let err = tracker.set_labels("1", &labels).await.expect_err("injected");
        assert!(err.is_transient());
        tracker.set_labels("2", &labels).await.expect("unaffected");
        assert!(tracker.ticket("2").unwrap().labels.contains("needs-analysis"));
    }

    #[tokio::test]
    async fn comments_are_recorded_in_order() {
        let tracker = InMemoryTracker::new();
        tracker.seed(ticket("9", &[]));
        tracker.add_comment("9", "first").await.expect("comment");
        tracker.add_comment("9", "second").await.expect("comment");
        assert_eq!(tracker.comments("9"), vec!["first", "second"]);
    }
}
