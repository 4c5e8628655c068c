//! Batch orchestrator: partitions a ticket batch across a bounded worker
//! pool and collects per-ticket results.
//!
//! Tickets are partitioned round-robin up front, so no ticket is ever
//! picked up twice and no polling queue is needed. Each worker processes
//! its tickets one at a time; a per-ticket failure is caught at the worker
//! boundary and recorded as an `Error` result without touching siblings.
//! Fatal errors (auth, permissions) set the stop flag and propagate out of
//! `run_batch`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use vigil_shared::{
    BatchResult, MatcherConfig, ProcessingResult, ProcessingStatus, Result, StateTag, Ticket,
    VigilError,
};
use vigil_tracker::{TicketFilter, TrackerClient};
use vigil_workflow::matcher::SemanticScorer;
use vigil_workflow::{LabelStateMachine, WorkflowMatcher, WorkflowRegistry};

use crate::committer::Committer;
use crate::render::Renderer;

// ---------------------------------------------------------------------------
// BatchOptions
// ---------------------------------------------------------------------------

/// Per-run knobs for [`Engine::run_batch`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Upper bound on concurrent workers.
    pub max_concurrency: usize,
    /// Keep going after a per-ticket error; `false` stops the batch
    /// cooperatively (in-flight tickets finish, unstarted ones are skipped).
    pub continue_on_error: bool,
    /// Exercise matching and state detection without mutating anything.
    pub dry_run: bool,
    /// Only process tickets currently in this stage; others are skipped.
    pub stage: Option<StateTag>,
    /// Batch-level deadline. Checked between tickets like the stop flag:
    /// in-flight tickets finish, unstarted ones are skipped.
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            continue_on_error: true,
            dry_run: false,
            stage: None,
            timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The batch processing engine, wired to its collaborators.
///
/// Every collaborator is injected: the tracker, renderer, and committer
/// are trait objects so tests and dry runs can substitute in-memory
/// implementations.
#[derive(Clone)]
pub struct Engine {
    pub(crate) tracker: Arc<dyn TrackerClient>,
    pub(crate) registry: Arc<WorkflowRegistry>,
    pub(crate) matcher: WorkflowMatcher,
    pub(crate) state: LabelStateMachine,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) committer: Arc<dyn Committer>,
}

impl Engine {
    pub fn new(
        tracker: Arc<dyn TrackerClient>,
        registry: Arc<WorkflowRegistry>,
        scorer: Option<Arc<dyn SemanticScorer>>,
        matcher_config: MatcherConfig,
        renderer: Arc<dyn Renderer>,
        committer: Arc<dyn Committer>,
    ) -> Self {
        let matcher = WorkflowMatcher::new(registry.clone(), scorer, matcher_config);
        Self {
            tracker,
            registry,
            matcher,
            state: LabelStateMachine::new(),
            renderer,
            committer,
        }
    }

    /// Fetch the next batch of candidate tickets from the tracker.
    pub async fn select_tickets(
        &self,
        label_filter: &[String],
        batch_size: usize,
    ) -> Result<Vec<Ticket>> {
        let filter = TicketFilter {
            labels_any: label_filter.to_vec(),
            limit: Some(batch_size),
        };
        self.tracker.get_tickets(&filter).await
    }

    /// Process a batch of tickets and return one result per ticket, in the
    /// original candidate order.
    #[instrument(skip_all, fields(tickets = tickets.len(), dry_run = opts.dry_run))]
    pub async fn run_batch(&self, tickets: Vec<Ticket>, opts: &BatchOptions) -> Result<BatchResult> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let total = tickets.len();
        info!(%run_id, total, "batch started");

        let workers = opts.max_concurrency.clamp(1, total.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let deadline = opts.timeout.map(|t| Instant::now() + t);

        // Round-robin partition: worker w owns tickets w, w+n, w+2n, ...
        let mut partitions: Vec<Vec<(usize, Ticket)>> = (0..workers).map(|_| Vec::new()).collect();
        for (index, ticket) in tickets.into_iter().enumerate() {
            partitions[index % workers].push((index, ticket));
        }

        let mut join_set = JoinSet::new();
        for partition in partitions.into_iter().filter(|p| !p.is_empty()) {
            let engine = self.clone();
            let opts = opts.clone();
            let stop = stop.clone();
            join_set.spawn(async move { engine.worker(partition, &opts, &stop, deadline).await });
        }

        let mut indexed: Vec<(usize, ProcessingResult)> = Vec::with_capacity(total);
        let mut fatal: Option<VigilError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(mut part)) => indexed.append(&mut part),
                Ok(Err(e)) => {
                    stop.store(true, Ordering::SeqCst);
                    warn!(%run_id, error = %e, "batch aborted by fatal error");
                    fatal = Some(e);
                }
                Err(e) => {
                    stop.store(true, Ordering::SeqCst);
                    fatal = Some(VigilError::validation(format!("batch worker panicked: {e}")));
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<ProcessingResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let batch = BatchResult {
            run_id,
            results,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            %run_id,
            success = batch.count(ProcessingStatus::Success),
            skipped = batch.count(ProcessingStatus::Skipped),
            no_match = batch.count(ProcessingStatus::NoMatch),
            errors = batch.count(ProcessingStatus::Error),
            "batch complete"
        );
        Ok(batch)
    }

    /// One worker: process owned tickets in order, honoring the stop flag
    /// and the batch deadline between tickets (never mid-ticket, so a
    /// transition is never left half-applied by cancellation).
    async fn worker(
        &self,
        partition: Vec<(usize, Ticket)>,
        opts: &BatchOptions,
        stop: &AtomicBool,
        deadline: Option<Instant>,
    ) -> Result<Vec<(usize, ProcessingResult)>> {
        let mut out = Vec::with_capacity(partition.len());
        for (index, ticket) in partition {
            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            if stop.load(Ordering::SeqCst) || timed_out {
                let detail = if timed_out {
                    "batch timeout exceeded before this ticket"
                } else {
                    "batch stopped before this ticket"
                };
                out.push((
                    index,
                    ProcessingResult {
                        ticket_id: ticket.id.clone(),
                        status: ProcessingStatus::Skipped,
                        stage: self.state.detect_state(&ticket.labels),
                        detail: detail.into(),
                        duration_ms: 0,
                    },
                ));
                continue;
            }

            let result = self.process_one(&ticket, opts).await?;
            if result.status == ProcessingStatus::Error && !opts.continue_on_error {
                stop.store(true, Ordering::SeqCst);
            }
            out.push((index, result));
        }
        Ok(out)
    }

    /// Process one ticket fully, catching per-ticket errors at this
    /// boundary. Only fatal errors escape as `Err`.
    async fn process_one(&self, ticket: &Ticket, opts: &BatchOptions) -> Result<ProcessingResult> {
        let start = Instant::now();
        let stage = self.state.detect_state(&ticket.labels);
        let outcome = self.dispatch(ticket, stage, opts).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok((status, detail)) => Ok(ProcessingResult {
                ticket_id: ticket.id.clone(),
                status,
                stage,
                detail,
                duration_ms,
            }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(ticket_id = %ticket.id, stage = %stage, error = %e, "ticket failed");
                Ok(ProcessingResult {
                    ticket_id: ticket.id.clone(),
                    status: ProcessingStatus::Error,
                    stage,
                    detail: e.to_string(),
                    duration_ms,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use vigil_shared::{DeliverableSpec, WorkflowDefinition};
    use vigil_tracker::InMemoryTracker;

    use crate::committer::NoopCommitter;
    use crate::render::{HandlebarsRenderer, RenderedFile};

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "threat-analysis".into(),
            display_name: "Threat Analysis".into(),
            trigger_labels: ["threat-analysis".to_string()].into(),
            content_keywords: ["malware".to_string(), "exploit".to_string()].into(),
            deliverables: vec![DeliverableSpec {
                name: "summary".into(),
                template: "# {{ticket.title}}".into(),
                output_path: "reports/{{ticket.id}}/summary.md".into(),
            }],
            priority: 0,
            assignee: Some("threat-desk".into()),
        }
    }

    fn discovery_ticket(id: &str) -> Ticket {
        Ticket {
            id: id.into(),
            title: format!("malware report {id}"),
            body: "observed exploit activity".into(),
            labels: ["site-monitor".to_string(), "threat-analysis".to_string()].into(),
            assignee: None,
        }
    }

    fn engine_with(tracker: Arc<InMemoryTracker>, committer: Arc<dyn Committer>) -> Engine {
        let registry = Arc::new(WorkflowRegistry::from_definitions(vec![workflow()]));
        Engine::new(
            tracker,
            registry,
            None,
            MatcherConfig::default(),
            Arc::new(HandlebarsRenderer::new()),
            committer,
        )
    }

    fn seed_batch(tracker: &InMemoryTracker, n: usize) -> Vec<Ticket> {
        let mut tickets = Vec::new();
        for i in 1..=n {
            let ticket = discovery_ticket(&i.to_string());
            tracker.seed(ticket.clone());
            tickets.push(ticket);
        }
        tickets
    }

    #[tokio::test]
    async fn one_failing_ticket_leaves_siblings_alone() {
        let tracker = Arc::new(InMemoryTracker::new());
        let tickets = seed_batch(&tracker, 5);
        tracker.fail_set_labels_for("3");

        let engine = engine_with(tracker.clone(), Arc::new(NoopCommitter));
        let batch = engine
            .run_batch(tickets, &BatchOptions::default())
            .await
            .expect("batch");

        assert_eq!(batch.results.len(), 5);
        assert_eq!(batch.count(ProcessingStatus::Error), 1);
        assert_eq!(batch.count(ProcessingStatus::Success), 4);
        let failed = batch.results.iter().find(|r| r.ticket_id == "3").unwrap();
        assert_eq!(failed.status, ProcessingStatus::Error);
        // Siblings were assigned despite the induced failure.
        assert!(
            tracker
                .ticket("2")
                .unwrap()
                .labels
                .contains("specialist/threat-analysis")
        );
    }

    #[tokio::test]
    async fn results_come_back_in_candidate_order() {
        let tracker = Arc::new(InMemoryTracker::new());
        let tickets = seed_batch(&tracker, 8);
        let expected: Vec<String> = tickets.iter().map(|t| t.id.clone()).collect();

        let engine = engine_with(tracker, Arc::new(NoopCommitter));
        let batch = engine
            .run_batch(tickets, &BatchOptions::default())
            .await
            .expect("batch");

        let got: Vec<String> = batch.results.iter().map(|r| r.ticket_id.clone()).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn stop_flag_skips_unstarted_tickets() {
        let tracker = Arc::new(InMemoryTracker::new());
        let tickets = seed_batch(&tracker, 3);
        tracker.fail_set_labels_for("1");

        let engine = engine_with(tracker, Arc::new(NoopCommitter));
        let opts = BatchOptions {
            max_concurrency: 1,
            continue_on_error: false,
            ..BatchOptions::default()
        };
        let batch = engine.run_batch(tickets, &opts).await.expect("batch");

        assert_eq!(batch.results[0].status, ProcessingStatus::Error);
        assert_eq!(batch.results[1].status, ProcessingStatus::Skipped);
        assert_eq!(batch.results[2].status, ProcessingStatus::Skipped);
    }

    #[tokio::test]
    async fn expired_batch_timeout_skips_unstarted_tickets() {
        let tracker = Arc::new(InMemoryTracker::new());
        let tickets = seed_batch(&tracker, 3);

        let engine = engine_with(tracker.clone(), Arc::new(NoopCommitter));
        let opts = BatchOptions {
            max_concurrency: 1,
            timeout: Some(Duration::ZERO),
            ..BatchOptions::default()
        };
        let batch = engine.run_batch(tickets, &opts).await.expect("batch");

        assert_eq!(batch.results.len(), 3);
        for result in &batch.results {
            assert_eq!(result.status, ProcessingStatus::Skipped);
            assert!(result.detail.contains("timeout"));
        }
        // Nothing was started, so nothing was mutated.
        for ticket in tracker.all_tickets() {
            assert!(!ticket.labels.contains("specialist/threat-analysis"));
        }
    }

    #[tokio::test]
    async fn generous_timeout_does_not_interfere() {
        let tracker = Arc::new(InMemoryTracker::new());
        let tickets = seed_batch(&tracker, 2);

        let engine = engine_with(tracker, Arc::new(NoopCommitter));
        let opts = BatchOptions {
            timeout: Some(Duration::from_secs(300)),
            ..BatchOptions::default()
        };
        let batch = engine.run_batch(tickets, &opts).await.expect("batch");
        assert_eq!(batch.count(ProcessingStatus::Success), 2);
    }

    #[tokio::test]
    async fn fatal_errors_abort_the_batch() {
        let tracker = Arc::new(InMemoryTracker::new());
        // Not seeded: the tracker rejects mutations with a fatal error.
        let tickets = vec![discovery_ticket("99")];

        let engine = engine_with(tracker, Arc::new(NoopCommitter));
        let err = engine
            .run_batch(tickets, &BatchOptions::default())
            .await
            .expect_err("fatal propagates");
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn dry_run_mutates_nothing() {
        let tracker = Arc::new(InMemoryTracker::new());
        let tickets = seed_batch(&tracker, 2);

        let engine = engine_with(tracker.clone(), Arc::new(NoopCommitter));
        let opts = BatchOptions {
            dry_run: true,
            ..BatchOptions::default()
        };
        let batch = engine.run_batch(tickets, &opts).await.expect("batch");

        assert_eq!(batch.count(ProcessingStatus::Success), 2);
        for ticket in tracker.all_tickets() {
            assert!(!ticket.labels.contains("specialist/threat-analysis"));
            assert!(ticket.labels.contains("site-monitor"));
        }
    }

    #[tokio::test]
    async fn stage_filter_skips_other_stages() {
        let tracker = Arc::new(InMemoryTracker::new());
        let tickets = seed_batch(&tracker, 2);

        let engine = engine_with(tracker, Arc::new(NoopCommitter));
        let opts = BatchOptions {
            stage: Some(StateTag::Processing),
            ..BatchOptions::default()
        };
        let batch = engine.run_batch(tickets, &opts).await.expect("batch");
        assert_eq!(batch.count(ProcessingStatus::Skipped), 2);
    }

    struct RecordingCommitter {
        commits: Mutex<Vec<(String, Vec<RenderedFile>, String)>>,
    }

    impl RecordingCommitter {
        fn new() -> Self {
            Self {
                commits: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Committer for RecordingCommitter {
        async fn commit(
            &self,
            branch: &str,
            files: &[RenderedFile],
            message: &str,
        ) -> Result<()> {
            self.commits.lock().unwrap().push((
                branch.to_string(),
                files.to_vec(),
                message.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn ticket_walks_the_full_lifecycle() {
        let tracker = Arc::new(InMemoryTracker::new());
        let committer = Arc::new(RecordingCommitter::new());
        tracker.seed(discovery_ticket("1"));

        let engine = engine_with(tracker.clone(), committer.clone());
        let opts = BatchOptions::default();
        let machine = LabelStateMachine::new();

        let expected = [
            StateTag::Assigned,
            StateTag::Processing,
            StateTag::Ready,
            StateTag::Complete,
        ];
        for stage in expected {
            let current = vec![tracker.ticket("1").unwrap()];
            let batch = engine.run_batch(current, &opts).await.expect("batch");
            assert_eq!(batch.results[0].status, ProcessingStatus::Success);
            let labels = tracker.ticket("1").unwrap().labels;
            assert_eq!(machine.detect_state(&labels), stage);
        }

        // Handoff assigned the workflow's actor.
        assert_eq!(
            tracker.ticket("1").unwrap().assignee.as_deref(),
            Some("threat-desk")
        );
        // Processing committed one deliverable on the per-ticket branch.
        let commits = committer.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        let (branch, files, _message) = &commits[0];
        assert_eq!(branch, "vigil/1");
        assert_eq!(files[0].path, "reports/1/summary.md");
        assert_eq!(files[0].content, "# malware report 1");
        // Complete removed the specialist label.
        let final_labels: BTreeSet<String> = tracker.ticket("1").unwrap().labels;
        assert!(!final_labels.iter().any(|l| l.starts_with("specialist/")));
        assert!(final_labels.contains("complete"));
    }
}
