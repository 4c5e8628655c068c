//! Content discovery: search monitored queries and file one ticket per
//! genuinely new piece of content.
//!
//! Every candidate is gated through the fingerprint index before a ticket
//! is filed, so re-discovering the same page (same monitor run or a later
//! one) never produces a second ticket. Duplicates are counted, not errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use vigil_dedup::FingerprintIndex;
use vigil_shared::{Candidate, MonitorEntry, Result, StateTag, VigilError};
use vigil_tracker::TrackerClient;
use vigil_workflow::state_label;

// ---------------------------------------------------------------------------
// DiscoverySource
// ---------------------------------------------------------------------------

/// A source of discovery candidates for a query.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Candidate>>;
}

// ---------------------------------------------------------------------------
// HttpSearchSource
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Candidate>,
}

/// JSON search API client: `GET {endpoint}?q={query}` returning
/// `{"results": [{"url", "title", "snippet"}]}`.
pub struct HttpSearchSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSearchSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Vigil/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VigilError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DiscoverySource for HttpSearchSource {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<Candidate>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    VigilError::TransientApi(e.to_string())
                } else {
                    VigilError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let msg = format!("search HTTP {status}: {detail}");
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(VigilError::TransientApi(msg))
            } else {
                Err(VigilError::Network(msg))
            };
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| VigilError::Network(format!("search decode: {e}")))?;
        debug!(count = body.results.len(), "search results");
        Ok(body.results)
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

/// Outcome of one monitor run.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    /// Tickets filed for new content.
    pub created: usize,
    /// Candidates skipped as already seen.
    pub duplicates: usize,
    /// Candidates that failed to file (reservation released).
    pub errors: usize,
    /// Candidates that would have been filed in dry-run mode.
    pub would_create: usize,
}

/// Files tickets for new discovery candidates, deduplicated through the
/// fingerprint index.
pub struct Ingestor {
    source: Arc<dyn DiscoverySource>,
    tracker: Arc<dyn TrackerClient>,
    index: Arc<FingerprintIndex>,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn DiscoverySource>,
        tracker: Arc<dyn TrackerClient>,
        index: Arc<FingerprintIndex>,
    ) -> Self {
        Self {
            source,
            tracker,
            index,
        }
    }

    /// Run one monitor: search its query and file a ticket per new
    /// candidate, labeled for the discovery state plus the monitor's topic
    /// labels.
    ///
    /// The fingerprint reservation is claimed before the ticket is filed
    /// and confirmed after, so a concurrent run seeing the same candidate
    /// cannot file a second ticket. If filing fails the reservation is
    /// released and the candidate will be retried on the next run.
    #[instrument(skip_all, fields(query = %monitor.query, dry_run))]
    pub async fn run_monitor(&self, monitor: &MonitorEntry, dry_run: bool) -> Result<IngestReport> {
        let candidates = self.source.search(&monitor.query).await?;
        let mut report = IngestReport::default();

        let mut labels: Vec<String> = vec![
            state_label(StateTag::Discovery)
                .unwrap_or("site-monitor")
                .to_string(),
        ];
        labels.extend(monitor.labels.iter().cloned());

        for candidate in candidates {
            let Some(reservation) = self.index.reserve(&candidate.url, &candidate.title) else {
                report.duplicates += 1;
                continue;
            };

            if dry_run {
                self.index.release(&reservation);
                report.would_create += 1;
                continue;
            }

            let body = ticket_body(&candidate);
            match self
                .tracker
                .create_ticket(&candidate.title, &body, &labels)
                .await
            {
                Ok(ticket) => {
                    self.index.confirm(&reservation);
                    info!(ticket_id = %ticket.id, url = %candidate.url, "ticket filed");
                    report.created += 1;
                }
                Err(e) => {
                    self.index.release(&reservation);
                    warn!(url = %candidate.url, error = %e, "failed to file ticket");
                    report.errors += 1;
                }
            }
        }

        self.index.save()?;
        Ok(report)
    }

    /// Run every configured monitor, accumulating one report.
    pub async fn run_all(&self, monitors: &[MonitorEntry], dry_run: bool) -> Result<IngestReport> {
        let mut total = IngestReport::default();
        for monitor in monitors {
            let report = self.run_monitor(monitor, dry_run).await?;
            total.created += report.created;
            total.duplicates += report.duplicates;
            total.errors += report.errors;
            total.would_create += report.would_create;
        }
        Ok(total)
    }
}

fn ticket_body(candidate: &Candidate) -> String {
    format!("Source: {}\n\n{}", candidate.url, candidate.snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_tracker::InMemoryTracker;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor(query: &str, labels: &[&str]) -> MonitorEntry {
        MonitorEntry {
            query: query.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    struct FixedSource(Vec<Candidate>);

    #[async_trait]
    impl DiscoverySource for FixedSource {
        async fn search(&self, _query: &str) -> Result<Vec<Candidate>> {
            Ok(self.0.clone())
        }
    }

    fn candidate(url: &str, title: &str) -> Candidate {
        Candidate {
            url: url.into(),
            title: title.into(),
            snippet: "snippet".into(),
        }
    }

    fn ingestor(source: impl DiscoverySource + 'static) -> (Ingestor, Arc<InMemoryTracker>) {
        let tracker = Arc::new(InMemoryTracker::new());
        let index = Arc::new(FingerprintIndex::in_memory(90, 10_000));
        (
            Ingestor::new(Arc::new(source), tracker.clone(), index),
            tracker,
        )
    }

    #[tokio::test]
    async fn http_source_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "zero-day"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"url": "https://example.com/a", "title": "Report A", "snippet": "s"},
                    {"url": "https://example.com/b", "title": "Report B"}
                ]
            })))
            .mount(&server)
            .await;

        let source = HttpSearchSource::new(format!("{}/search", server.uri())).expect("source");
        let results = source.search("zero-day").await.expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].snippet, "");
    }

    #[tokio::test]
    async fn new_candidates_become_labeled_tickets() {
        let (ingestor, tracker) = ingestor(FixedSource(vec![
            candidate("https://example.com/a", "Report A"),
            candidate("https://example.com/b", "Report B"),
        ]));

        let report = ingestor
            .run_monitor(&monitor("zero-day", &["threat-analysis"]), false)
            .await
            .expect("ingest");

        assert_eq!(report.created, 2);
        assert_eq!(report.duplicates, 0);
        let tickets = tracker.all_tickets();
        assert_eq!(tickets.len(), 2);
        for ticket in tickets {
            assert!(ticket.labels.contains("site-monitor"));
            assert!(ticket.labels.contains("threat-analysis"));
        }
    }

    #[tokio::test]
    async fn rediscovered_content_is_counted_not_refiled() {
        let (ingestor, tracker) = ingestor(FixedSource(vec![candidate(
            "https://example.com/a",
            "Report A",
        )]));
        let m = monitor("zero-day", &[]);

        let first = ingestor.run_monitor(&m, false).await.expect("first run");
        let second = ingestor.run_monitor(&m, false).await.expect("second run");

        assert_eq!(first.created, 1);
        assert_eq!(second.created, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(tracker.all_tickets().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_files_nothing_and_releases_reservations() {
        let (ingestor, tracker) = ingestor(FixedSource(vec![candidate(
            "https://example.com/a",
            "Report A",
        )]));
        let m = monitor("zero-day", &[]);

        let dry = ingestor.run_monitor(&m, true).await.expect("dry run");
        assert_eq!(dry.would_create, 1);
        assert!(tracker.all_tickets().is_empty());

        // The reservation was released, so a real run still files it.
        let real = ingestor.run_monitor(&m, false).await.expect("real run");
        assert_eq!(real.created, 1);
    }

    #[tokio::test]
    async fn failed_filing_releases_the_reservation() {
        struct NoCreate;
        #[async_trait]
        impl TrackerClient for NoCreate {
            async fn get_tickets(
                &self,
                _: &vigil_tracker::TicketFilter,
            ) -> Result<Vec<vigil_shared::Ticket>> {
                Ok(Vec::new())
            }
            async fn create_ticket(
                &self,
                _: &str,
                _: &str,
                _: &[String],
            ) -> Result<vigil_shared::Ticket> {
                Err(VigilError::TransientApi("outage".into()))
            }
            async fn set_labels(
                &self,
                _: &str,
                _: &std::collections::BTreeSet<String>,
            ) -> Result<()> {
                Ok(())
            }
            async fn add_comment(&self, _: &str, _: &str) -> Result<()> {
                Ok(())
            }
            async fn assign(&self, _: &str, _: &str) -> Result<()> {
                Ok(())
            }
        }

        let index = Arc::new(FingerprintIndex::in_memory(90, 10_000));
        let source = FixedSource(vec![candidate("https://example.com/a", "Report A")]);
        let ingestor = Ingestor::new(Arc::new(source), Arc::new(NoCreate), index.clone());

        let report = ingestor
            .run_monitor(&monitor("q", &[]), false)
            .await
            .expect("run");
        assert_eq!(report.errors, 1);
        // Not confirmed, so the candidate is still eligible next run.
        assert!(index.should_create("https://example.com/a", "Report A"));
    }
}
