//! HTTP implementation of [`TrackerClient`] against a GitHub-style issues
//! REST API.
//!
//! Every call claims a slot on the shared [`RateLimiter`] and retries
//! transient failures with bounded exponential backoff. Status mapping:
//! 401/403 → `FatalApi` (aborts the batch), 429/5xx/timeouts →
//! `TransientApi` (retried).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use vigil_shared::{Result, Ticket, TrackerConfig, VigilError};

use crate::retry::with_retries;
use crate::{RateLimiter, TicketFilter, TrackerClient};

/// User-Agent string for tracker requests.
const USER_AGENT: &str = concat!("Vigil/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct WireIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<WireLabel>,
    #[serde(default)]
    assignee: Option<WireUser>,
}

impl From<WireIssue> for Ticket {
    fn from(issue: WireIssue) -> Self {
        Ticket {
            id: issue.number.to_string(),
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            assignee: issue.assignee.map(|u| u.login),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpTracker
// ---------------------------------------------------------------------------

/// GitHub-style REST tracker client.
pub struct HttpTracker {
    client: Client,
    base_url: String,
    repo: String,
    token: String,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl HttpTracker {
    /// Build a client from config, reading the token from the configured
    /// env var and sharing `limiter` with every other consumer.
    pub fn new(config: &TrackerConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            VigilError::config(format!(
                "tracker token not found. Set the {} environment variable.",
                config.token_env
            ))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VigilError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            repo: config.repo.clone(),
            token,
            limiter,
            max_retries: config.max_retries,
        })
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/issues", self.base_url, self.repo)
    }

    fn issue_url(&self, ticket_id: &str, suffix: &str) -> String {
        format!("{}/repos/{}/issues/{ticket_id}{suffix}", self.base_url, self.repo)
    }

    /// Map an HTTP status to the error taxonomy, consuming the response.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        let msg = format!("HTTP {status}: {detail}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(VigilError::FatalApi(msg)),
            StatusCode::TOO_MANY_REQUESTS => Err(VigilError::TransientApi(msg)),
            s if s.is_server_error() => Err(VigilError::TransientApi(msg)),
            _ => Err(VigilError::Network(msg)),
        }
    }

    fn request_error(e: reqwest::Error) -> VigilError {
        if e.is_timeout() || e.is_connect() {
            VigilError::TransientApi(e.to_string())
        } else {
            VigilError::Network(e.to_string())
        }
    }

    /// Rate-limit, send, and classify one request, with retries.
    async fn send_json<T: serde::Serialize + Sync>(
        &self,
        op: &str,
        method: reqwest::Method,
        url: &str,
        body: Option<&T>,
    ) -> Result<Response> {
        with_retries(self.max_retries, op, || async {
            self.limiter.acquire().await?;

            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(&self.token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(Self::request_error)?;
            Self::check_status(response).await
        })
        .await
    }
}

#[async_trait]
impl TrackerClient for HttpTracker {
    #[instrument(skip_all, fields(labels = ?filter.labels_any))]
    async fn get_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        let mut params: Vec<(&str, String)> =
            vec![("state", "open".into()), ("per_page", "100".into())];
        if !filter.labels_any.is_empty() {
            params.push(("labels", filter.labels_any.join(",")));
        }
        // Labels are free-form user input and must be percent-encoded.
        let url = reqwest::Url::parse_with_params(&self.issues_url(), &params)
            .map_err(|e| VigilError::Network(format!("issue list url: {e}")))?;

        let response = self
            .send_json::<()>("get_tickets", reqwest::Method::GET, url.as_str(), None)
            .await?;
        let issues: Vec<WireIssue> = response
            .json()
            .await
            .map_err(|e| VigilError::Network(format!("issue list decode: {e}")))?;

        let mut tickets: Vec<Ticket> = issues.into_iter().map(Ticket::from).collect();
        if let Some(limit) = filter.limit {
            tickets.truncate(limit);
        }
        debug!(count = tickets.len(), "tickets fetched");
        Ok(tickets)
    }

    #[instrument(skip_all, fields(title = %title))]
    async fn create_ticket(&self, title: &str, body: &str, labels: &[String]) -> Result<Ticket> {
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "labels": labels,
        });
        let response = self
            .send_json("create_ticket", reqwest::Method::POST, &self.issues_url(), Some(&payload))
            .await?;
        let issue: WireIssue = response
            .json()
            .await
            .map_err(|e| VigilError::Network(format!("issue decode: {e}")))?;
        Ok(issue.into())
    }

    #[instrument(skip_all, fields(ticket_id = %ticket_id))]
    async fn set_labels(&self, ticket_id: &str, labels: &BTreeSet<String>) -> Result<()> {
        let payload = serde_json::json!({
            "labels": labels.iter().collect::<Vec<_>>(),
        });
        self.send_json(
            "set_labels",
            reqwest::Method::PUT,
            &self.issue_url(ticket_id, "/labels"),
            Some(&payload),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(ticket_id = %ticket_id))]
    async fn add_comment(&self, ticket_id: &str, text: &str) -> Result<()> {
        let payload = serde_json::json!({ "body": text });
        self.send_json(
            "add_comment",
            reqwest::Method::POST,
            &self.issue_url(ticket_id, "/comments"),
            Some(&payload),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(ticket_id = %ticket_id, actor = %actor))]
    async fn assign(&self, ticket_id: &str, actor: &str) -> Result<()> {
        let payload = serde_json::json!({ "assignees": [actor] });
        self.send_json(
            "assign",
            reqwest::Method::POST,
            &self.issue_url(ticket_id, "/assignees"),
            Some(&payload),
        )
        .await?;
        Ok(())
    }
}
