//! Issue tracker REST client.
//!
//! Ticket payloads arrive in two shapes depending on the data source: the
//! tracker's native nested shape (`{"fields": {"status": {"name": ...}}}`)
//! and a flattened shape produced by tool proxies (`{"status": "To Do"}`).
//! Both are modeled explicitly as an untagged union and resolved once at
//! ingestion, so business logic only ever sees `Ticket`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::clients::IssueTracker;
use crate::models::{Ticket, TicketPriority, TicketStatus};

pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    token: String,
}

impl TrackerClient {
    pub fn new(base_url: &str, email: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            token: token.to_string(),
        }
    }
}

/// A ticket payload in either of the two wire shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IssuePayload {
    Nested(NestedIssue),
    Flat(FlatIssue),
}

/// Native tracker shape: scalar identity plus a `fields` object of nested
/// named records.
#[derive(Debug, Deserialize)]
pub struct NestedIssue {
    pub id: String,
    pub key: String,
    pub fields: NestedFields,
}

#[derive(Debug, Deserialize)]
pub struct NestedFields {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub status: Option<NamedField>,
    pub priority: Option<NamedField>,
    pub assignee: Option<PersonField>,
    pub reporter: Option<PersonField>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub issuetype: Option<NamedField>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<NamedField>,
    pub project: Option<KeyedField>,
    /// Acceptance criteria custom field, when the project defines one.
    #[serde(rename = "customfield_10001")]
    pub acceptance_criteria: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedField {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PersonField {
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyedField {
    pub key: String,
}

/// Flattened tool-proxy shape: everything scalar, alternate key spellings
/// tolerated.
#[derive(Debug, Deserialize)]
pub struct FlatIssue {
    pub id: String,
    pub key: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub reporter: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    #[serde(alias = "issue_type", alias = "issuetype")]
    pub ticket_type: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(alias = "project")]
    pub project_key: Option<String>,
    pub url: Option<String>,
    pub acceptance_criteria: Option<String>,
}

/// Parse a tracker timestamp. RFC 3339 first, then the tracker's
/// `+0000`-style offset format.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl IssuePayload {
    /// Resolve either shape into the canonical `Ticket`, defaulting missing
    /// fields to safe values (unknown status -> "To Do", unknown priority ->
    /// "Medium").
    pub fn into_ticket(self, base_url: &str) -> Ticket {
        match self {
            Self::Nested(issue) => {
                let url = format!("{}/browse/{}", base_url, issue.key);
                let fields = issue.fields;
                Ticket {
                    id: issue.id,
                    key: issue.key,
                    summary: fields.summary.unwrap_or_default(),
                    description: fields.description,
                    status: fields
                        .status
                        .map(|s| TicketStatus::parse_or_default(&s.name))
                        .unwrap_or(TicketStatus::ToDo),
                    priority: fields
                        .priority
                        .map(|p| TicketPriority::parse_or_default(&p.name))
                        .unwrap_or(TicketPriority::Medium),
                    assignee: fields.assignee.map(|a| a.display_name),
                    reporter: fields.reporter.map(|r| r.display_name),
                    created: fields.created.as_deref().and_then(parse_timestamp),
                    updated: fields.updated.as_deref().and_then(parse_timestamp),
                    ticket_type: fields.issuetype.map(|t| t.name),
                    labels: fields.labels,
                    components: fields.components.into_iter().map(|c| c.name).collect(),
                    project_key: fields.project.map(|p| p.key).unwrap_or_default(),
                    url,
                    acceptance_criteria: fields.acceptance_criteria,
                }
            }
            Self::Flat(issue) => {
                let url = issue
                    .url
                    .unwrap_or_else(|| format!("{}/browse/{}", base_url, issue.key));
                Ticket {
                    id: issue.id,
                    key: issue.key,
                    summary: issue.summary.unwrap_or_default(),
                    description: issue.description,
                    status: issue
                        .status
                        .map(|s| TicketStatus::parse_or_default(&s))
                        .unwrap_or(TicketStatus::ToDo),
                    priority: issue
                        .priority
                        .map(|p| TicketPriority::parse_or_default(&p))
                        .unwrap_or(TicketPriority::Medium),
                    assignee: issue.assignee,
                    reporter: issue.reporter,
                    created: issue.created.as_deref().and_then(parse_timestamp),
                    updated: issue.updated.as_deref().and_then(parse_timestamp),
                    ticket_type: issue.ticket_type,
                    labels: issue.labels,
                    components: issue.components,
                    project_key: issue.project_key.unwrap_or_default(),
                    url,
                    acceptance_criteria: issue.acceptance_criteria,
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    to: NamedField,
}

#[async_trait]
impl IssueTracker for TrackerClient {
    async fn search_unassigned_ready_tickets(&self, project_key: &str) -> Result<Vec<Ticket>> {
        let jql = format!(
            "project = {} AND assignee is EMPTY AND status = \"To Do\" ORDER BY created ASC",
            project_key
        );
        let url = format!("{}/rest/api/2/search", self.base_url);

        let response: SearchResponse = self
            .http
            .post(&url)
            .basic_auth(&self.email, Some(&self.token))
            .json(&json!({ "jql": jql, "maxResults": 50 }))
            .send()
            .await
            .context("Failed to send ticket search request to tracker")?
            .error_for_status()
            .context("Tracker search returned error status")?
            .json()
            .await
            .context("Failed to parse ticket search response")?;

        // Per-issue tolerance: one malformed issue must not lose the batch.
        let mut tickets = Vec::new();
        for raw in response.issues {
            match serde_json::from_value::<IssuePayload>(raw) {
                Ok(payload) => tickets.push(payload.into_ticket(&self.base_url)),
                Err(err) => warn!(error = %err, "skipping unparseable ticket payload"),
            }
        }
        Ok(tickets)
    }

    async fn add_comment(&self, ticket_id: &str, body: &str) -> Result<bool> {
        let url = format!("{}/rest/api/2/issue/{}/comment", self.base_url, ticket_id);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.email, Some(&self.token))
            .json(&json!({ "body": body }))
            .send()
            .await
            .context("Failed to send comment to tracker")?;

        if !response.status().is_success() {
            warn!(ticket_id, status = %response.status(), "comment rejected by tracker");
            return Ok(false);
        }
        Ok(true)
    }

    async fn transition_status(&self, ticket_id: &str, target_status: &str) -> Result<bool> {
        let url = format!("{}/rest/api/2/issue/{}/transitions", self.base_url, ticket_id);

        let available: TransitionsResponse = self
            .http
            .get(&url)
            .basic_auth(&self.email, Some(&self.token))
            .send()
            .await
            .context("Failed to fetch ticket transitions")?
            .error_for_status()
            .context("Tracker transitions endpoint returned error status")?
            .json()
            .await
            .context("Failed to parse ticket transitions response")?;

        let Some(transition) = available
            .transitions
            .into_iter()
            .find(|t| t.to.name.eq_ignore_ascii_case(target_status))
        else {
            warn!(ticket_id, target_status, "no matching transition available");
            return Ok(false);
        };

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.email, Some(&self.token))
            .json(&json!({ "transition": { "id": transition.id } }))
            .send()
            .await
            .context("Failed to post ticket transition")?;

        Ok(response.status().is_success())
    }
}
