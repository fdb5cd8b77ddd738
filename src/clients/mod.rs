//! External collaborator seams: issue tracker, source host, AI backend.
//!
//! Each seam is a trait so the workflow can be driven by test doubles
//! without touching process-wide state. Real implementations:
//! `TrackerClient` (REST), `GithubClient` (REST), `CliAgent` (subprocess).

pub mod agent;
pub mod github;
pub mod jira;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::errors::AgentError;
use crate::models::{PullRequestRecord, Repository, Ticket};
use crate::stream::AgentEvent;

pub use agent::CliAgent;
pub use github::GithubClient;
pub use jira::TrackerClient;

/// A stream of agent events. Item-level `Err` values are chunk-scoped
/// failures; consumers decide whether to isolate or abort.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Tickets that are unassigned and ready to work. Zero results is a
    /// normal outcome, not an error.
    async fn search_unassigned_ready_tickets(&self, project_key: &str) -> Result<Vec<Ticket>>;

    async fn add_comment(&self, ticket_id: &str, body: &str) -> Result<bool>;

    async fn transition_status(&self, ticket_id: &str, target_status: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct CreatedPullRequest {
    pub url: String,
    pub number: u64,
}

#[async_trait]
pub trait SourceHost: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// Idempotent: an "already exists" response counts as success.
    async fn create_branch(&self, repo_full_name: &str, branch: &str, base: &str) -> Result<bool>;

    /// `Ok(None)` when the file does not exist.
    async fn read_file(&self, repo_full_name: &str, path: &str) -> Result<Option<String>>;

    async fn write_file(
        &self,
        repo_full_name: &str,
        path: &str,
        content: &str,
        commit_message: &str,
        branch: &str,
    ) -> Result<bool>;

    async fn open_pull_request(
        &self,
        repo_full_name: &str,
        pr: &PullRequestRecord,
    ) -> Result<Option<CreatedPullRequest>>;
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start one agent invocation restricted to `allowed_tools` and return
    /// its event stream. Consumers must tolerate an empty stream.
    async fn stream(&self, instruction: &str, allowed_tools: &[String])
    -> Result<EventStream, AgentError>;
}
