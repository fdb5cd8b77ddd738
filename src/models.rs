//! Domain records and the aggregate workflow state.
//!
//! `WorkflowState` is the single mutable object threaded through every stage.
//! Stages never mutate it directly; they return a `StateUpdate` (a set of
//! field updates) that the graph runner merges in. This keeps routing
//! decisions pure functions of a plain value.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TicketStatus {
    ToDo,
    InProgress,
    InReview,
    Done,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToDo => "To Do",
            Self::InProgress => "In Progress",
            Self::InReview => "In Review",
            Self::Done => "Done",
        }
    }

    /// Parse a tracker status name, falling back to `To Do` for anything
    /// unrecognized so a misconfigured tracker cannot fail ingestion.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or(Self::ToDo)
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "To Do" => Ok(Self::ToDo),
            "In Progress" => Ok(Self::InProgress),
            "In Review" => Ok(Self::InReview),
            "Done" => Ok(Self::Done),
            _ => Err(format!("Invalid ticket status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TicketPriority {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Highest => "Highest",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Lowest => "Lowest",
        }
    }

    pub fn weight(&self) -> u8 {
        match self {
            Self::Highest => 5,
            Self::High => 4,
            Self::Medium => 3,
            Self::Low => 2,
            Self::Lowest => 1,
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or(Self::Medium)
    }
}

impl FromStr for TicketPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Highest" => Ok(Self::Highest),
            "High" => Ok(Self::High),
            "Medium" => Ok(Self::Medium),
            "Low" => Ok(Self::Low),
            "Lowest" => Ok(Self::Lowest),
            _ => Err(format!("Invalid ticket priority: {}", s)),
        }
    }
}

/// Languages we recognize when profiling repositories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    Cpp,
    CSharp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::TypeScript => "TypeScript",
            Self::Java => "Java",
            Self::Go => "Go",
            Self::Rust => "Rust",
            Self::Cpp => "C++",
            Self::CSharp => "C#",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Python" => Ok(Self::Python),
            "JavaScript" => Ok(Self::JavaScript),
            "TypeScript" => Ok(Self::TypeScript),
            "Java" => Ok(Self::Java),
            "Go" => Ok(Self::Go),
            "Rust" => Ok(Self::Rust),
            "C++" => Ok(Self::Cpp),
            "C#" => Ok(Self::CSharp),
            _ => Err(format!("Unknown language: {}", s)),
        }
    }
}

/// A backlog ticket as fetched from the issue tracker. Immutable once
/// fetched - status transitions happen only through the tracker client,
/// never on this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: String,
    pub key: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assignee: Option<String>,
    pub reporter: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub ticket_type: Option<String>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub project_key: String,
    pub url: String,
    pub acceptance_criteria: Option<String>,
}

/// A candidate repository, discovered during analysis and annotated with a
/// relevance score once ranked. Discarded after the ticket's run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub url: String,
    pub clone_url: String,
    pub default_branch: String,
    pub primary_language: Option<Language>,
    /// Bytes per language, as reported by the source host.
    pub languages: BTreeMap<String, u64>,
    pub frameworks: Vec<String>,
    pub has_package_json: bool,
    pub has_requirements_txt: bool,
    pub has_dockerfile: bool,
    pub has_makefile: bool,
    pub has_ci_config: bool,
    pub relevance_score: f32,
    pub relevance_reasoning: Option<String>,
}

impl Repository {
    /// Minimal repository record; analysis flags default to absent.
    pub fn new(name: &str, full_name: &str, url: &str, clone_url: &str, default_branch: &str) -> Self {
        Self {
            name: name.to_string(),
            full_name: full_name.to_string(),
            url: url.to_string(),
            clone_url: clone_url.to_string(),
            default_branch: default_branch.to_string(),
            primary_language: None,
            languages: BTreeMap::new(),
            frameworks: Vec::new(),
            has_package_json: false,
            has_requirements_txt: false,
            has_dockerfile: false,
            has_makefile: false,
            has_ci_config: false,
            relevance_score: 0.0,
            relevance_reasoning: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Modify,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

/// One file-level mutation produced by code generation. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChange {
    pub file_path: String,
    pub operation: ChangeOp,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub diff: Option<String>,
    pub description: Option<String>,
    pub complexity_score: u32,
    pub requires_tests: bool,
    /// Owning repository (full name) and the branch the change was committed
    /// to. The git history itself lives in the source host.
    pub repository: String,
    pub branch: String,
}

/// Hand-off artifact between code generation and PR creation: which branch
/// was created in which repository, and what was committed to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    pub repository: String,
    pub branch: String,
    pub change_descriptions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
    pub repository: String,
    pub labels: Vec<String>,
    pub draft: bool,
    pub url: Option<String>,
    pub number: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Initialize,
    TicketsFetched,
    NoTickets,
    TicketSelected,
    RepositoriesAnalyzed,
    CodeGenerated,
    RetryGenerateCode,
    PrsCreated,
    RetryCreatePullRequests,
    Ready,
    Error,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::TicketsFetched => "tickets_fetched",
            Self::NoTickets => "no_tickets",
            Self::TicketSelected => "ticket_selected",
            Self::RepositoriesAnalyzed => "repositories_analyzed",
            Self::CodeGenerated => "code_generated",
            Self::RetryGenerateCode => "retry_generate_code",
            Self::PrsCreated => "prs_created",
            Self::RetryCreatePullRequests => "retry_create_pull_requests",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

/// Per-run limits and switches, fixed at state construction.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub project_key: String,
    pub max_tickets_per_run: u32,
    pub max_repositories_per_ticket: usize,
    pub require_human_review: bool,
    pub dry_run: bool,
    pub branch_prefix: String,
    /// Restrict the run to a single ticket key (testing / targeted reruns).
    pub only_ticket: Option<String>,
    /// How many times the generate / PR stages may re-enter themselves.
    pub max_stage_retries: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            project_key: "DEV".to_string(),
            max_tickets_per_run: 5,
            max_repositories_per_ticket: 3,
            require_human_review: true,
            dry_run: false,
            branch_prefix: "feature/ticket-".to_string(),
            only_ticket: None,
            max_stage_retries: 2,
        }
    }
}

/// The aggregate state threaded through every stage of a run.
///
/// Invariants:
/// - `error` is non-null only transiently; every stage either clears it or
///   routing sends the run to cleanup / END.
/// - `current_ticket` is `None` except between ticket selection and cleanup.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub backlog: Vec<Ticket>,
    pub current_ticket: Option<Ticket>,
    pub selected_repositories: Vec<Repository>,
    pub code_changes: Vec<CodeChange>,
    pub branches: Vec<BranchRecord>,
    pub pull_requests: Vec<PullRequestRecord>,
    pub error: Option<String>,
    /// Most recent error seen during the run; survives cleanup so the final
    /// report can surface it even after recovery.
    pub last_error: Option<String>,
    pub stage: WorkflowStage,
    pub review_required: bool,
    pub review_reasons: Vec<String>,
    pub generate_attempts: u32,
    pub pr_attempts: u32,
    pub tickets_processed: u32,
    pub prs_created: u32,
    pub tickets_flagged_for_review: u32,
    pub config: RunConfig,
}

impl WorkflowState {
    pub fn new(config: RunConfig) -> Self {
        Self {
            backlog: Vec::new(),
            current_ticket: None,
            selected_repositories: Vec::new(),
            code_changes: Vec::new(),
            branches: Vec::new(),
            pull_requests: Vec::new(),
            error: None,
            last_error: None,
            stage: WorkflowStage::Initialize,
            review_required: false,
            review_reasons: Vec::new(),
            generate_attempts: 0,
            pr_attempts: 0,
            tickets_processed: 0,
            prs_created: 0,
            tickets_flagged_for_review: 0,
            config,
        }
    }
}

/// A set of field updates produced by one stage, merged into `WorkflowState`
/// by the graph runner. `None` means "leave unchanged"; option-valued fields
/// use a second `Option` layer so a stage can explicitly clear them.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub backlog: Option<Vec<Ticket>>,
    pub current_ticket: Option<Option<Ticket>>,
    pub selected_repositories: Option<Vec<Repository>>,
    pub code_changes: Option<Vec<CodeChange>>,
    pub branches: Option<Vec<BranchRecord>>,
    pub pull_requests: Option<Vec<PullRequestRecord>>,
    pub error: Option<Option<String>>,
    pub stage: Option<WorkflowStage>,
    pub review_required: Option<bool>,
    pub review_reasons: Option<Vec<String>>,
    pub generate_attempts: Option<u32>,
    pub pr_attempts: Option<u32>,
    pub tickets_processed: Option<u32>,
    pub prs_created: Option<u32>,
    pub tickets_flagged_for_review: Option<u32>,
}

impl StateUpdate {
    /// The standard failure update: record the message and move to the
    /// error stage. Routing decides what happens next.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(Some(message.into())),
            stage: Some(WorkflowStage::Error),
            ..Default::default()
        }
    }

    /// Reset all per-ticket fields back to defaults, ready for the next
    /// backlog iteration.
    pub fn cleanup() -> Self {
        Self {
            current_ticket: Some(None),
            selected_repositories: Some(Vec::new()),
            code_changes: Some(Vec::new()),
            branches: Some(Vec::new()),
            pull_requests: Some(Vec::new()),
            error: Some(None),
            stage: Some(WorkflowStage::Ready),
            review_required: Some(false),
            review_reasons: Some(Vec::new()),
            generate_attempts: Some(0),
            pr_attempts: Some(0),
            ..Default::default()
        }
    }

    pub fn apply(self, state: &mut WorkflowState) {
        if let Some(backlog) = self.backlog {
            state.backlog = backlog;
        }
        if let Some(ticket) = self.current_ticket {
            state.current_ticket = ticket;
        }
        if let Some(repos) = self.selected_repositories {
            state.selected_repositories = repos;
        }
        if let Some(changes) = self.code_changes {
            state.code_changes = changes;
        }
        if let Some(branches) = self.branches {
            state.branches = branches;
        }
        if let Some(prs) = self.pull_requests {
            state.pull_requests = prs;
        }
        if let Some(error) = self.error {
            if let Some(message) = &error {
                state.last_error = Some(message.clone());
            }
            state.error = error;
        }
        if let Some(stage) = self.stage {
            state.stage = stage;
        }
        if let Some(required) = self.review_required {
            state.review_required = required;
        }
        if let Some(reasons) = self.review_reasons {
            state.review_reasons = reasons;
        }
        if let Some(n) = self.generate_attempts {
            state.generate_attempts = n;
        }
        if let Some(n) = self.pr_attempts {
            state.pr_attempts = n;
        }
        if let Some(n) = self.tickets_processed {
            state.tickets_processed = n;
        }
        if let Some(n) = self.prs_created {
            state.prs_created = n;
        }
        if let Some(n) = self.tickets_flagged_for_review {
            state.tickets_flagged_for_review = n;
        }
    }
}

/// Final report for one invocation. Partial progress is always reported,
/// including after a fatal error.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub tickets_processed: u32,
    pub prs_created: u32,
    pub tickets_flagged_for_review: u32,
    pub final_stage: WorkflowStage,
    pub error: Option<String>,
    pub duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ticket(key: &str) -> Ticket {
        Ticket {
            id: format!("1000{}", key.len()),
            key: key.to_string(),
            summary: "Add retry handling".to_string(),
            description: None,
            status: TicketStatus::ToDo,
            priority: TicketPriority::Medium,
            assignee: None,
            reporter: Some("alice".to_string()),
            created: None,
            updated: None,
            ticket_type: Some("Task".to_string()),
            labels: vec![],
            components: vec![],
            project_key: "DEV".to_string(),
            url: format!("https://tracker.example.com/browse/{}", key),
            acceptance_criteria: None,
        }
    }

    #[test]
    fn test_ticket_status_roundtrip() {
        for status in [
            TicketStatus::ToDo,
            TicketStatus::InProgress,
            TicketStatus::InReview,
            TicketStatus::Done,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_defaults_to_todo() {
        assert_eq!(TicketStatus::parse_or_default("Blocked"), TicketStatus::ToDo);
    }

    #[test]
    fn test_unknown_priority_defaults_to_medium() {
        assert_eq!(
            TicketPriority::parse_or_default("Urgent"),
            TicketPriority::Medium
        );
    }

    #[test]
    fn test_priority_weights_are_ordered() {
        assert!(TicketPriority::Highest.weight() > TicketPriority::High.weight());
        assert!(TicketPriority::High.weight() > TicketPriority::Medium.weight());
        assert!(TicketPriority::Medium.weight() > TicketPriority::Low.weight());
        assert!(TicketPriority::Low.weight() > TicketPriority::Lowest.weight());
    }

    #[test]
    fn test_state_update_leaves_unset_fields_alone() {
        let mut state = WorkflowState::new(RunConfig::default());
        state.tickets_processed = 3;

        let update = StateUpdate {
            stage: Some(WorkflowStage::TicketsFetched),
            ..Default::default()
        };
        update.apply(&mut state);

        assert_eq!(state.stage, WorkflowStage::TicketsFetched);
        assert_eq!(state.tickets_processed, 3);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_failure_update_sets_error_and_stage() {
        let mut state = WorkflowState::new(RunConfig::default());
        StateUpdate::failure("authentication failed for tracker").apply(&mut state);

        assert_eq!(state.stage, WorkflowStage::Error);
        assert_eq!(
            state.error.as_deref(),
            Some("authentication failed for tracker")
        );
        assert_eq!(
            state.last_error.as_deref(),
            Some("authentication failed for tracker")
        );
    }

    #[test]
    fn test_cleanup_resets_per_ticket_fields() {
        let mut state = WorkflowState::new(RunConfig::default());
        state.current_ticket = Some(sample_ticket("DEV-1"));
        state.error = Some("no relevant repositories found".to_string());
        state.last_error = state.error.clone();
        state.review_required = true;
        state.generate_attempts = 2;
        state.tickets_processed = 1;

        StateUpdate::cleanup().apply(&mut state);

        assert!(state.current_ticket.is_none());
        assert!(state.error.is_none());
        assert!(!state.review_required);
        assert_eq!(state.generate_attempts, 0);
        assert_eq!(state.stage, WorkflowStage::Ready);
        // Run-level fields survive cleanup.
        assert_eq!(state.tickets_processed, 1);
        assert_eq!(
            state.last_error.as_deref(),
            Some("no relevant repositories found")
        );
    }

    #[test]
    fn test_cleanup_does_not_overwrite_last_error_with_none() {
        let mut state = WorkflowState::new(RunConfig::default());
        StateUpdate::failure("code generation failed").apply(&mut state);
        StateUpdate::cleanup().apply(&mut state);
        assert_eq!(state.last_error.as_deref(), Some("code generation failed"));
    }

    #[test]
    fn test_workflow_stage_as_str_is_snake_case() {
        assert_eq!(WorkflowStage::RetryGenerateCode.as_str(), "retry_generate_code");
        assert_eq!(
            WorkflowStage::RetryCreatePullRequests.as_str(),
            "retry_create_pull_requests"
        );
    }
}
