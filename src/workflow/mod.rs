//! The workflow state machine.
//!
//! A directed graph with cycles: stage bodies (nodes) do the work and return
//! partial state updates; conditional edges route between stages from state
//! alone. Ticket processing loops through cleanup until the backlog or the
//! ticket budget runs out.
//!
//! Stage bodies perform all I/O. Routing functions perform none - given a
//! captured state they always produce the same next stage, which keeps the
//! control flow inspectable and replayable without external systems.

pub mod edges;
pub mod nodes;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clients::{AgentBackend, IssueTracker, SourceHost};
use crate::errors::WorkflowError;
use crate::executor::ToolCallExecutor;
use crate::models::{StateUpdate, WorkflowState};
use crate::relevance::RelevanceRanker;
use crate::review::QualityGate;

/// Backstop against a routing bug looping forever. Generous: a full-budget
/// run of 20 tickets uses well under 200 transitions.
const MAX_TRANSITIONS: usize = 1000;

/// The named stages of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    FetchTickets,
    SelectTicket,
    AnalyzeRepositories,
    GenerateCode,
    CreatePullRequests,
    CleanupState,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchTickets => "fetch_tickets",
            Self::SelectTicket => "select_ticket",
            Self::AnalyzeRepositories => "analyze_repositories",
            Self::GenerateCode => "generate_code",
            Self::CreatePullRequests => "create_pull_requests",
            Self::CleanupState => "cleanup_state",
        }
    }
}

/// Where an edge sends the run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue(Node),
    End,
}

/// Every external dependency a stage may touch, injected at construction so
/// tests can substitute doubles without patching process-wide state.
pub struct RunContext {
    pub tracker: Arc<dyn IssueTracker>,
    pub host: Arc<dyn SourceHost>,
    pub executor: Arc<ToolCallExecutor>,
    pub ranker: RelevanceRanker,
    pub gate: QualityGate,
}

impl RunContext {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        host: Arc<dyn SourceHost>,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        let executor = Arc::new(ToolCallExecutor::new(backend));
        Self {
            tracker,
            host,
            ranker: RelevanceRanker::new(executor.clone()),
            gate: QualityGate::new(executor.clone()),
            executor,
        }
    }
}

pub struct WorkflowGraph {
    ctx: RunContext,
}

impl WorkflowGraph {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Drive the state to END. Stage bodies never leak errors: any failure
    /// becomes `{error, stage: error}` and routing decides its fate.
    pub async fn run(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let mut node = Node::FetchTickets;

        for _ in 0..MAX_TRANSITIONS {
            debug!(stage = node.as_str(), "entering stage");

            let update = match nodes::run(node, state, &self.ctx).await {
                Ok(update) => update,
                Err(err) => {
                    warn!(stage = node.as_str(), error = %err, "stage failed");
                    StateUpdate::failure(err.to_string())
                }
            };
            update.apply(state);

            match edges::route(node, state) {
                Next::Continue(next) => node = next,
                Next::End => {
                    debug!("workflow reached END");
                    return Ok(());
                }
            }
        }
        Err(WorkflowError::StepLimit(MAX_TRANSITIONS))
    }
}
