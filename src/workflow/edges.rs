//! Conditional edges: pure routing decisions over the workflow state.
//!
//! No edge performs I/O or consults anything but the state it is given -
//! the only randomness in the whole graph lives in ticket *selection*, never
//! in routing.

use crate::errors::is_recoverable;
use crate::models::{WorkflowStage, WorkflowState};
use crate::workflow::{Next, Node};

/// Dispatch table: which edge follows which stage.
pub fn route(node: Node, state: &WorkflowState) -> Next {
    match node {
        Node::FetchTickets => tickets_or_end(state),
        Node::SelectTicket => analyze_or_error(state),
        Node::AnalyzeRepositories => generate_or_error(state),
        Node::GenerateCode => create_pr_or_review(state),
        Node::CreatePullRequests => pr_creation_or_retry(state),
        Node::CleanupState => tickets_or_end(state),
    }
}

/// Select another ticket while the backlog has any and the budget allows;
/// otherwise the run is complete.
pub fn tickets_or_end(state: &WorkflowState) -> Next {
    if !state.backlog.is_empty() && state.tickets_processed < state.config.max_tickets_per_run {
        Next::Continue(Node::SelectTicket)
    } else {
        Next::End
    }
}

/// A selected ticket moves on to repository analysis. An empty backlog is a
/// normal terminal path, not an error.
pub fn analyze_or_error(state: &WorkflowState) -> Next {
    if state.current_ticket.is_some() && state.error.is_none() {
        Next::Continue(Node::AnalyzeRepositories)
    } else {
        Next::End
    }
}

/// Relevant repositories move on to code generation; anything else abandons
/// the ticket through cleanup.
pub fn generate_or_error(state: &WorkflowState) -> Next {
    if !state.selected_repositories.is_empty() && state.error.is_none() {
        Next::Continue(Node::GenerateCode)
    } else {
        Next::Continue(Node::CleanupState)
    }
}

/// Quality control point after code generation: honor a stage-level retry
/// request, abandon on error, hold back anything flagged for human review,
/// and only then open pull requests.
pub fn create_pr_or_review(state: &WorkflowState) -> Next {
    if state.stage == WorkflowStage::RetryGenerateCode {
        return Next::Continue(Node::GenerateCode);
    }
    if state.error.is_some() {
        return Next::Continue(Node::CleanupState);
    }
    if state.review_required {
        return Next::Continue(Node::CleanupState);
    }
    if state.code_changes.is_empty() {
        return Next::Continue(Node::CleanupState);
    }
    Next::Continue(Node::CreatePullRequests)
}

/// After a PR attempt: honor a retry request, continue on success, stop the
/// run on a non-recoverable error, default to cleanup otherwise.
pub fn pr_creation_or_retry(state: &WorkflowState) -> Next {
    if state.stage == WorkflowStage::RetryCreatePullRequests {
        return Next::Continue(Node::CreatePullRequests);
    }
    if !state.pull_requests.is_empty() {
        return Next::Continue(Node::CleanupState);
    }
    if let Some(error) = &state.error {
        if !is_recoverable(error) {
            return Next::End;
        }
    }
    Next::Continue(Node::CleanupState)
}
