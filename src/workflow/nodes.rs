//! Stage bodies: the units of work in the graph.
//!
//! Each body takes the current state read-only plus the run context, does
//! its I/O, and returns the field updates to merge. Errors returned here are
//! converted by the graph runner into `{error, stage: error}` - nothing
//! escapes uncaught.

use anyhow::Result;
use rand::Rng;
use tracing::{info, warn};

use crate::codegen;
use crate::models::{
    BranchRecord, ChangeOp, CodeChange, PullRequestRecord, StateUpdate, WorkflowStage,
    WorkflowState,
};
use crate::pr;
use crate::relevance::RELEVANCE_THRESHOLD;
use crate::workflow::{Node, RunContext};

pub async fn run(node: Node, state: &WorkflowState, ctx: &RunContext) -> Result<StateUpdate> {
    match node {
        Node::FetchTickets => fetch_tickets(state, ctx).await,
        Node::SelectTicket => select_ticket(state).await,
        Node::AnalyzeRepositories => analyze_repositories(state, ctx).await,
        Node::GenerateCode => generate_code(state, ctx).await,
        Node::CreatePullRequests => create_pull_requests(state, ctx).await,
        Node::CleanupState => cleanup_state().await,
    }
}

/// Query the tracker for unassigned, ready-to-work tickets. Zero results is
/// a normal terminal condition for the run.
async fn fetch_tickets(state: &WorkflowState, ctx: &RunContext) -> Result<StateUpdate> {
    let mut tickets = ctx
        .tracker
        .search_unassigned_ready_tickets(&state.config.project_key)
        .await?;

    if let Some(only) = &state.config.only_ticket {
        tickets.retain(|t| &t.key == only);
    }

    if tickets.is_empty() {
        info!(project = %state.config.project_key, "no unassigned tickets found");
        return Ok(StateUpdate {
            backlog: Some(Vec::new()),
            stage: Some(WorkflowStage::NoTickets),
            ..Default::default()
        });
    }

    info!(count = tickets.len(), "fetched unassigned tickets");
    Ok(StateUpdate {
        backlog: Some(tickets),
        stage: Some(WorkflowStage::TicketsFetched),
        ..Default::default()
    })
}

/// Pick one ticket from the backlog, uniformly at random - deliberately not
/// priority-ordered - and remove it from the backlog.
async fn select_ticket(state: &WorkflowState) -> Result<StateUpdate> {
    if state.backlog.is_empty() {
        return Ok(StateUpdate {
            current_ticket: Some(None),
            stage: Some(WorkflowStage::NoTickets),
            ..Default::default()
        });
    }

    let index = rand::rng().random_range(0..state.backlog.len());
    let mut remaining = state.backlog.clone();
    let selected = remaining.remove(index);

    info!(key = %selected.key, summary = %selected.summary, "selected ticket");
    Ok(StateUpdate {
        current_ticket: Some(Some(selected)),
        backlog: Some(remaining),
        stage: Some(WorkflowStage::TicketSelected),
        ..Default::default()
    })
}

/// Discover accessible repositories, rank them against the ticket, and keep
/// the top candidates above the relevance threshold.
async fn analyze_repositories(state: &WorkflowState, ctx: &RunContext) -> Result<StateUpdate> {
    let Some(ticket) = &state.current_ticket else {
        return Ok(StateUpdate::failure(
            "ticket analysis failed: no ticket selected",
        ));
    };

    let repositories = ctx.host.list_repositories().await?;
    if repositories.is_empty() {
        return Ok(StateUpdate::failure("No accessible repositories found"));
    }

    let selected = ctx
        .ranker
        .rank(
            ticket,
            repositories,
            state.config.max_repositories_per_ticket,
            RELEVANCE_THRESHOLD,
        )
        .await;

    if selected.is_empty() {
        return Ok(StateUpdate::failure(
            "No relevant repositories found for this ticket",
        ));
    }

    let names = selected
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    info!(count = selected.len(), repos = %names, "selected relevant repositories");
    Ok(StateUpdate {
        selected_repositories: Some(selected),
        stage: Some(WorkflowStage::RepositoriesAnalyzed),
        error: Some(None),
        ..Default::default()
    })
}

/// For each selected repository, sequentially: create the ticket branch,
/// discover files to touch, and commit edits. Repositories are processed one
/// at a time - they share the ticket's branch name, and concurrent edits
/// against it must not race.
async fn generate_code(state: &WorkflowState, ctx: &RunContext) -> Result<StateUpdate> {
    let Some(ticket) = &state.current_ticket else {
        return Ok(StateUpdate::failure(
            "code generation failed: no ticket selected",
        ));
    };
    if state.selected_repositories.is_empty() {
        return Ok(StateUpdate::failure(
            "code generation failed: no repositories selected",
        ));
    }

    let branch = codegen::branch_name(&state.config.branch_prefix, &ticket.key);
    let mut changes: Vec<CodeChange> = Vec::new();
    let mut branch_records: Vec<BranchRecord> = Vec::new();

    for repo in &state.selected_repositories {
        if state.config.dry_run {
            info!(repo = %repo.full_name, branch = %branch, "dry-run: skipping branch creation and edits");
            branch_records.push(BranchRecord {
                repository: repo.full_name.clone(),
                branch: branch.clone(),
                change_descriptions: vec![format!(
                    "[dry-run] would implement {} in {}",
                    ticket.key, repo.name
                )],
            });
            changes.push(CodeChange {
                file_path: format!("[dry-run] {}", repo.name),
                operation: ChangeOp::Modify,
                old_content: None,
                new_content: None,
                diff: None,
                description: Some(format!("[dry-run] planned change for {}", ticket.key)),
                complexity_score: 0,
                requires_tests: false,
                repository: repo.full_name.clone(),
                branch: branch.clone(),
            });
            continue;
        }

        if !codegen::create_branch(&ctx.executor, repo, &branch).await {
            warn!(repo = %repo.full_name, "branch creation failed, skipping repository");
            continue;
        }

        let files = codegen::identify_files(&ctx.executor, repo, ticket).await;
        if files.is_empty() {
            warn!(repo = %repo.full_name, "no files identified for modification");
            continue;
        }

        let mut descriptions = Vec::new();
        for file in &files {
            let Some(modified) =
                codegen::modify_file(&ctx.executor, file, repo, &branch, ticket).await
            else {
                continue;
            };
            descriptions.push(modified.description.clone());
            changes.push(CodeChange {
                file_path: modified.path,
                operation: ChangeOp::Modify,
                old_content: None,
                new_content: None,
                diff: None,
                description: Some(modified.description),
                complexity_score: modified.complexity_score,
                requires_tests: modified.requires_tests,
                repository: repo.full_name.clone(),
                branch: branch.clone(),
            });
        }

        if descriptions.is_empty() {
            warn!(repo = %repo.full_name, "no files were modified");
        } else {
            branch_records.push(BranchRecord {
                repository: repo.full_name.clone(),
                branch: branch.clone(),
                change_descriptions: descriptions,
            });
        }
    }

    if changes.is_empty() {
        if state.generate_attempts < state.config.max_stage_retries {
            info!(
                attempt = state.generate_attempts + 1,
                "nothing generated, scheduling stage retry"
            );
            return Ok(StateUpdate {
                stage: Some(WorkflowStage::RetryGenerateCode),
                generate_attempts: Some(state.generate_attempts + 1),
                error: Some(Some("code generation failed; will retry".to_string())),
                ..Default::default()
            });
        }
        return Ok(StateUpdate::failure("No code changes generated"));
    }

    // The quality gate runs here, not in routing, so edges stay pure. Its
    // verdict is recorded in state and the edge reads the flag.
    if state.config.require_human_review && !state.config.dry_run {
        let verdict = ctx.gate.assess(ticket, &changes).await;
        if verdict.required {
            info!(reasons = %verdict.reasons.join("; "), "changes held for human review");
            return Ok(StateUpdate {
                code_changes: Some(changes),
                branches: Some(branch_records),
                review_required: Some(true),
                review_reasons: Some(verdict.reasons),
                tickets_flagged_for_review: Some(state.tickets_flagged_for_review + 1),
                stage: Some(WorkflowStage::CodeGenerated),
                error: Some(None),
                ..Default::default()
            });
        }
    }

    info!(
        changes = changes.len(),
        repositories = branch_records.len(),
        "code generation complete"
    );
    Ok(StateUpdate {
        code_changes: Some(changes),
        branches: Some(branch_records),
        stage: Some(WorkflowStage::CodeGenerated),
        error: Some(None),
        ..Default::default()
    })
}

/// Open one PR per repository with committed changes, then comment on and
/// transition the ticket (both best-effort).
async fn create_pull_requests(state: &WorkflowState, ctx: &RunContext) -> Result<StateUpdate> {
    let Some(ticket) = &state.current_ticket else {
        return Ok(StateUpdate::failure(
            "pull request creation failed: no ticket selected",
        ));
    };
    if state.branches.is_empty() {
        return Ok(StateUpdate::failure(
            "pull request creation failed: no code changes recorded",
        ));
    }

    let mut created: Vec<PullRequestRecord> = Vec::new();
    let mut fatal_error: Option<String> = None;

    for record in &state.branches {
        let base_branch = state
            .selected_repositories
            .iter()
            .find(|r| r.full_name == record.repository)
            .map(|r| r.default_branch.clone())
            .unwrap_or_else(|| "main".to_string());

        let mut pull_request = PullRequestRecord {
            title: pr::pr_title(ticket),
            body: pr::render_pr_body(ticket, &record.change_descriptions),
            head_branch: record.branch.clone(),
            base_branch,
            repository: record.repository.clone(),
            labels: pr::PR_LABELS.iter().map(|l| l.to_string()).collect(),
            draft: false,
            url: None,
            number: None,
        };

        if state.config.dry_run {
            info!(repo = %record.repository, "dry-run: skipping pull request creation");
            created.push(pull_request);
            continue;
        }

        match ctx.host.open_pull_request(&record.repository, &pull_request).await {
            Ok(Some(result)) => {
                info!(repo = %record.repository, url = %result.url, "pull request created");
                pull_request.url = Some(result.url.clone());
                pull_request.number = Some(result.number);
                created.push(pull_request);

                let comment = format!("Pull request created: {}", result.url);
                if let Err(err) = ctx.tracker.add_comment(&ticket.id, &comment).await {
                    warn!(ticket = %ticket.key, error = %err, "failed to comment on ticket");
                }
            }
            Ok(None) => {
                warn!(repo = %record.repository, "pull request creation rejected");
            }
            Err(err) => {
                warn!(repo = %record.repository, error = %err, "pull request creation failed");
                if !crate::errors::is_recoverable(&err.to_string()) {
                    fatal_error = Some(err.to_string());
                }
            }
        }
    }

    if created.is_empty() {
        if let Some(fatal) = fatal_error {
            return Ok(StateUpdate::failure(fatal));
        }
        if state.pr_attempts < state.config.max_stage_retries {
            info!(attempt = state.pr_attempts + 1, "no PRs created, scheduling stage retry");
            return Ok(StateUpdate {
                stage: Some(WorkflowStage::RetryCreatePullRequests),
                pr_attempts: Some(state.pr_attempts + 1),
                error: Some(Some("no pull requests were created; will retry".to_string())),
                ..Default::default()
            });
        }
        return Ok(StateUpdate::failure("No pull requests were created"));
    }

    if !state.config.dry_run {
        match ctx.tracker.transition_status(&ticket.id, "In Progress").await {
            Ok(true) => {}
            Ok(false) => warn!(ticket = %ticket.key, "ticket transition unavailable"),
            Err(err) => warn!(ticket = %ticket.key, error = %err, "ticket transition failed"),
        }
    }

    let count = created.len() as u32;
    info!(count, ticket = %ticket.key, "pull requests created for ticket");
    Ok(StateUpdate {
        pull_requests: Some(created),
        stage: Some(WorkflowStage::PrsCreated),
        error: Some(None),
        tickets_processed: Some(state.tickets_processed + 1),
        prs_created: Some(state.prs_created + count),
        ..Default::default()
    })
}

/// Reset all per-ticket fields, ready for the next backlog iteration.
async fn cleanup_state() -> Result<StateUpdate> {
    Ok(StateUpdate::cleanup())
}
