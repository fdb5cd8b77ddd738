//! Run driver: builds the initial state, runs the graph to completion, and
//! reduces the final state into a report.

use std::time::Instant;

use tracing::{error, info};

use crate::config::Settings;
use crate::models::{RunConfig, RunReport, WorkflowState};
use crate::workflow::{RunContext, WorkflowGraph};

/// CLI-level overrides applied on top of the environment settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_tickets: Option<u32>,
    pub dry_run: bool,
    pub skip_review: bool,
    pub only_ticket: Option<String>,
    pub project_key: Option<String>,
}

/// Merge settings and CLI options into the per-run configuration. A
/// single-ticket override forces a budget of one.
pub fn build_run_config(settings: &Settings, options: &RunOptions) -> RunConfig {
    let max_tickets = if options.only_ticket.is_some() {
        1
    } else {
        options.max_tickets.unwrap_or(settings.max_tickets_per_run)
    };

    RunConfig {
        project_key: options
            .project_key
            .clone()
            .unwrap_or_else(|| settings.project_key.clone()),
        max_tickets_per_run: max_tickets,
        max_repositories_per_ticket: settings.max_repositories_per_ticket,
        require_human_review: settings.require_human_review && !options.skip_review,
        dry_run: settings.dry_run || options.dry_run,
        branch_prefix: settings.branch_prefix.clone(),
        only_ticket: options.only_ticket.clone(),
        ..RunConfig::default()
    }
}

/// Run the workflow to completion and report. Partial progress is always
/// included, even when the run fails.
pub async fn run_workflow(config: RunConfig, ctx: RunContext) -> RunReport {
    let started = Instant::now();
    let mut state = WorkflowState::new(config);
    let graph = WorkflowGraph::new(ctx);

    let runner_error = graph.run(&mut state).await.err().map(|e| e.to_string());

    // A run succeeds when it ends without an active error; recovered
    // per-ticket errors are surfaced in `error` for visibility only.
    let success = runner_error.is_none() && state.error.is_none();
    let error = runner_error
        .or_else(|| state.error.clone())
        .or_else(|| state.last_error.clone());

    let report = RunReport {
        success,
        tickets_processed: state.tickets_processed,
        prs_created: state.prs_created,
        tickets_flagged_for_review: state.tickets_flagged_for_review,
        final_stage: state.stage,
        error,
        duration_secs: started.elapsed().as_secs_f64(),
    };

    if report.success {
        info!(
            tickets = report.tickets_processed,
            prs = report.prs_created,
            "run completed"
        );
    } else {
        error!(
            tickets = report.tickets_processed,
            prs = report.prs_created,
            error = report.error.as_deref().unwrap_or("unknown"),
            "run failed"
        );
    }
    report
}
