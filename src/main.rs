use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use autopr::clients::{CliAgent, GithubClient, TrackerClient};
use autopr::config::Settings;
use autopr::driver::{self, RunOptions};
use autopr::workflow::RunContext;

#[derive(Parser)]
#[command(name = "autopr")]
#[command(version, about = "Backlog-ticket-to-pull-request automation")]
struct Cli {
    /// Maximum number of tickets to process in one run
    #[arg(long)]
    max_tickets: Option<u32>,

    /// Make no external changes; log what would happen
    #[arg(long)]
    dry_run: bool,

    /// Skip the human-review quality gate
    #[arg(long)]
    no_review: bool,

    /// Process a specific ticket only (e.g. DEV-123)
    #[arg(long)]
    ticket: Option<String>,

    /// Override the tracker project key
    #[arg(long)]
    project: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    setup: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "autopr=debug" } else { "autopr=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let settings = Settings::from_env();
    let problems = settings.validate();

    if cli.setup {
        if problems.is_empty() {
            println!("Configuration OK");
            println!(
                "Project = {}, max tickets = {}, dry run = {}",
                settings.project_key, settings.max_tickets_per_run, settings.dry_run
            );
            return ExitCode::SUCCESS;
        }
        eprintln!("Configuration problems:");
        for problem in &problems {
            eprintln!("  - {}", problem);
        }
        return ExitCode::FAILURE;
    }

    if !problems.is_empty() {
        eprintln!("Configuration invalid (run with --setup for details):");
        for problem in &problems {
            eprintln!("  - {}", problem);
        }
        return ExitCode::FAILURE;
    }

    let tracker = Arc::new(TrackerClient::new(
        &settings.tracker_url,
        &settings.tracker_email,
        &settings.tracker_token,
    ));
    let host = Arc::new(GithubClient::new(
        &settings.github_token,
        settings.github_org.clone(),
    ));
    let backend = Arc::new(CliAgent::new(&settings.agent_cmd));
    let ctx = RunContext::new(tracker, host, backend);

    let options = RunOptions {
        max_tickets: cli.max_tickets,
        dry_run: cli.dry_run,
        skip_review: cli.no_review,
        only_ticket: cli.ticket,
        project_key: cli.project,
    };
    let config = driver::build_run_config(&settings, &options);

    let report = driver::run_workflow(config, ctx).await;

    println!(
        "Processed {} tickets, created {} pull requests ({} flagged for review) in {:.1}s",
        report.tickets_processed,
        report.prs_created,
        report.tickets_flagged_for_review,
        report.duration_secs
    );
    if report.success {
        ExitCode::SUCCESS
    } else {
        eprintln!(
            "Run failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
        ExitCode::FAILURE
    }
}
