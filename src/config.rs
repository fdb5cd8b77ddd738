//! Process configuration, loaded from the environment.
//!
//! A `.env` file is honored when present (via dotenvy). Validation returns a
//! list of problems rather than failing on the first one, so `--setup` can
//! show everything that needs fixing at once.

use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub tracker_url: String,
    pub tracker_email: String,
    pub tracker_token: String,
    pub project_key: String,
    pub github_token: String,
    pub github_org: Option<String>,
    /// Command used to spawn the AI coding agent.
    pub agent_cmd: String,
    pub max_tickets_per_run: u32,
    pub max_repositories_per_ticket: usize,
    pub require_human_review: bool,
    pub dry_run: bool,
    pub branch_prefix: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => !matches!(v.to_lowercase().as_str(), "false" | "0" | "no" | ""),
        Err(_) => default,
    }
}

impl Settings {
    /// Load settings from the environment. Never fails - missing required
    /// values surface through `validate`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            tracker_url: env_or("TRACKER_URL", ""),
            tracker_email: env_or("TRACKER_EMAIL", ""),
            tracker_token: env_or("TRACKER_API_TOKEN", ""),
            project_key: env_or("TRACKER_PROJECT_KEY", "DEV"),
            github_token: env_or("GITHUB_TOKEN", ""),
            github_org: env::var("GITHUB_ORG").ok().filter(|v| !v.is_empty()),
            agent_cmd: env_or("AUTOPR_AGENT_CMD", "claude"),
            max_tickets_per_run: env_or("MAX_TICKETS_PER_RUN", "5").parse().unwrap_or(5),
            max_repositories_per_ticket: env_or("MAX_REPOS_PER_TICKET", "3").parse().unwrap_or(3),
            require_human_review: env_flag("REQUIRE_HUMAN_REVIEW", true),
            dry_run: env_flag("DRY_RUN", false),
            branch_prefix: env_or("BRANCH_PREFIX", "feature/ticket-"),
        }
    }

    /// Check for missing credentials and out-of-range limits.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let required = [
            ("TRACKER_URL", &self.tracker_url),
            ("TRACKER_EMAIL", &self.tracker_email),
            ("TRACKER_API_TOKEN", &self.tracker_token),
            ("TRACKER_PROJECT_KEY", &self.project_key),
            ("GITHUB_TOKEN", &self.github_token),
        ];
        for (name, value) in required {
            if value.is_empty() {
                problems.push(format!("Missing required environment variable: {}", name));
            }
        }

        if !(1..=20).contains(&self.max_tickets_per_run) {
            problems.push("MAX_TICKETS_PER_RUN must be between 1 and 20".to_string());
        }
        if !(1..=10).contains(&self.max_repositories_per_ticket) {
            problems.push("MAX_REPOS_PER_TICKET must be between 1 and 10".to_string());
        }
        if self.branch_prefix.is_empty() {
            problems.push("BRANCH_PREFIX must not be empty".to_string());
        }

        problems
    }
}
