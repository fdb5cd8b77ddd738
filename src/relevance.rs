//! Repository-to-ticket relevance scoring.
//!
//! Two layers: a deterministic heuristic (always computed, used as the
//! fallback) and an AI-assisted ranking over a bounded candidate list.
//! Relevance is never a hard dependency for workflow progress - every
//! failure path degrades to the heuristic ordering.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::executor::ToolCallExecutor;
use crate::models::{Repository, Ticket};

/// Candidates at or below this score are not worth opening a branch for.
pub const RELEVANCE_THRESHOLD: f32 = 0.3;

/// Most candidates shown to the AI ranker in one call.
const CANDIDATE_LIMIT: usize = 20;

/// Accumulate weighted evidence that a repository is relevant to a ticket:
/// component name appearing in the repository name (+0.3 per match), label
/// match (+0.2), ticket description mentioning the repository's primary
/// language (+0.3) or a detected framework (+0.2 each). Clamped to [0, 1].
pub fn heuristic_score(ticket: &Ticket, repo: &Repository) -> f32 {
    let mut score = 0.0f32;
    let repo_name = repo.name.to_lowercase();

    for component in &ticket.components {
        if repo_name.contains(&component.to_lowercase()) {
            score += 0.3;
        }
    }
    for label in &ticket.labels {
        if repo_name.contains(&label.to_lowercase()) {
            score += 0.2;
        }
    }

    if let Some(description) = &ticket.description {
        let description = description.to_lowercase();
        if let Some(language) = repo.primary_language {
            if description.contains(&language.as_str().to_lowercase()) {
                score += 0.3;
            }
        }
        for framework in &repo.frameworks {
            if description.contains(&framework.to_lowercase()) {
                score += 0.2;
            }
        }
    }

    score.min(1.0)
}

pub struct RelevanceRanker {
    executor: Arc<ToolCallExecutor>,
}

impl RelevanceRanker {
    pub fn new(executor: Arc<ToolCallExecutor>) -> Self {
        Self { executor }
    }

    /// Score and select repositories for a ticket: at most `max` candidates,
    /// sorted descending, admitting only scores above `threshold`. An empty
    /// result is a normal, ticket-scoped outcome.
    pub async fn rank(
        &self,
        ticket: &Ticket,
        repos: Vec<Repository>,
        max: usize,
        threshold: f32,
    ) -> Vec<Repository> {
        let mut scored: Vec<Repository> = repos
            .into_iter()
            .map(|mut repo| {
                repo.relevance_score = heuristic_score(ticket, &repo);
                repo.relevance_reasoning =
                    Some("heuristic: component/label/language/framework matches".to_string());
                repo
            })
            .collect();

        // Deterministic order before the AI sees anything: heuristic score
        // descending, name as tie-break.
        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });

        if let Some(ai_scored) = self.ai_rank(ticket, &mut scored, max).await {
            debug!(count = ai_scored, "applied AI relevance scores");
        } else {
            warn!("AI relevance ranking unavailable, keeping heuristic scores");
        }

        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        scored.retain(|repo| repo.relevance_score > threshold);
        scored.truncate(max);
        scored
    }

    /// Ask the backend to rank the bounded candidate list. Returns how many
    /// repositories received an AI score, or `None` when the call or its
    /// payload was unusable.
    async fn ai_rank(&self, ticket: &Ticket, repos: &mut [Repository], k: usize) -> Option<usize> {
        if repos.is_empty() {
            return Some(0);
        }

        let candidates = repos
            .iter()
            .take(CANDIDATE_LIMIT)
            .map(|r| {
                format!(
                    "- {} (language: {}, url: {})",
                    r.name,
                    r.primary_language.map(|l| l.as_str()).unwrap_or("unknown"),
                    r.url
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let instruction = format!(
            r#"Rank these repositories by how relevant they are for implementing the ticket.

Ticket: {} - {}
Description: {}
Components: {}
Labels: {}

Candidate repositories:
{}

Return strictly the top {} candidates with relevance_score > 0.3 as a JSON list:
[{{"name": "repo-name", "relevance_score": 0.0, "reasoning": "why"}}]
"#,
            ticket.key,
            ticket.summary,
            ticket.description.as_deref().unwrap_or(""),
            ticket.components.join(", "),
            ticket.labels.join(", "),
            candidates,
            k,
        );

        let outcome = self.executor.execute(&instruction, &[]).await?;
        let entries = outcome.structured.as_ref()?.as_array()?.clone();

        let mut applied = 0;
        for entry in entries {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(score) = entry.get("relevance_score").and_then(Value::as_f64) else {
                continue;
            };
            if let Some(repo) = repos.iter_mut().find(|r| r.name == name) {
                repo.relevance_score = (score as f32).clamp(0.0, 1.0);
                repo.relevance_reasoning = entry
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(repo.relevance_reasoning.take());
                applied += 1;
            }
        }

        if applied == 0 { None } else { Some(applied) }
    }
}
