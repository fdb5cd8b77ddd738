//! Quality gate: decides whether generated changes need a human before a
//! pull request goes out.
//!
//! Heuristic triggers run first (cheap, deterministic); an AI assessment
//! covers what the heuristics can't see. The gate fails closed: if its own
//! analysis errors in any way, the verdict is "requires review" - analysis
//! failure is never "safe to proceed".

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::executor::ToolCallExecutor;
use crate::models::{CodeChange, Ticket};

/// Path fragments that always warrant a human look.
pub const SENSITIVE_PATH_KEYWORDS: &[&str] = &[
    "config",
    "secret",
    "password",
    "key",
    "auth",
    "security",
    "migration",
    "database",
    "schema",
    "production",
    "deploy",
];

const MAX_FILES_WITHOUT_REVIEW: usize = 10;
const MAX_COMPLEX_CHANGES: usize = 3;
const COMPLEXITY_CUTOFF: u32 = 5;

#[derive(Debug, Clone)]
pub struct ReviewVerdict {
    pub required: bool,
    pub reasons: Vec<String>,
}

impl ReviewVerdict {
    fn clear() -> Self {
        Self {
            required: false,
            reasons: Vec::new(),
        }
    }
}

/// Deterministic triggers: too many files, too many complex changes, or any
/// sensitive path touched.
pub fn heuristic_reasons(changes: &[CodeChange]) -> Vec<String> {
    let mut reasons = Vec::new();

    if changes.len() > MAX_FILES_WITHOUT_REVIEW {
        reasons.push(format!(
            "touches {} files (limit {})",
            changes.len(),
            MAX_FILES_WITHOUT_REVIEW
        ));
    }

    let complex = changes
        .iter()
        .filter(|c| c.complexity_score > COMPLEXITY_CUTOFF)
        .count();
    if complex > MAX_COMPLEX_CHANGES {
        reasons.push(format!("{} changes exceed complexity {}", complex, COMPLEXITY_CUTOFF));
    }

    let sensitive: Vec<&str> = changes
        .iter()
        .filter_map(|c| {
            let path = c.file_path.to_lowercase();
            SENSITIVE_PATH_KEYWORDS
                .iter()
                .find(|kw| path.contains(**kw))
                .map(|_| c.file_path.as_str())
        })
        .collect();
    if !sensitive.is_empty() {
        reasons.push(format!("sensitive paths touched: {}", sensitive.join(", ")));
    }

    reasons
}

fn summarize_changes(changes: &[CodeChange]) -> String {
    changes
        .iter()
        .map(|c| {
            format!(
                "- {}: {} (complexity: {}) - {}",
                c.operation.as_str().to_uppercase(),
                c.file_path,
                c.complexity_score,
                c.description.as_deref().unwrap_or("No description")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct QualityGate {
    executor: Arc<ToolCallExecutor>,
}

impl QualityGate {
    pub fn new(executor: Arc<ToolCallExecutor>) -> Self {
        Self { executor }
    }

    /// Assess a change set. Never fails - an unanswerable assessment comes
    /// back as `required: true`.
    pub async fn assess(&self, ticket: &Ticket, changes: &[CodeChange]) -> ReviewVerdict {
        if changes.is_empty() {
            return ReviewVerdict::clear();
        }

        let reasons = heuristic_reasons(changes);
        if !reasons.is_empty() {
            return ReviewVerdict {
                required: true,
                reasons,
            };
        }

        let instruction = format!(
            r#"Analyze these code changes and determine if they require human review.

Ticket: {} - {}

Changes:
{}

Consider: complexity and scope, security implications, database/schema
modifications, configuration changes, production impact.

Return only this JSON:
{{"requires_review": true, "reasoning": "why", "confidence": 0.0}}
"#,
            ticket.key,
            ticket.summary,
            summarize_changes(changes),
        );

        let Some(outcome) = self.executor.execute(&instruction, &[]).await else {
            warn!("review assessment call failed, requiring review");
            return ReviewVerdict {
                required: true,
                reasons: vec!["quality analysis failed; requires human review".to_string()],
            };
        };

        let Some(requires) = outcome
            .structured
            .as_ref()
            .and_then(|v| v.get("requires_review"))
            .and_then(Value::as_bool)
        else {
            warn!("review assessment returned no verdict, requiring review");
            return ReviewVerdict {
                required: true,
                reasons: vec!["quality analysis unparseable; requires human review".to_string()],
            };
        };

        if requires {
            let reasoning = outcome
                .structured
                .as_ref()
                .and_then(|v| v.get("reasoning"))
                .and_then(Value::as_str)
                .unwrap_or("flagged by assessment")
                .to_string();
            ReviewVerdict {
                required: true,
                reasons: vec![reasoning],
            }
        } else {
            ReviewVerdict::clear()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{AgentBackend, EventStream};
    use crate::errors::AgentError;
    use crate::models::{ChangeOp, TicketPriority, TicketStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    fn change(path: &str, complexity: u32) -> CodeChange {
        CodeChange {
            file_path: path.to_string(),
            operation: ChangeOp::Modify,
            old_content: None,
            new_content: None,
            diff: None,
            description: Some("tweak".to_string()),
            complexity_score: complexity,
            requires_tests: false,
            repository: "acme/acme-api".to_string(),
            branch: "feature/ticket-dev-1".to_string(),
        }
    }

    #[test]
    fn test_no_changes_no_reasons() {
        assert!(heuristic_reasons(&[]).is_empty());
    }

    #[test]
    fn test_small_benign_change_set_passes_heuristics() {
        let changes = vec![change("src/lib.rs", 1), change("src/api.rs", 2)];
        assert!(heuristic_reasons(&changes).is_empty());
    }

    #[test]
    fn test_too_many_files_triggers_review() {
        let changes: Vec<_> = (0..11).map(|i| change(&format!("src/f{}.rs", i), 1)).collect();
        let reasons = heuristic_reasons(&changes);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("11 files"));
    }

    #[test]
    fn test_complex_changes_trigger_review() {
        let changes: Vec<_> = (0..4).map(|i| change(&format!("src/f{}.rs", i), 9)).collect();
        let reasons = heuristic_reasons(&changes);
        assert!(reasons.iter().any(|r| r.contains("complexity")));
    }

    #[test]
    fn test_sensitive_path_triggers_review() {
        let changes = vec![change("src/lib.rs", 1), change("db/migration_007.sql", 1)];
        let reasons = heuristic_reasons(&changes);
        assert!(reasons.iter().any(|r| r.contains("migration_007")));
    }

    #[test]
    fn test_sensitive_keyword_match_is_case_insensitive() {
        let changes = vec![change("infra/Production.tf", 1)];
        assert!(!heuristic_reasons(&changes).is_empty());
    }

    struct CannedBackend {
        payload: Option<String>,
    }

    #[async_trait]
    impl AgentBackend for CannedBackend {
        async fn stream(
            &self,
            _instruction: &str,
            _allowed_tools: &[String],
        ) -> Result<EventStream, AgentError> {
            match &self.payload {
                Some(payload) => {
                    let event = crate::stream::AgentEvent::Result {
                        result: Some(payload.clone()),
                        is_error: false,
                    };
                    Ok(Box::pin(futures::stream::iter(vec![Ok(event)])))
                }
                None => Err(AgentError::Transport("backend offline".into())),
            }
        }
    }

    fn gate(payload: Option<&str>) -> QualityGate {
        QualityGate::new(Arc::new(ToolCallExecutor::with_policy(
            Arc::new(CannedBackend {
                payload: payload.map(String::from),
            }),
            1,
            Duration::from_millis(1),
        )))
    }

    fn ticket() -> Ticket {
        Ticket {
            id: "1".to_string(),
            key: "DEV-1".to_string(),
            summary: "s".to_string(),
            description: None,
            status: TicketStatus::ToDo,
            priority: TicketPriority::Medium,
            assignee: None,
            reporter: None,
            created: None,
            updated: None,
            ticket_type: None,
            labels: vec![],
            components: vec![],
            project_key: "DEV".to_string(),
            url: "u".to_string(),
            acceptance_criteria: None,
        }
    }

    #[tokio::test]
    async fn test_assessment_approves_clean_changes() {
        let gate = gate(Some(
            r#"{"requires_review": false, "reasoning": "trivial", "confidence": 0.9}"#,
        ));
        let verdict = gate.assess(&ticket(), &[change("src/lib.rs", 1)]).await;
        assert!(!verdict.required);
    }

    #[tokio::test]
    async fn test_assessment_flags_risky_changes() {
        let gate = gate(Some(
            r#"{"requires_review": true, "reasoning": "touches retry semantics", "confidence": 0.7}"#,
        ));
        let verdict = gate.assess(&ticket(), &[change("src/lib.rs", 1)]).await;
        assert!(verdict.required);
        assert_eq!(verdict.reasons, vec!["touches retry semantics"]);
    }

    #[tokio::test]
    async fn test_analysis_failure_requires_review() {
        let verdict = gate(None).assess(&ticket(), &[change("src/lib.rs", 1)]).await;
        assert!(verdict.required);
        assert!(verdict.reasons[0].contains("quality analysis failed"));
    }

    #[tokio::test]
    async fn test_unparseable_verdict_requires_review() {
        let verdict = gate(Some("maybe? hard to say"))
            .assess(&ticket(), &[change("src/lib.rs", 1)])
            .await;
        assert!(verdict.required);
    }

    #[tokio::test]
    async fn test_heuristics_short_circuit_before_ai() {
        // Backend would approve, but the sensitive path wins first.
        let gate = gate(Some(r#"{"requires_review": false, "reasoning": "fine"}"#));
        let verdict = gate
            .assess(&ticket(), &[change("secrets/key_store.rs", 1)])
            .await;
        assert!(verdict.required);
    }

    #[tokio::test]
    async fn test_empty_change_set_never_requires_review() {
        let verdict = gate(None).assess(&ticket(), &[]).await;
        assert!(!verdict.required);
    }
}
