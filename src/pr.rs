//! Pull request templating and marker parsing.
//!
//! The body is assembled from the ticket plus per-file change descriptions,
//! and can be re-parsed for its markers (ticket key, ticket link, change
//! bullets) - used both for verification and for finding the owning ticket
//! of an existing PR.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::Ticket;

/// Labels applied to every PR this system opens.
pub const PR_LABELS: &[&str] = &["automated", "tracker-ticket"];

pub fn pr_title(ticket: &Ticket) -> String {
    format!("[{}] {}", ticket.key, ticket.summary)
}

/// Render the PR body. One bullet per change description; the test plan
/// grows an acceptance-criteria item when the ticket defines one.
pub fn render_pr_body(ticket: &Ticket, change_descriptions: &[String]) -> String {
    let changes = change_descriptions
        .iter()
        .filter(|d| !d.is_empty())
        .map(|d| format!("- {}", d))
        .collect::<Vec<_>>()
        .join("\n");

    let mut test_plan = String::from(
        "- [ ] Verify all tests pass\n- [ ] Manual testing completed\n- [ ] Code review completed",
    );
    if let Some(criteria) = &ticket.acceptance_criteria {
        test_plan.push_str(&format!("\n- [ ] Acceptance criteria met:\n  {}", criteria));
    }

    format!(
        r#"## Summary
{summary}

## Changes Made
{changes}

## Ticket
- **ID**: {key}
- **Type**: {ticket_type}
- **Priority**: {priority}
- **Link**: {url}

## Test Plan
{test_plan}
"#,
        summary = ticket.summary,
        changes = changes,
        key = ticket.key,
        ticket_type = ticket.ticket_type.as_deref().unwrap_or("Task"),
        priority = ticket.priority.as_str(),
        url = ticket.url,
        test_plan = test_plan,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrBodyMarkers {
    pub ticket_key: String,
    pub ticket_url: Option<String>,
    pub change_bullets: usize,
}

static ID_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^- \*\*ID\*\*: (\S+)$").expect("ID marker pattern"));
static LINK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^- \*\*Link\*\*: (\S+)$").expect("Link marker pattern"));
static TICKET_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,10}-\d+)\b").expect("ticket key pattern"));

/// Re-parse a generated body for its markers. Returns `None` when the ID
/// marker is missing (not one of ours).
pub fn parse_pr_body(body: &str) -> Option<PrBodyMarkers> {
    let ticket_key = ID_MARKER.captures(body)?[1].to_string();
    let ticket_url = LINK_MARKER.captures(body).map(|c| c[1].to_string());

    let change_bullets = body
        .split("## Changes Made")
        .nth(1)
        .and_then(|rest| rest.split("\n##").next())
        .map(|section| {
            section
                .lines()
                .filter(|line| line.starts_with("- "))
                .count()
        })
        .unwrap_or(0);

    Some(PrBodyMarkers {
        ticket_key,
        ticket_url,
        change_bullets,
    })
}

/// Extract a ticket key (`PROJ-123` style) from arbitrary text.
pub fn extract_ticket_key(text: &str) -> Option<String> {
    TICKET_KEY.captures(text).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TicketPriority, TicketStatus};

    fn ticket() -> Ticket {
        Ticket {
            id: "10001".to_string(),
            key: "DEV-9".to_string(),
            summary: "Harden webhook validation".to_string(),
            description: Some("Verify signatures".to_string()),
            status: TicketStatus::ToDo,
            priority: TicketPriority::High,
            assignee: None,
            reporter: Some("Dana".to_string()),
            created: None,
            updated: None,
            ticket_type: Some("Story".to_string()),
            labels: vec![],
            components: vec![],
            project_key: "DEV".to_string(),
            url: "https://tracker.example.com/browse/DEV-9".to_string(),
            acceptance_criteria: Some("Signatures rejected when stale".to_string()),
        }
    }

    #[test]
    fn test_title_carries_key_and_summary() {
        assert_eq!(pr_title(&ticket()), "[DEV-9] Harden webhook validation");
    }

    #[test]
    fn test_body_round_trip() {
        let descriptions = vec![
            "Added signature check".to_string(),
            "Rejected stale timestamps".to_string(),
            "Documented the header format".to_string(),
        ];
        let body = render_pr_body(&ticket(), &descriptions);

        let markers = parse_pr_body(&body).unwrap();
        assert_eq!(markers.ticket_key, "DEV-9");
        assert_eq!(
            markers.ticket_url.as_deref(),
            Some("https://tracker.example.com/browse/DEV-9")
        );
        assert_eq!(markers.change_bullets, descriptions.len());
    }

    #[test]
    fn test_empty_descriptions_are_dropped_from_bullets() {
        let descriptions = vec!["Real change".to_string(), "".to_string()];
        let body = render_pr_body(&ticket(), &descriptions);
        assert_eq!(parse_pr_body(&body).unwrap().change_bullets, 1);
    }

    #[test]
    fn test_acceptance_criteria_lands_in_test_plan() {
        let body = render_pr_body(&ticket(), &[]);
        assert!(body.contains("Acceptance criteria met"));
        assert!(body.contains("Signatures rejected when stale"));
    }

    #[test]
    fn test_missing_ticket_type_defaults_to_task() {
        let mut t = ticket();
        t.ticket_type = None;
        let body = render_pr_body(&t, &[]);
        assert!(body.contains("- **Type**: Task"));
    }

    #[test]
    fn test_parse_foreign_body_returns_none() {
        assert!(parse_pr_body("just some PR body written by a human").is_none());
    }

    #[test]
    fn test_extract_ticket_key_standard_format() {
        assert_eq!(
            extract_ticket_key("See DEV-123 for background").as_deref(),
            Some("DEV-123")
        );
    }

    #[test]
    fn test_extract_ticket_key_ignores_short_prefixes() {
        assert!(extract_ticket_key("A-1 is not a ticket").is_none());
    }

    #[test]
    fn test_extract_ticket_key_none_in_plain_text() {
        assert!(extract_ticket_key("nothing here").is_none());
    }
}
