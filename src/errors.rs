//! Typed error hierarchy and the centralized error classifier.
//!
//! Two enums cover the two failure surfaces:
//! - `AgentError` - failures while streaming from the AI backend
//! - `WorkflowError` - failures of the graph runner itself
//!
//! Stage-level failures are carried as strings in `WorkflowState.error` and
//! classified by `classify` at the routing layer. The keyword sets live here,
//! in one place, so the recoverable/fatal split stays testable.

use thiserror::Error;

/// Errors raised while streaming events from the AI backend.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The transport to the backend failed (process died, pipe closed,
    /// connection dropped). Retryable.
    #[error("agent transport failure: {0}")]
    Transport(String),

    /// Multiple concurrent sub-tasks inside a single call failed together.
    /// Retryable.
    #[error("agent task group failure: {}", .0.join("; "))]
    TaskGroup(Vec<String>),

    /// One event could not be decoded. Never aborts the stream - the
    /// consumer logs and moves to the next chunk.
    #[error("malformed agent event: {0}")]
    Decode(String),

    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),
}

impl AgentError {
    /// Whether a fresh attempt against the backend is worthwhile.
    /// Decode errors are chunk-scoped and handled in place, not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::TaskGroup(_) | Self::Spawn(_) => true,
            Self::Decode(_) => false,
        }
    }
}

/// Errors from the graph runner itself (not from stage bodies, which are
/// converted into state-level error strings).
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("workflow exceeded {0} transitions without reaching END")]
    StepLimit(usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Scoped to the current ticket; abandon it and continue the run.
    Recoverable,
    /// Invalidates the whole run; retrying is futile or harmful.
    Fatal,
}

/// Errors that stop the entire run. Mostly infrastructure-level conditions
/// where retrying would compound the problem (e.g. rate limiting).
const FATAL_PATTERNS: &[&str] = &[
    "authentication failed",
    "access denied",
    "api rate limit",
    "network timeout",
    "connection refused",
    "service unavailable",
];

/// Ticket-specific conditions that allow the run to continue with the next
/// ticket. "will retry" is the explicit stage-retry indicator.
const RECOVERABLE_PATTERNS: &[&str] = &[
    "no relevant repositories",
    "code generation failed",
    "no accessible repositories",
    "ticket analysis failed",
    "no code changes",
    "no pull requests",
    "requires human review",
    "will retry",
];

/// Classify an error message. Fatal patterns win over recoverable ones;
/// unknown messages default to fatal.
pub fn classify(error: &str) -> ErrorClass {
    if error.is_empty() {
        return ErrorClass::Recoverable;
    }
    let lower = error.to_lowercase();

    for pattern in FATAL_PATTERNS {
        if lower.contains(pattern) {
            return ErrorClass::Fatal;
        }
    }
    for pattern in RECOVERABLE_PATTERNS {
        if lower.contains(pattern) {
            return ErrorClass::Recoverable;
        }
    }
    ErrorClass::Fatal
}

pub fn is_recoverable(error: &str) -> bool {
    classify(error) == ErrorClass::Recoverable
}
