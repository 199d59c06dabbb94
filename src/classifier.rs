//! Maps one observed failure to the policy that handles it.
//!
//! The classifier is a pure function over the verification result, the agent
//! execution result, and the git sync status. It knows nothing about the
//! state machine; the state machine consumes [`FailureKind`] as an opaque
//! tagged value. First matching rule wins, and the rules are ordered so that
//! a true merge conflict is never shadowed by a later pattern and an
//! infrastructure merge failure is never mislabeled as a conflict.

use crate::agent::ExecutionResult;
use crate::git::SyncStatus;
use crate::verify::CheckResult;

/// Result subtypes the agent substrate reports when a run hits a hard limit.
const BUDGET_SUBTYPES: &[&str] = &[
    "error_max_budget",
    "error_max_turns",
    "error_structured_output_retry",
];

/// Error-text fragments that indicate a transient substrate problem.
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "429",
    "502",
    "503",
    "connection reset",
    "connection refused",
    "econnreset",
    "network",
    "out of memory",
    "resource exhausted",
];

/// Error-text fragments that indicate broken code rather than broken infra.
const PERSISTENT_SIGNATURES: &[&str] = &[
    "syntax error",
    "syntaxerror",
    "referenceerror",
    "typeerror",
    "is not defined",
    "cannot find module",
    "module not found",
    "no such file",
    "enoent",
];

/// The failure taxonomy. Every observed failure maps to exactly one kind,
/// and each kind carries a fixed retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Functional assertions failed. The only kind that consumes the
    /// per-item attempt budget.
    ImplementationFailure,
    /// Quality checks failed while functional assertions passed.
    QualityOnlyFailure,
    /// The work branch is behind base and no merge was attempted.
    SyncRequired,
    /// True two-sided conflict markers in the merge index.
    MergeConflict,
    /// Transient substrate failure. Retries on the normal cadence.
    TransientInfra,
    /// The agent run hit a budget, turn, or structured-output limit.
    BudgetExceeded,
    /// The attempt budget is exhausted. Derived by the state machine, never
    /// by classification.
    MaxAttemptsReached,
    /// Nothing recognizable. Retried once conservatively, then escalated.
    UnknownError,
}

/// How a failure kind is handled. `requires_human` means the first
/// occurrence already goes to manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub counts_as_attempt: bool,
    pub retryable: bool,
    pub triggers_agent: bool,
    pub requires_human: bool,
}

impl FailureKind {
    pub fn policy(self) -> RetryPolicy {
        match self {
            FailureKind::ImplementationFailure => RetryPolicy {
                counts_as_attempt: true,
                retryable: true,
                triggers_agent: true,
                requires_human: false,
            },
            FailureKind::QualityOnlyFailure => RetryPolicy {
                counts_as_attempt: false,
                retryable: true,
                triggers_agent: true,
                requires_human: false,
            },
            FailureKind::SyncRequired => RetryPolicy {
                counts_as_attempt: false,
                retryable: true,
                triggers_agent: false,
                requires_human: false,
            },
            FailureKind::MergeConflict => RetryPolicy {
                counts_as_attempt: false,
                retryable: true,
                triggers_agent: true,
                requires_human: false,
            },
            FailureKind::TransientInfra => RetryPolicy {
                counts_as_attempt: false,
                retryable: true,
                triggers_agent: false,
                requires_human: false,
            },
            FailureKind::BudgetExceeded => RetryPolicy {
                counts_as_attempt: false,
                retryable: false,
                triggers_agent: false,
                requires_human: true,
            },
            FailureKind::MaxAttemptsReached => RetryPolicy {
                counts_as_attempt: false,
                retryable: false,
                triggers_agent: false,
                requires_human: true,
            },
            FailureKind::UnknownError => RetryPolicy {
                counts_as_attempt: false,
                retryable: true,
                triggers_agent: false,
                requires_human: false,
            },
        }
    }

    /// Slug used in the `failure:<slug>` label.
    pub fn label_slug(self) -> &'static str {
        match self {
            FailureKind::ImplementationFailure => "implementation",
            FailureKind::QualityOnlyFailure => "quality",
            FailureKind::SyncRequired => "sync",
            FailureKind::MergeConflict => "conflict",
            FailureKind::TransientInfra => "transient",
            FailureKind::BudgetExceeded => "budget",
            FailureKind::MaxAttemptsReached => "max-attempts",
            FailureKind::UnknownError => "unknown",
        }
    }

    pub fn from_label_slug(slug: &str) -> Option<Self> {
        match slug {
            "implementation" => Some(FailureKind::ImplementationFailure),
            "quality" => Some(FailureKind::QualityOnlyFailure),
            "sync" => Some(FailureKind::SyncRequired),
            "conflict" => Some(FailureKind::MergeConflict),
            "transient" => Some(FailureKind::TransientInfra),
            "budget" => Some(FailureKind::BudgetExceeded),
            "max-attempts" => Some(FailureKind::MaxAttemptsReached),
            "unknown" => Some(FailureKind::UnknownError),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureKind::ImplementationFailure => "implementation failure",
            FailureKind::QualityOnlyFailure => "quality-only failure",
            FailureKind::SyncRequired => "sync required",
            FailureKind::MergeConflict => "merge conflict",
            FailureKind::TransientInfra => "transient infrastructure failure",
            FailureKind::BudgetExceeded => "budget exceeded",
            FailureKind::MaxAttemptsReached => "max attempts reached",
            FailureKind::UnknownError => "unknown error",
        };
        write!(f, "{text}")
    }
}

/// Classify one observed failure. First matching rule wins:
///
/// 1. true two-sided conflicts in the merge index
/// 2. merge step failed with no conflict markers
/// 3. branch behind base, merge never attempted
/// 4. quality checks failed, functional assertions passed
/// 5. functional assertions failed
/// 6. structured execution-error subtype
/// 7. error-text signature match, transient before persistent
pub fn classify(
    check: Option<&CheckResult>,
    exec: Option<&ExecutionResult>,
    sync: &SyncStatus,
) -> FailureKind {
    if sync.has_conflicts() {
        return FailureKind::MergeConflict;
    }
    // A failed merge without conflict markers is broken infrastructure, not
    // a conflict. Labeling it a conflict parks the item for a human who will
    // find nothing to resolve.
    if sync.merge_attempted && !sync.merge_clean {
        return FailureKind::TransientInfra;
    }
    if sync.behind_base && !sync.merge_attempted {
        return FailureKind::SyncRequired;
    }

    if let Some(check) = check {
        if !check.quality_passed && check.functional_passed {
            return FailureKind::QualityOnlyFailure;
        }
        if !check.functional_passed {
            return FailureKind::ImplementationFailure;
        }
    }

    if let Some(exec) = exec {
        if exec.is_error {
            return classify_execution(exec);
        }
    }

    FailureKind::UnknownError
}

fn classify_execution(exec: &ExecutionResult) -> FailureKind {
    match exec.subtype.as_deref() {
        Some(subtype) if BUDGET_SUBTYPES.contains(&subtype) => FailureKind::BudgetExceeded,
        // The substrate reports free-form runtime errors under this subtype;
        // the text is all there is to go on.
        Some("error_during_execution") | None => classify_error_text(&exec.errors.join("\n")),
        Some(_) => FailureKind::UnknownError,
    }
}

/// Pattern-match raw error text against known signatures.
pub fn classify_error_text(text: &str) -> FailureKind {
    let lower = text.to_lowercase();
    if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return FailureKind::TransientInfra;
    }
    if PERSISTENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return FailureKind::ImplementationFailure;
    }
    FailureKind::UnknownError
}
