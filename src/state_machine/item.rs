use thiserror::Error;

use crate::classifier::FailureKind;
use crate::hub::IssueSnapshot;

use super::state::ItemState;

/// Marker label identifying items this tool manages.
pub const MARKER_LABEL: &str = "greenloop";

const TITLE_PREFIX: &str = "[greenloop] ";
const UNKNOWN_RETRIED_LABEL: &str = "loop:unknown-retried";
const CONFLICT_RETRIED_LABEL: &str = "loop:conflict-retried";
const FAILURE_LABEL_PREFIX: &str = "failure:";

/// Work branch name for a backlog entry.
pub fn branch_for(spec_id: &str) -> String {
    format!("greenloop/{spec_id}")
}

#[derive(Debug, Error)]
pub enum ItemParseError {
    #[error("item #{0} does not carry the '{MARKER_LABEL}' marker label")]
    NotManaged(u64),
    #[error("item #{number} has a malformed title: {title:?}")]
    BadTitle { number: u64, title: String },
    #[error("item #{0} has no recognizable state label")]
    MissingState(u64),
}

/// One backlog entry tracked through its fix-and-verify lifecycle.
///
/// There is no private database: everything here is externalized as the
/// item's title and label set on the hub, and reconstructed from a fresh
/// snapshot on every evaluation. An in-process `WorkItem` is never trusted
/// across invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub number: u64,
    pub spec_id: String,
    pub branch_ref: String,
    pub state: ItemState,
    /// Completed implementation cycles counted against `max_attempts`. Only
    /// implementation failures move this.
    pub attempt: u32,
    pub max_attempts: u32,
    pub timeout_minutes: u32,
    /// An unknown error already got its one conservative retry.
    pub unknown_retried: bool,
    /// A merge conflict already got its one agent resolution attempt.
    pub conflict_retried: bool,
    /// Classification of the most recent failure, if any.
    pub last_failure: Option<FailureKind>,
}

impl WorkItem {
    pub fn new(number: u64, spec_id: &str, max_attempts: u32, timeout_minutes: u32) -> Self {
        Self {
            number,
            spec_id: spec_id.to_string(),
            branch_ref: branch_for(spec_id),
            state: ItemState::Created,
            attempt: 0,
            max_attempts,
            timeout_minutes,
            unknown_retried: false,
            conflict_retried: false,
            last_failure: None,
        }
    }

    /// Grouping key for failure-propagated blocking: the spec id up to its
    /// final dot. Entries sharing a root cause share this key.
    pub fn blocked_group(&self) -> &str {
        blocked_group_of(&self.spec_id)
    }

    /// Structured title encoding the spec id and the attempt counter.
    pub fn title(&self) -> String {
        format!(
            "{TITLE_PREFIX}{} (attempt {}/{})",
            self.spec_id, self.attempt, self.max_attempts
        )
    }

    /// Full target label set for the current state. Written as a complete
    /// replacement, never as a delta.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![MARKER_LABEL.to_string(), self.state.label().to_string()];
        if self.unknown_retried {
            labels.push(UNKNOWN_RETRIED_LABEL.to_string());
        }
        if self.conflict_retried {
            labels.push(CONFLICT_RETRIED_LABEL.to_string());
        }
        if let Some(kind) = self.last_failure {
            labels.push(format!("{FAILURE_LABEL_PREFIX}{}", kind.label_slug()));
        }
        labels
    }

    /// Exact dedup token for the current attempt counter.
    pub fn attempt_token(&self) -> String {
        format!("attempt {}/{}", self.attempt, self.max_attempts)
    }

    /// Reconstruct a work item from a fresh hub snapshot.
    ///
    /// Labels a human may have added are ignored; only the marker, the
    /// `loop:` state labels, and the `failure:` label are interpreted.
    pub fn parse(snapshot: &IssueSnapshot, timeout_minutes: u32) -> Result<Self, ItemParseError> {
        if !snapshot.labels.iter().any(|l| l == MARKER_LABEL) {
            return Err(ItemParseError::NotManaged(snapshot.number));
        }

        let (spec_id, attempt, max_attempts) =
            parse_title(&snapshot.title).ok_or_else(|| ItemParseError::BadTitle {
                number: snapshot.number,
                title: snapshot.title.clone(),
            })?;

        let state = snapshot
            .labels
            .iter()
            .find_map(|l| ItemState::from_label(l))
            .ok_or(ItemParseError::MissingState(snapshot.number))?;

        let last_failure = snapshot
            .labels
            .iter()
            .find_map(|l| l.strip_prefix(FAILURE_LABEL_PREFIX))
            .and_then(FailureKind::from_label_slug);

        Ok(Self {
            number: snapshot.number,
            branch_ref: branch_for(&spec_id),
            spec_id,
            state,
            attempt,
            max_attempts,
            timeout_minutes,
            unknown_retried: snapshot.labels.iter().any(|l| l == UNKNOWN_RETRIED_LABEL),
            conflict_retried: snapshot.labels.iter().any(|l| l == CONFLICT_RETRIED_LABEL),
            last_failure,
        })
    }
}

/// Grouping key of a spec id: everything before the final dot.
pub fn blocked_group_of(spec_id: &str) -> &str {
    spec_id.rsplit_once('.').map(|(group, _)| group).unwrap_or(spec_id)
}

fn parse_title(title: &str) -> Option<(String, u32, u32)> {
    let rest = title.strip_prefix(TITLE_PREFIX)?;
    let (spec_id, counter) = rest.rsplit_once(" (attempt ")?;
    let counter = counter.strip_suffix(')')?;
    let (attempt, max_attempts) = counter.split_once('/')?;
    if spec_id.is_empty() {
        return None;
    }
    Some((
        spec_id.to_string(),
        attempt.parse().ok()?,
        max_attempts.parse().ok()?,
    ))
}
