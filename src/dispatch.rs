//! Race-safe dispatch: at most one trigger comment per (item, attempt).
//!
//! Concurrent evaluators of the same item cannot take a lock, so the
//! guarantee is probabilistic narrowing plus a content-based backstop: the
//! whole check runs against fresh reads with no yield between the guards and
//! the post, and the dedup scan in the comment stream catches whatever the
//! narrowing misses.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::hub::{HubError, IssueHub, RecordKind};
use crate::staleness;
use crate::state_machine::{ItemParseError, ItemState, WorkItem};

/// Marker carried by every comment asking the agent to implement a scenario.
pub const IMPLEMENT_MARKER: &str = "<!-- greenloop:implement -->";

/// Marker carried by every comment asking the agent to resolve a conflict.
/// Distinct from [`IMPLEMENT_MARKER`] because a resolution request reuses the
/// item's current attempt token and must not collide with the implementation
/// trigger posted for that same attempt.
pub const RESOLVE_MARKER: &str = "<!-- greenloop:resolve-conflict -->";

/// How far back to ask the hub for agent records. A legitimate agent session
/// can run for the better part of an hour, so the lookback is much wider than
/// the staleness threshold that decides liveness.
const RECORD_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The candidate comment was posted.
    Triggered,
    /// A non-stale agent execution already exists for this branch.
    AlreadyRunning,
    /// A comment with this marker and attempt token already exists.
    AlreadyPosted,
    /// The item moved on while the caller was deciding; the candidate was
    /// computed against an attempt or state that no longer holds.
    Superseded,
}

impl TriggerOutcome {
    pub fn triggered(self) -> bool {
        self == TriggerOutcome::Triggered
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Parse(#[from] ItemParseError),
}

/// Post `body` as the trigger for the item's current attempt, unless a guard
/// says someone else already did.
///
/// Guards run in order against fresh reads:
/// 1. the item is re-read; a changed attempt counter or a state that no
///    longer wants a trigger aborts,
/// 2. non-stale agent records for the item's branch abort with
///    `AlreadyRunning`,
/// 3. an existing comment containing both `marker` and the exact current
///    attempt token aborts with `AlreadyPosted`. Matching is content-based
///    only; filtering by comment author would silently disable the check
///    when the posting identity varies across callers.
pub async fn maybe_trigger<H: IssueHub>(
    hub: &H,
    item: &WorkItem,
    marker: &str,
    body: &str,
    now: DateTime<Utc>,
    staleness_minutes: u32,
) -> Result<TriggerOutcome, DispatchError> {
    let snapshot = hub.get_item(item.number).await?;
    let fresh = WorkItem::parse(&snapshot, item.timeout_minutes)?;

    if fresh.attempt != item.attempt || fresh.max_attempts != item.max_attempts {
        return Ok(TriggerOutcome::Superseded);
    }
    match fresh.state {
        ItemState::AwaitingRetry | ItemState::MergeConflict => {}
        ItemState::AgentRunning => return Ok(TriggerOutcome::AlreadyRunning),
        _ => return Ok(TriggerOutcome::Superseded),
    }

    let since = now - Duration::hours(RECORD_LOOKBACK_HOURS);
    let records = hub.list_execution_records(RecordKind::Agent, since).await?;
    let branch_busy = records.iter().any(|record| {
        record.branch.as_deref() == Some(fresh.branch_ref.as_str())
            && staleness::is_active(record, now, staleness_minutes)
    });
    if branch_busy {
        return Ok(TriggerOutcome::AlreadyRunning);
    }

    let token = fresh.attempt_token();
    let comments = hub.list_comments(item.number).await?;
    let already_posted = comments
        .iter()
        .any(|comment| comment.body.contains(marker) && comment.body.contains(&token));
    if already_posted {
        return Ok(TriggerOutcome::AlreadyPosted);
    }

    hub.post_comment(item.number, body).await?;
    Ok(TriggerOutcome::Triggered)
}

/// Assemble a trigger comment body: the dedup marker line followed by the
/// prompt, which carries the attempt token.
pub fn trigger_body(marker: &str, prompt: &str) -> String {
    format!("{marker}\n\n{prompt}")
}
