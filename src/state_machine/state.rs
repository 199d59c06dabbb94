use std::fmt;

use crate::classifier::FailureKind;

use super::item::WorkItem;

/// The seven states of the greenloop item state machine.
///
/// The happy path is: CREATED → VERIFYING → MERGED. Failures detour through
/// AWAITING_RETRY (and AGENT_RUNNING while a fix is in flight) or park the
/// item in MERGE_CONFLICT / MANUAL_INTERVENTION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Created,
    Verifying,
    AwaitingRetry,
    AgentRunning,
    MergeConflict,
    ManualIntervention,
    Merged,
}

impl ItemState {
    /// The `loop:` label encoding this state on the hub.
    pub fn label(self) -> &'static str {
        match self {
            ItemState::Created => "loop:created",
            ItemState::Verifying => "loop:verifying",
            ItemState::AwaitingRetry => "loop:awaiting-retry",
            ItemState::AgentRunning => "loop:agent-running",
            ItemState::MergeConflict => "loop:merge-conflict",
            ItemState::ManualIntervention => "loop:manual-intervention",
            ItemState::Merged => "loop:merged",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "loop:created" => Some(ItemState::Created),
            "loop:verifying" => Some(ItemState::Verifying),
            "loop:awaiting-retry" => Some(ItemState::AwaitingRetry),
            "loop:agent-running" => Some(ItemState::AgentRunning),
            "loop:merge-conflict" => Some(ItemState::MergeConflict),
            "loop:manual-intervention" => Some(ItemState::ManualIntervention),
            "loop:merged" => Some(ItemState::Merged),
            _ => None,
        }
    }

    /// States that occupy the single processing slot. Items parked for a
    /// human (MERGE_CONFLICT, MANUAL_INTERVENTION) and merged items do not
    /// hold up the rest of the backlog.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ItemState::Created
                | ItemState::Verifying
                | ItemState::AwaitingRetry
                | ItemState::AgentRunning
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ItemState::Merged
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Created => write!(f, "CREATED"),
            ItemState::Verifying => write!(f, "VERIFYING"),
            ItemState::AwaitingRetry => write!(f, "AWAITING_RETRY"),
            ItemState::AgentRunning => write!(f, "AGENT_RUNNING"),
            ItemState::MergeConflict => write!(f, "MERGE_CONFLICT"),
            ItemState::ManualIntervention => write!(f, "MANUAL_INTERVENTION"),
            ItemState::Merged => write!(f, "MERGED"),
        }
    }
}

/// An observation made during one evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleSignal {
    /// The item's branch is being verified for the first time.
    VerificationStarted,
    /// Quality and functional checks both passed on a synced branch.
    VerificationPassed,
    /// Verification did not pass; the classifier says why.
    VerificationFailed(FailureKind),
    /// A fix request was posted and accepted.
    AgentTriggered,
    /// The in-flight agent execution reached a terminal record.
    AgentFinished,
    /// The failure kind needs no agent; the branch is due for re-verification.
    RetryDue,
}

/// The result of evaluating a signal against an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The item moved to a new state.
    To(ItemState),
    /// The signal does not apply in the current state and changed nothing.
    Ignored,
}

/// Drives a `WorkItem` through the state machine.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the transition for the given item and signal.
    ///
    /// Only implementation failures advance the attempt counter; every other
    /// failure kind retries or parks the item without consuming an attempt.
    /// Reaching `max_attempts` forces MANUAL_INTERVENTION. A signal that has
    /// no meaning in the current state is ignored, so stale observations from
    /// a previous cycle cannot corrupt an item.
    pub fn next(item: &mut WorkItem, signal: CycleSignal) -> Transition {
        let target = match (item.state, &signal) {
            (ItemState::Created, CycleSignal::VerificationStarted) => Some(ItemState::Verifying),
            (ItemState::Verifying, CycleSignal::VerificationPassed) => {
                item.last_failure = None;
                item.unknown_retried = false;
                item.conflict_retried = false;
                Some(ItemState::Merged)
            }
            (ItemState::Verifying, CycleSignal::VerificationFailed(kind)) => {
                Some(Self::handle_failure(item, *kind))
            }
            (ItemState::AwaitingRetry, CycleSignal::AgentTriggered) => Some(ItemState::AgentRunning),
            (ItemState::AwaitingRetry, CycleSignal::RetryDue) => Some(ItemState::Verifying),
            (ItemState::MergeConflict, CycleSignal::AgentTriggered) => {
                // The one permitted resolution attempt is consumed when it
                // starts, not when the conflict is first observed.
                item.conflict_retried = true;
                Some(ItemState::AgentRunning)
            }
            (ItemState::MergeConflict, CycleSignal::RetryDue) => Some(ItemState::Verifying),
            (ItemState::AgentRunning, CycleSignal::AgentFinished) => Some(ItemState::Verifying),
            _ => None,
        };

        match target {
            Some(state) => {
                item.state = state;
                Transition::To(state)
            }
            None => Transition::Ignored,
        }
    }

    fn handle_failure(item: &mut WorkItem, kind: FailureKind) -> ItemState {
        match kind {
            FailureKind::ImplementationFailure => {
                item.unknown_retried = false;
                item.conflict_retried = false;
                if item.attempt < item.max_attempts {
                    item.attempt += 1;
                }
                if item.attempt >= item.max_attempts {
                    item.last_failure = Some(FailureKind::MaxAttemptsReached);
                    ItemState::ManualIntervention
                } else {
                    item.last_failure = Some(kind);
                    ItemState::AwaitingRetry
                }
            }
            FailureKind::QualityOnlyFailure
            | FailureKind::SyncRequired
            | FailureKind::TransientInfra => {
                item.unknown_retried = false;
                item.conflict_retried = false;
                item.last_failure = Some(kind);
                ItemState::AwaitingRetry
            }
            FailureKind::MergeConflict => {
                item.unknown_retried = false;
                item.last_failure = Some(kind);
                if item.conflict_retried {
                    ItemState::ManualIntervention
                } else {
                    ItemState::MergeConflict
                }
            }
            FailureKind::UnknownError => {
                item.conflict_retried = false;
                item.last_failure = Some(kind);
                if item.unknown_retried {
                    ItemState::ManualIntervention
                } else {
                    item.unknown_retried = true;
                    ItemState::AwaitingRetry
                }
            }
            FailureKind::BudgetExceeded | FailureKind::MaxAttemptsReached => {
                item.last_failure = Some(kind);
                ItemState::ManualIntervention
            }
        }
    }
}
