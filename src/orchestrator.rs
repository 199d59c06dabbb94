//! The cycle driver: one stateless evaluation of the whole pipeline.
//!
//! Each [`Orchestrator::run_cycle`] call starts from fresh hub reads,
//! recomputes the active item's target state, applies it as a full overwrite,
//! and triggers at most one agent run. Nothing in memory survives between
//! cycles, so concurrent or duplicated invocations converge on the same
//! external state instead of corrupting it.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::agent::{
    AgentRequest, AgentRunner, ExecutionResult, escalation_for, implement_prompt,
    resolve_conflict_prompt,
};
use crate::classifier::{FailureKind, classify, classify_error_text};
use crate::config::GreenloopConfig;
use crate::cost::{CostGovernor, CostReport};
use crate::dispatch::{
    IMPLEMENT_MARKER, RESOLVE_MARKER, TriggerOutcome, maybe_trigger, trigger_body,
};
use crate::error::GreenloopError;
use crate::git::{Conflict, GitManager, SyncStatus};
use crate::hub::{ExecutionRecord, IssueHub, RecordKind};
use crate::selector::{Backlog, SpecEntry, select_next};
use crate::staleness;
use crate::state_machine::{
    CycleSignal, ItemState, MARKER_LABEL, StateMachine, WorkItem, blocked_group_of,
};
use crate::ui::CycleProgress;
use crate::verify::{ChecksRunner, VerifyError, tail};

/// How far back to ask the hub for agent records when deciding whether an
/// AGENT_RUNNING item still has live work behind it.
const AGENT_LOOKBACK_HOURS: i64 = 24;

const RECOVERY_EXCERPT_CHARS: usize = 2_000;

/// What one evaluation cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cost governor blocked all new work.
    Denied(CostReport),
    /// Nothing to evaluate and nothing selectable to start.
    Idle,
    /// An agent execution is still live for the active item.
    Waiting { number: u64 },
    /// The active item moved, or stays put until the next cadence tick.
    Progressed { number: u64, state: ItemState },
    /// The active item went green and was merged and closed.
    Merged { number: u64 },
    /// The active item was parked for a human.
    Parked { number: u64, kind: FailureKind },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Denied(report) => write!(
                f,
                "budget gate closed (daily ${:.2}, weekly ${:.2} spent)",
                report.daily_spend, report.weekly_spend
            ),
            CycleOutcome::Idle => write!(f, "no selectable backlog entry"),
            CycleOutcome::Waiting { number } => {
                write!(f, "item #{number}: agent still running")
            }
            CycleOutcome::Progressed { number, state } => {
                write!(f, "item #{number} is now {state}")
            }
            CycleOutcome::Merged { number } => write!(f, "item #{number} merged"),
            CycleOutcome::Parked { number, kind } => {
                write!(f, "item #{number} parked for manual intervention ({kind})")
            }
        }
    }
}

/// Snapshot assembled for the `status` subcommand.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub items: Vec<WorkItem>,
    pub cost: CostReport,
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub phantom_runs: usize,
    pub backlog_total: usize,
    pub backlog_startable: usize,
    pub backlog_blocked: usize,
}

/// Composes the selector, the cost governor, the state machine, and the
/// dispatcher with the external collaborators into the fix-until-green loop.
pub struct Orchestrator<H, A, C> {
    pub hub: H,
    pub agent: A,
    pub checks: C,
    /// Local checkout used for branch sync and conflict probing. Without one
    /// the sync step is skipped and every branch is treated as up to date.
    pub git: Option<GitManager>,
    pub backlog: Backlog,
    pub config: GreenloopConfig,
}

impl<H: IssueHub, A: AgentRunner, C: ChecksRunner> Orchestrator<H, A, C> {
    pub fn new(
        hub: H,
        agent: A,
        checks: C,
        git: Option<GitManager>,
        backlog: Backlog,
        config: GreenloopConfig,
    ) -> Self {
        Self {
            hub,
            agent,
            checks,
            git,
            backlog,
            config,
        }
    }

    /// Run evaluation cycles on the configured cadence until the backlog is
    /// drained or the budget gate closes.
    pub async fn run_loop(&self) -> Result<(), GreenloopError> {
        let progress = CycleProgress::start("evaluating backlog");
        loop {
            let outcome = self.run_cycle(Utc::now()).await?;
            progress.cycle(&outcome);
            match outcome {
                CycleOutcome::Idle => {
                    progress.finish("backlog drained or blocked; nothing left to start");
                    return Ok(());
                }
                CycleOutcome::Denied(report) => {
                    for warning in &report.warnings {
                        progress.note(warning);
                    }
                    progress.finish("budget gate closed; resume after the window clears");
                    return Ok(());
                }
                _ => {}
            }
            tokio::time::sleep(std::time::Duration::from_secs(
                u64::from(self.config.cadence_minutes) * 60,
            ))
            .await;
        }
    }

    /// One stateless evaluation: admission gate, then either advance the
    /// single active item or open the next backlog entry.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, GreenloopError> {
        let report = self.governor(now).await?;
        if !report.can_proceed {
            return Ok(CycleOutcome::Denied(report));
        }

        let snapshots = self.hub.list_open_items(MARKER_LABEL).await?;
        let mut open = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            open.push(WorkItem::parse(snapshot, self.config.timeout_minutes)?);
        }

        if let Some(position) = open.iter().position(|item| item.state.is_active()) {
            let mut item = open.swap_remove(position);
            return self.evaluate(&mut item, now).await;
        }

        match select_next(&self.backlog, &open) {
            Some(entry) => self.open_item(entry, now).await,
            None => Ok(CycleOutcome::Idle),
        }
    }

    /// Assemble the data behind the `status` subcommand.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<StatusReport, GreenloopError> {
        let snapshots = self.hub.list_open_items(MARKER_LABEL).await?;
        let mut items = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            items.push(WorkItem::parse(snapshot, self.config.timeout_minutes)?);
        }

        let records = self.window_records(now).await?;
        let cost = CostGovernor::evaluate(&records, now, &self.config.cost_limits());
        let phantom_runs =
            staleness::phantoms(&records, now, self.config.staleness_minutes).count();

        let blocked_groups: BTreeSet<&str> = items
            .iter()
            .filter(|item| item.state == ItemState::ManualIntervention)
            .map(|item| item.blocked_group())
            .collect();
        let open_ids: BTreeSet<&str> = items.iter().map(|item| item.spec_id.as_str()).collect();

        let mut backlog_startable = 0;
        let mut backlog_blocked = 0;
        for entry in self.backlog.entries() {
            if open_ids.contains(entry.id.as_str()) {
                continue;
            }
            if blocked_groups.contains(blocked_group_of(&entry.id)) {
                backlog_blocked += 1;
            } else {
                backlog_startable += 1;
            }
        }

        Ok(StatusReport {
            items,
            cost,
            daily_limit_usd: self.config.daily_limit_usd,
            weekly_limit_usd: self.config.weekly_limit_usd,
            phantom_runs,
            backlog_total: self.backlog.len(),
            backlog_startable,
            backlog_blocked,
        })
    }

    /// Evaluate the cost governor over the trailing record window. Called
    /// once per cycle for admission and again before every agent trigger.
    async fn governor(&self, now: DateTime<Utc>) -> Result<CostReport, GreenloopError> {
        let records = self.window_records(now).await?;
        Ok(CostGovernor::evaluate(
            &records,
            now,
            &self.config.cost_limits(),
        ))
    }

    async fn window_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, GreenloopError> {
        let since = now - Duration::days(7);
        let mut records = self
            .hub
            .list_execution_records(RecordKind::Verification, since)
            .await?;
        records.extend(
            self.hub
                .list_execution_records(RecordKind::Agent, since)
                .await?,
        );
        Ok(records)
    }

    /// Create the tracked item for the selected entry and verify it once.
    async fn open_item(
        &self,
        entry: &SpecEntry,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, GreenloopError> {
        let mut item = WorkItem::new(
            0,
            &entry.id,
            self.config.max_attempts,
            self.config.timeout_minutes,
        );

        self.hub.create_branch(&item.branch_ref).await?;
        self.ensure_checkout(&item.branch_ref)?;

        let body = format!(
            "Tracking scenario `{id}`: {title}\n\n\
             Given: {given}\nWhen: {when}\nThen: {then}\n\n\
             Managed by greenloop; the title and labels of this item are \
             rewritten by the loop on every transition.",
            id = entry.id,
            title = entry.title,
            given = entry.given,
            when = entry.when,
            then = entry.then,
        );
        item.number = self
            .hub
            .create_item(&item.title(), &item.labels(), &body)
            .await?;

        StateMachine::next(&mut item, CycleSignal::VerificationStarted);
        self.apply(&item).await?;
        self.verify(&mut item, now).await
    }

    /// Advance one active item based on its freshly parsed state.
    async fn evaluate(
        &self,
        item: &mut WorkItem,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, GreenloopError> {
        match item.state {
            ItemState::Created => {
                StateMachine::next(item, CycleSignal::VerificationStarted);
                self.apply(item).await?;
                self.verify(item, now).await
            }
            ItemState::Verifying => self.verify(item, now).await,
            ItemState::AwaitingRetry => {
                let kind = item.last_failure.unwrap_or(FailureKind::UnknownError);
                if kind.policy().triggers_agent {
                    self.trigger_implement(item, None, now).await
                } else {
                    StateMachine::next(item, CycleSignal::RetryDue);
                    self.apply(item).await?;
                    self.verify(item, now).await
                }
            }
            ItemState::AgentRunning => self.check_agent(item, now).await,
            // Parked and terminal states never reach here; they are not
            // active and do not hold the processing slot.
            state => Ok(CycleOutcome::Progressed {
                number: item.number,
                state,
            }),
        }
    }

    /// Sync the branch, run the checks, classify, transition.
    async fn verify(
        &self,
        item: &mut WorkItem,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, GreenloopError> {
        let sync = self.probe_sync(item)?;
        let sync_trouble = sync.has_conflicts()
            || (sync.merge_attempted && !sync.merge_clean)
            || (sync.behind_base && !sync.merge_attempted);
        if sync_trouble {
            let kind = classify(None, None, &sync);
            let conflicts = sync.conflicts.clone();
            let detail = sync.error.clone();
            return self
                .fail(item, kind, detail.as_deref(), &conflicts, now)
                .await;
        }

        let check = match self.checks.run_checks(item).await {
            Ok(check) => check,
            Err(VerifyError::Timeout { minutes }) => {
                let detail = format!("verification timed out after {minutes} minutes");
                return self
                    .fail(item, FailureKind::TransientInfra, Some(&detail), &[], now)
                    .await;
            }
            Err(err) => return Err(err.into()),
        };

        if check.all_passed() {
            StateMachine::next(item, CycleSignal::VerificationPassed);
            self.apply(item).await?;
            self.hub.merge_branch(item.number).await?;
            self.hub
                .post_comment(
                    item.number,
                    &format!(
                        "All checks green at {token}; merged `{branch}` and closed.",
                        token = item.attempt_token(),
                        branch = item.branch_ref,
                    ),
                )
                .await?;
            self.hub.close_item(item.number).await?;
            return Ok(CycleOutcome::Merged {
                number: item.number,
            });
        }

        let kind = classify(Some(&check), None, &sync);
        self.fail(item, kind, Some(&check.output), &[], now).await
    }

    /// Apply a failure classification and perform the per-state side effect:
    /// trigger the agent, trigger conflict resolution, or park with a
    /// recovery comment.
    async fn fail(
        &self,
        item: &mut WorkItem,
        kind: FailureKind,
        detail: Option<&str>,
        conflicts: &[Conflict],
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, GreenloopError> {
        StateMachine::next(item, CycleSignal::VerificationFailed(kind));
        self.apply(item).await?;

        match item.state {
            ItemState::AwaitingRetry => {
                let effective = item.last_failure.unwrap_or(kind);
                if effective.policy().triggers_agent {
                    self.trigger_implement(item, detail, now).await
                } else {
                    Ok(CycleOutcome::Progressed {
                        number: item.number,
                        state: item.state,
                    })
                }
            }
            ItemState::MergeConflict => self.trigger_resolve(item, conflicts, now).await,
            ItemState::ManualIntervention => {
                self.post_recovery(item, detail, None).await?;
                Ok(CycleOutcome::Parked {
                    number: item.number,
                    kind: item.last_failure.unwrap_or(kind),
                })
            }
            state => Ok(CycleOutcome::Progressed {
                number: item.number,
                state,
            }),
        }
    }

    /// Post the implementation trigger for the current attempt and, if this
    /// caller won the dispatch race, run the agent to completion.
    async fn trigger_implement(
        &self,
        item: &mut WorkItem,
        failure_context: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, GreenloopError> {
        let report = self.governor(now).await?;
        if !report.can_proceed {
            return Ok(CycleOutcome::Denied(report));
        }

        let entry = self
            .backlog
            .find(&item.spec_id)
            .ok_or_else(|| GreenloopError::MissingSpec(item.spec_id.clone()))?;
        let escalation = escalation_for(item.attempt);
        let prompt = implement_prompt(entry, item, &escalation, failure_context);
        let body = format!(
            "{}\ndispatch {}",
            trigger_body(IMPLEMENT_MARKER, &prompt),
            Uuid::new_v4()
        );

        match maybe_trigger(
            &self.hub,
            item,
            IMPLEMENT_MARKER,
            &body,
            now,
            self.config.staleness_minutes,
        )
        .await?
        {
            TriggerOutcome::Triggered => {
                StateMachine::next(item, CycleSignal::AgentTriggered);
                self.apply(item).await?;
                self.run_agent(item, escalation.tier.model_id(), prompt)
                    .await
            }
            TriggerOutcome::AlreadyRunning => Ok(CycleOutcome::Waiting {
                number: item.number,
            }),
            // A trigger for this exact attempt is already on the ledger; its
            // poster may have died before relabeling. Adopt it as the
            // in-flight run so the agent-record scan decides the next step
            // instead of this arm repeating every cycle.
            TriggerOutcome::AlreadyPosted => {
                StateMachine::next(item, CycleSignal::AgentTriggered);
                self.apply(item).await?;
                Ok(CycleOutcome::Waiting {
                    number: item.number,
                })
            }
            TriggerOutcome::Superseded => Ok(CycleOutcome::Progressed {
                number: item.number,
                state: item.state,
            }),
        }
    }

    /// Post the conflict-resolution trigger and run the agent if it lands.
    async fn trigger_resolve(
        &self,
        item: &mut WorkItem,
        conflicts: &[Conflict],
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, GreenloopError> {
        let report = self.governor(now).await?;
        if !report.can_proceed {
            return Ok(CycleOutcome::Denied(report));
        }

        let prompt = resolve_conflict_prompt(item, &self.config.base_branch, conflicts);
        let body = format!(
            "{}\ndispatch {}",
            trigger_body(RESOLVE_MARKER, &prompt),
            Uuid::new_v4()
        );

        match maybe_trigger(
            &self.hub,
            item,
            RESOLVE_MARKER,
            &body,
            now,
            self.config.staleness_minutes,
        )
        .await?
        {
            TriggerOutcome::Triggered => {
                StateMachine::next(item, CycleSignal::AgentTriggered);
                self.apply(item).await?;
                let tier = escalation_for(item.attempt).tier;
                self.run_agent(item, tier.model_id(), prompt).await
            }
            TriggerOutcome::AlreadyRunning => Ok(CycleOutcome::Waiting {
                number: item.number,
            }),
            // Same adoption as the implementation trigger: an orphaned
            // resolution request must not strand the item in MERGE_CONFLICT
            // with its one resolution attempt lost.
            TriggerOutcome::AlreadyPosted => {
                StateMachine::next(item, CycleSignal::AgentTriggered);
                self.apply(item).await?;
                Ok(CycleOutcome::Waiting {
                    number: item.number,
                })
            }
            TriggerOutcome::Superseded => Ok(CycleOutcome::Progressed {
                number: item.number,
                state: item.state,
            }),
        }
    }

    /// Invoke the agent and fold its terminal result back into the item.
    /// This is the long suspension point; a concurrent evaluator observing
    /// the item meanwhile sees AGENT_RUNNING plus a live execution record.
    async fn run_agent(
        &self,
        item: &mut WorkItem,
        model: &str,
        prompt: String,
    ) -> Result<CycleOutcome, GreenloopError> {
        let request = AgentRequest {
            model: model.to_string(),
            prompt,
            max_budget_usd: self.config.invocation_budget_usd,
            timeout_minutes: item.timeout_minutes,
        };
        let invoked = self.agent.invoke(&request).await;

        StateMachine::next(item, CycleSignal::AgentFinished);
        self.apply(item).await?;

        let (kind, detail, exec) = match invoked {
            Ok(result) if result.is_error => {
                let kind = classify(None, Some(&result), &SyncStatus::up_to_date());
                (kind, result.errors.join("\n"), Some(result))
            }
            Ok(_) => {
                // The fix landed on the branch; the next cycle verifies it.
                return Ok(CycleOutcome::Progressed {
                    number: item.number,
                    state: item.state,
                });
            }
            Err(err) => {
                let text = err.to_string();
                (classify_error_text(&text), text, None)
            }
        };

        StateMachine::next(item, CycleSignal::VerificationFailed(kind));
        self.apply(item).await?;
        if item.state == ItemState::ManualIntervention {
            self.post_recovery(item, Some(&detail), exec.as_ref()).await?;
            return Ok(CycleOutcome::Parked {
                number: item.number,
                kind: item.last_failure.unwrap_or(kind),
            });
        }
        Ok(CycleOutcome::Progressed {
            number: item.number,
            state: item.state,
        })
    }

    /// Decide what an AGENT_RUNNING item should do: keep waiting behind a
    /// live execution record, fold a terminal error result in, or move on to
    /// verification when the record is done or has turned phantom.
    async fn check_agent(
        &self,
        item: &mut WorkItem,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, GreenloopError> {
        let since = now - Duration::hours(AGENT_LOOKBACK_HOURS);
        let records = self
            .hub
            .list_execution_records(RecordKind::Agent, since)
            .await?;
        let mine: Vec<_> = records
            .into_iter()
            .filter(|record| record.branch.as_deref() == Some(item.branch_ref.as_str()))
            .collect();

        if mine
            .iter()
            .any(|record| staleness::is_active(record, now, self.config.staleness_minutes))
        {
            return Ok(CycleOutcome::Waiting {
                number: item.number,
            });
        }

        StateMachine::next(item, CycleSignal::AgentFinished);
        self.apply(item).await?;

        let last_error = mine
            .iter()
            .filter(|record| record.status.is_terminal())
            .max_by_key(|record| record.updated_at)
            .filter(|record| record.is_error);
        if let Some(record) = last_error {
            let exec = ExecutionResult {
                subtype: record.result_subtype.clone(),
                is_error: true,
                cost_usd: record.cost_usd,
                turns: 0,
                errors: vec![record.log_tail.clone()],
            };
            let kind = classify(None, Some(&exec), &SyncStatus::up_to_date());
            return self
                .fail(item, kind, Some(&record.log_tail), &[], now)
                .await;
        }

        self.verify(item, now).await
    }

    /// Rewrite the item's externalized state as a full overwrite.
    async fn apply(&self, item: &WorkItem) -> Result<(), GreenloopError> {
        self.hub.set_title(item.number, &item.title()).await?;
        self.hub.set_labels(item.number, &item.labels()).await?;
        Ok(())
    }

    /// The comment a parked item carries: classification, error excerpt,
    /// cost and turns when known, and the fixed recovery procedure.
    async fn post_recovery(
        &self,
        item: &WorkItem,
        detail: Option<&str>,
        exec: Option<&ExecutionResult>,
    ) -> Result<(), GreenloopError> {
        let kind = item.last_failure.unwrap_or(FailureKind::UnknownError);
        let mut body = format!(
            "## Manual intervention required\n\n\
             Scenario `{id}` stopped at {token}: {kind}.\n",
            id = item.spec_id,
            token = item.attempt_token(),
        );
        if let Some(detail) = detail {
            body.push_str(&format!(
                "\n```\n{}\n```\n",
                tail(detail, RECOVERY_EXCERPT_CHARS)
            ));
        }
        if let Some(exec) = exec {
            if let Some(cost) = exec.cost_usd {
                body.push_str(&format!(
                    "\nLast agent run cost ${cost:.2} ({} turns).\n",
                    exec.turns
                ));
            }
        }
        body.push_str(&format!(
            "\nRecovery: fix the underlying problem, then relabel this item \
             `loop:awaiting-retry` (keeping `greenloop`) to resume, or close it \
             to abandon the scenario. While it stays open, sibling scenarios in \
             group `{}` are not selected.",
            item.blocked_group()
        ));
        self.hub.post_comment(item.number, &body).await?;
        Ok(())
    }

    /// Checkout the item's branch and probe the sync state against base.
    /// Without a local checkout every branch is treated as up to date.
    fn probe_sync(&self, item: &WorkItem) -> Result<SyncStatus, GreenloopError> {
        let Some(git) = &self.git else {
            return Ok(SyncStatus::up_to_date());
        };
        self.ensure_checkout(&item.branch_ref)?;
        if self.config.auto_sync {
            // A failing merge step is a signal for the classifier, not a
            // reason to abort the whole cycle.
            Ok(git
                .sync_with_base(&self.config.base_branch)
                .unwrap_or_else(|err| SyncStatus::failed(err.to_string())))
        } else if git
            .is_behind(&self.config.base_branch)
            .map_err(|err| GreenloopError::Git(err.to_string()))?
        {
            Ok(SyncStatus::behind())
        } else {
            Ok(SyncStatus::up_to_date())
        }
    }

    /// Checkout `branch`, creating it from the base branch when missing.
    fn ensure_checkout(&self, branch: &str) -> Result<(), GreenloopError> {
        let Some(git) = &self.git else {
            return Ok(());
        };
        if git.checkout_branch(branch).is_ok() {
            return Ok(());
        }
        git.checkout_branch(&self.config.base_branch)
            .and_then(|()| git.create_branch(branch))
            .map_err(|err| GreenloopError::Git(err.to_string()))
    }
}
