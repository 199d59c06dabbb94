//! Agent invocation: the escalation ladder, prompt assembly, and the HTTP
//! runner that asks the execution substrate to run a fix attempt.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::git::Conflict;
use crate::selector::SpecEntry;
use crate::state_machine::WorkItem;
use crate::verify::tail;

/// Extra headroom on the HTTP timeout so the substrate's own timeout fires
/// first and the record carries its verdict instead of a bare socket error.
const INVOKE_TIMEOUT_MARGIN_SECS: u64 = 300;

const FAILURE_EXCERPT_CHARS: usize = 2_000;

/// Model strength ordered by cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Haiku,
    Sonnet,
    Opus,
}

impl ModelTier {
    pub fn model_id(self) -> &'static str {
        match self {
            ModelTier::Haiku => "claude-haiku-4-5-20251001",
            ModelTier::Sonnet => "claude-sonnet-4-5-20250929",
            ModelTier::Opus => "claude-opus-4-1-20250805",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Haiku => write!(f, "haiku"),
            ModelTier::Sonnet => write!(f, "sonnet"),
            ModelTier::Opus => write!(f, "opus"),
        }
    }
}

/// One rung of the escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub tier: ModelTier,
    pub guidance: &'static str,
}

struct Rung {
    min_attempt: u32,
    escalation: Escalation,
}

/// Strategy table keyed by attempt range, ascending. Lookup takes the last
/// rung whose `min_attempt` the current attempt reaches.
const ESCALATION_LADDER: &[Rung] = &[
    Rung {
        min_attempt: 0,
        escalation: Escalation {
            tier: ModelTier::Haiku,
            guidance: "Implement the scenario exactly as written. Do not touch \
                       unrelated files.",
        },
    },
    Rung {
        min_attempt: 2,
        escalation: Escalation {
            tier: ModelTier::Sonnet,
            guidance: "A previous attempt did not fix this. Read the verification \
                       output below carefully before changing any code, and make the \
                       failing assertions pass without weakening them.",
        },
    },
    Rung {
        min_attempt: 4,
        escalation: Escalation {
            tier: ModelTier::Opus,
            guidance: "Several attempts have failed. Discard the previous approach: \
                       re-read the scenario, inspect the surrounding implementation, \
                       and solve the problem from scratch instead of patching the \
                       last diff.",
        },
    },
];

/// Pick the strategy for the given attempt number.
pub fn escalation_for(attempt: u32) -> Escalation {
    let mut current = ESCALATION_LADDER[0].escalation;
    for rung in ESCALATION_LADDER {
        if attempt >= rung.min_attempt {
            current = rung.escalation;
        }
    }
    current
}

/// Request sent to the execution substrate.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub model: String,
    pub prompt: String,
    pub max_budget_usd: f64,
    pub timeout_minutes: u32,
}

/// Terminal outcome of one agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Substrate-specific result discriminator, e.g. `error_max_budget`.
    #[serde(default)]
    pub subtype: Option<String>,
    pub is_error: bool,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// Erro retornado pelo substrato de execução.
    #[error("agent substrate error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Abstraction over the execution substrate that runs the coding agent.
///
/// `invoke` suspends until the agent reaches a terminal result, which can
/// take from seconds to the better part of an hour. Callers must tolerate
/// being superseded while suspended here.
pub trait AgentRunner {
    async fn invoke(&self, request: &AgentRequest) -> Result<ExecutionResult, AgentError>;
}

/// Cliente HTTP do substrato de execução de agentes.
pub struct HttpAgentRunner {
    token: String,
    client: Client,
    base_url: String,
}

impl HttpAgentRunner {
    pub fn new(token: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            token,
            client,
            base_url,
        }
    }
}

impl AgentRunner for HttpAgentRunner {
    async fn invoke(&self, request: &AgentRequest) -> Result<ExecutionResult, AgentError> {
        let timeout =
            Duration::from_secs(u64::from(request.timeout_minutes) * 60 + INVOKE_TIMEOUT_MARGIN_SECS);
        let response = self
            .client
            .post(format!("{}/invocations", self.base_url))
            .timeout(timeout)
            .header("authorization", format!("Bearer {}", self.token))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AgentError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let result = response.json::<ExecutionResult>().await?;
        Ok(result)
    }
}

/// Build the prompt asking the agent to implement a scenario on the item's
/// work branch.
pub fn implement_prompt(
    entry: &SpecEntry,
    item: &WorkItem,
    escalation: &Escalation,
    failure_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Work on branch `{branch}`.\n\
         \n\
         Scenario {id} ({token}): {title}\n\
         Given: {given}\n\
         When: {when}\n\
         Then: {then}\n\
         \n\
         {guidance}\n",
        branch = item.branch_ref,
        id = entry.id,
        token = item.attempt_token(),
        title = entry.title,
        given = entry.given,
        when = entry.when,
        then = entry.then,
        guidance = escalation.guidance,
    );

    if let Some(output) = failure_context {
        prompt.push_str(&format!(
            "\nVerification output from the last attempt:\n```\n{}\n```\n",
            tail(output, FAILURE_EXCERPT_CHARS)
        ));
    }

    prompt.push_str(
        "\nEnable the scenario's assertions and make them pass. Do not delete or \
         skip assertions, and commit the result to the branch above.\n",
    );
    prompt
}

/// Build the prompt asking the agent to resolve a merge conflict against the
/// base branch.
pub fn resolve_conflict_prompt(item: &WorkItem, base_branch: &str, conflicts: &[Conflict]) -> String {
    let mut listing = String::new();
    for conflict in conflicts {
        listing.push_str(&format!("- `{}` ({})\n", conflict.path, conflict.kind));
    }

    format!(
        "Branch `{branch}` conflicts with `{base}` ({token}).\n\
         \n\
         Conflicting files:\n\
         {listing}\
         \n\
         Merge `{base}` into `{branch}`, resolve every conflict so the scenario \
         {id} still behaves as specified, and commit the merge. Do not resolve by \
         discarding either side wholesale.\n",
        branch = item.branch_ref,
        base = base_branch,
        token = item.attempt_token(),
        listing = listing,
        id = item.spec_id,
    )
}
