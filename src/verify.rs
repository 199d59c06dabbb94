use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::state_machine::WorkItem;

/// Outcome of one verification pass. Quality and functional results are kept
/// separate so the classifier can tell a lint-only failure from a real one.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub quality_passed: bool,
    pub functional_passed: bool,
    pub output: String,
}

impl CheckResult {
    pub fn all_passed(&self) -> bool {
        self.quality_passed && self.functional_passed
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to spawn check command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("verification timed out after {minutes} minutes")]
    Timeout { minutes: u32 },
}

/// Runs the verification pipeline for a work item. The pipeline itself is an
/// external collaborator; an `Err` here means the runner broke, not that the
/// item's checks failed.
pub trait ChecksRunner {
    async fn run_checks(&self, item: &WorkItem) -> Result<CheckResult, VerifyError>;
}

/// Shells out to the configured quality and functional commands inside the
/// working tree. The orchestrator has already synced the tree to the item's
/// branch by the time this runs.
pub struct CommandChecksRunner {
    quality_command: String,
    functional_command: String,
    workdir: PathBuf,
}

impl CommandChecksRunner {
    pub fn new(quality_command: &str, functional_command: &str, workdir: PathBuf) -> Self {
        Self {
            quality_command: quality_command.to_string(),
            functional_command: functional_command.to_string(),
            workdir,
        }
    }

    async fn run_command(&self, command: &str, timeout_minutes: u32) -> Result<(bool, String), VerifyError> {
        // kill_on_drop so a timed-out check cannot keep running in the
        // working tree and race the next verification pass.
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .output();

        let timeout = Duration::from_secs(u64::from(timeout_minutes) * 60);
        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| VerifyError::Timeout {
                minutes: timeout_minutes,
            })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), tail(&text, 4000)))
    }
}

impl ChecksRunner for CommandChecksRunner {
    async fn run_checks(&self, item: &WorkItem) -> Result<CheckResult, VerifyError> {
        let (quality_passed, quality_out) = self
            .run_command(&self.quality_command, item.timeout_minutes)
            .await?;
        let (functional_passed, functional_out) = self
            .run_command(&self.functional_command, item.timeout_minutes)
            .await?;

        let mut output = String::new();
        if !quality_passed {
            output.push_str("quality checks failed:\n");
            output.push_str(&quality_out);
            output.push('\n');
        }
        if !functional_passed {
            output.push_str("functional checks failed:\n");
            output.push_str(&functional_out);
        }
        if output.is_empty() {
            output = "all checks passed".to_string();
        }

        Ok(CheckResult {
            quality_passed,
            functional_passed,
            output,
        })
    }
}

/// Last `max` bytes of `text`, aligned to a char boundary.
pub fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
