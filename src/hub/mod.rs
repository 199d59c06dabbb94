//! The issue hub: the external document store holding all orchestration
//! state as labels, titles, and comments on tracked items.
//!
//! The hub offers no transactions and no ordering guarantees; every consumer
//! re-reads fresh snapshots and recomputes full target state before writing.

pub mod client;
pub mod error;
pub mod types;

#[cfg(test)]
pub mod memory;

use chrono::{DateTime, Utc};

pub use client::HubClient;
pub use error::HubError;
pub use types::{Comment, ExecutionRecord, IssueSnapshot, RecordKind, RecordStatus};

/// Abstract interface to the hub.
///
/// Implemented by [`HubClient`] for the real REST endpoints and by the
/// in-memory hub in tests. Writes are full overwrites of the target field
/// (label set, title), never deltas, so a lost update is healed by the next
/// evaluator recomputing the same target state.
pub trait IssueHub {
    /// List open tracked items carrying the given marker label.
    async fn list_open_items(&self, label: &str) -> Result<Vec<IssueSnapshot>, HubError>;

    /// Fresh snapshot of one item.
    async fn get_item(&self, number: u64) -> Result<IssueSnapshot, HubError>;

    /// Create a tracked item, returning its number.
    async fn create_item(
        &self,
        title: &str,
        labels: &[String],
        body: &str,
    ) -> Result<u64, HubError>;

    /// Replace the item's entire label set.
    async fn set_labels(&self, number: u64, labels: &[String]) -> Result<(), HubError>;

    /// Replace the item's title.
    async fn set_title(&self, number: u64, title: &str) -> Result<(), HubError>;

    /// Append a comment to the item's transcript.
    async fn post_comment(&self, number: u64, body: &str) -> Result<(), HubError>;

    /// All comments on the item, oldest first.
    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, HubError>;

    /// Execution records of the given kind started at or after `since`.
    async fn list_execution_records(
        &self,
        kind: RecordKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, HubError>;

    /// Create a work branch off the default branch.
    async fn create_branch(&self, name: &str) -> Result<(), HubError>;

    /// Merge the item's work branch into the default branch.
    async fn merge_branch(&self, number: u64) -> Result<(), HubError>;

    /// Close the item (terminal states only).
    async fn close_item(&self, number: u64) -> Result<(), HubError>;
}
