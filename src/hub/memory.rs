//! In-memory hub used by dispatcher and orchestrator tests.
//!
//! Label and title writes replace, comments append, matching the real hub's
//! overwrite semantics. Each call mutates under a single lock.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::error::HubError;
use super::types::{Comment, ExecutionRecord, IssueSnapshot, RecordKind};
use super::IssueHub;

#[derive(Debug, Default)]
struct MemoryItem {
    title: String,
    labels: Vec<String>,
    comments: Vec<Comment>,
    open: bool,
    merged: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<u64, MemoryItem>,
    records: Vec<ExecutionRecord>,
    branches: Vec<String>,
    next_number: u64,
    next_comment_id: u64,
}

#[derive(Debug, Default)]
pub struct MemoryHub {
    state: Mutex<MemoryState>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an open item directly, returning its number.
    pub fn seed_item(&self, title: &str, labels: &[&str]) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_number += 1;
        let number = state.next_number;
        state.items.insert(
            number,
            MemoryItem {
                title: title.to_string(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
                comments: Vec::new(),
                open: true,
                merged: false,
            },
        );
        number
    }

    pub fn push_record(&self, record: ExecutionRecord) {
        self.state.lock().unwrap().records.push(record);
    }

    pub fn comments_of(&self, number: u64) -> Vec<Comment> {
        self.state.lock().unwrap().items[&number].comments.clone()
    }

    pub fn labels_of(&self, number: u64) -> Vec<String> {
        self.state.lock().unwrap().items[&number].labels.clone()
    }

    pub fn title_of(&self, number: u64) -> String {
        self.state.lock().unwrap().items[&number].title.clone()
    }

    pub fn is_open(&self, number: u64) -> bool {
        self.state.lock().unwrap().items[&number].open
    }

    pub fn is_merged(&self, number: u64) -> bool {
        self.state.lock().unwrap().items[&number].merged
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.clone()
    }
}

impl IssueHub for MemoryHub {
    async fn list_open_items(&self, label: &str) -> Result<Vec<IssueSnapshot>, HubError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .filter(|(_, item)| item.open && item.labels.iter().any(|l| l == label))
            .map(|(number, item)| IssueSnapshot {
                number: *number,
                title: item.title.clone(),
                labels: item.labels.clone(),
            })
            .collect())
    }

    async fn get_item(&self, number: u64) -> Result<IssueSnapshot, HubError> {
        let state = self.state.lock().unwrap();
        let item = state.items.get(&number).ok_or(HubError::NotFound(number))?;
        Ok(IssueSnapshot {
            number,
            title: item.title.clone(),
            labels: item.labels.clone(),
        })
    }

    async fn create_item(
        &self,
        title: &str,
        labels: &[String],
        body: &str,
    ) -> Result<u64, HubError> {
        let mut state = self.state.lock().unwrap();
        state.next_number += 1;
        state.next_comment_id += 1;
        let number = state.next_number;
        let comment_id = state.next_comment_id;
        state.items.insert(
            number,
            MemoryItem {
                title: title.to_string(),
                labels: labels.to_vec(),
                comments: vec![Comment {
                    id: comment_id,
                    body: body.to_string(),
                    created_at: Utc::now(),
                }],
                open: true,
                merged: false,
            },
        );
        Ok(number)
    }

    async fn set_labels(&self, number: u64, labels: &[String]) -> Result<(), HubError> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .get_mut(&number)
            .ok_or(HubError::NotFound(number))?;
        item.labels = labels.to_vec();
        Ok(())
    }

    async fn set_title(&self, number: u64, title: &str) -> Result<(), HubError> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .get_mut(&number)
            .ok_or(HubError::NotFound(number))?;
        item.title = title.to_string();
        Ok(())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), HubError> {
        let mut state = self.state.lock().unwrap();
        state.next_comment_id += 1;
        let id = state.next_comment_id;
        let item = state
            .items
            .get_mut(&number)
            .ok_or(HubError::NotFound(number))?;
        item.comments.push(Comment {
            id,
            body: body.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, HubError> {
        let state = self.state.lock().unwrap();
        let item = state.items.get(&number).ok_or(HubError::NotFound(number))?;
        Ok(item.comments.clone())
    }

    async fn list_execution_records(
        &self,
        kind: RecordKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, HubError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .iter()
            .filter(|r| r.kind == kind && r.started_at >= since)
            .cloned()
            .collect())
    }

    async fn create_branch(&self, name: &str) -> Result<(), HubError> {
        self.state.lock().unwrap().branches.push(name.to_string());
        Ok(())
    }

    async fn merge_branch(&self, number: u64) -> Result<(), HubError> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .get_mut(&number)
            .ok_or(HubError::NotFound(number))?;
        item.merged = true;
        Ok(())
    }

    async fn close_item(&self, number: u64) -> Result<(), HubError> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .get_mut(&number)
            .ok_or(HubError::NotFound(number))?;
        item.open = false;
        Ok(())
    }
}
