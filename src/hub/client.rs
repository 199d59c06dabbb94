use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::HubError;
use super::types::{Comment, ExecutionRecord, IssueSnapshot, RecordKind};
use super::IssueHub;

pub struct HubClient {
    token: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateItemBody<'a> {
    title: &'a str,
    labels: &'a [String],
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct LabelsBody<'a> {
    labels: &'a [String],
}

#[derive(Debug, Serialize)]
struct TitleBody<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct BranchBody<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedItem {
    number: u64,
}

impl HubClient {
    /// Create a client for the hub at `base_url`. Tests point this at a
    /// local mock server.
    pub fn new(token: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            token,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("authorization", format!("Bearer {}", self.token))
            .header("content-type", "application/json")
    }

    /// Map a non-success response into [`HubError`], consuming the body.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, HubError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(HubError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(HubError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

impl IssueHub for HubClient {
    async fn list_open_items(&self, label: &str) -> Result<Vec<IssueSnapshot>, HubError> {
        let response = self
            .authorized(self.client.get(self.url("/items")))
            .query(&[("state", "open"), ("label", label)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_item(&self, number: u64) -> Result<IssueSnapshot, HubError> {
        let response = self
            .authorized(self.client.get(self.url(&format!("/items/{number}"))))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HubError::NotFound(number));
        }
        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_item(
        &self,
        title: &str,
        labels: &[String],
        body: &str,
    ) -> Result<u64, HubError> {
        let response = self
            .authorized(self.client.post(self.url("/items")))
            .json(&CreateItemBody {
                title,
                labels,
                body,
            })
            .send()
            .await?;
        let created: CreatedItem = Self::check(response).await?.json().await?;
        Ok(created.number)
    }

    async fn set_labels(&self, number: u64, labels: &[String]) -> Result<(), HubError> {
        let response = self
            .authorized(
                self.client
                    .put(self.url(&format!("/items/{number}/labels"))),
            )
            .json(&LabelsBody { labels })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn set_title(&self, number: u64, title: &str) -> Result<(), HubError> {
        let response = self
            .authorized(self.client.patch(self.url(&format!("/items/{number}"))))
            .json(&TitleBody { title })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), HubError> {
        let response = self
            .authorized(
                self.client
                    .post(self.url(&format!("/items/{number}/comments"))),
            )
            .json(&CommentBody { body })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, HubError> {
        let response = self
            .authorized(
                self.client
                    .get(self.url(&format!("/items/{number}/comments"))),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn list_execution_records(
        &self,
        kind: RecordKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>, HubError> {
        let kind_param = match kind {
            RecordKind::Verification => "verification",
            RecordKind::Agent => "agent",
        };
        let response = self
            .authorized(self.client.get(self.url("/runs")))
            .query(&[("kind", kind_param), ("since", &since.to_rfc3339())])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_branch(&self, name: &str) -> Result<(), HubError> {
        let response = self
            .authorized(self.client.post(self.url("/branches")))
            .json(&BranchBody { name })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn merge_branch(&self, number: u64) -> Result<(), HubError> {
        let response = self
            .authorized(self.client.post(self.url(&format!("/items/{number}/merge"))))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn close_item(&self, number: u64) -> Result<(), HubError> {
        let response = self
            .authorized(self.client.post(self.url(&format!("/items/{number}/close"))))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
