use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::api::SnippetApi;
use crate::error::CommitError;
use crate::parser::Metadata;
use crate::snippet::{humanize_age, Snippet};

/// Name and registry key stamped on every commit of a run.
#[derive(Debug, Clone)]
pub struct ParserIdentity {
    pub name: String,
    pub key: String,
}

/// Payload of the result boundary. `fields` lists the metadata keys so the
/// service knows what was extracted even when `metadata` is partial or empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub html_id: String,
    pub parser_key: String,
    pub metadata: Metadata,
    pub fields: Vec<String>,
    pub parser_name: String,
}

impl CommitRecord {
    pub fn build(identity: &ParserIdentity, snippet: &Snippet, metadata: Metadata) -> Self {
        let fields = metadata.keys().cloned().collect();
        Self {
            html_id: snippet.id.clone(),
            parser_key: identity.key.clone(),
            metadata,
            fields,
            parser_name: identity.name.clone(),
        }
    }
}

/// Result commit boundary. Committing is what makes the store flag the snippet.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn commit(&self, record: &CommitRecord) -> Result<(), CommitError>;
}

pub fn log_commit(snippet: &Snippet, record: &CommitRecord) {
    let age = snippet
        .saving_time
        .map(|t| humanize_age(t, Utc::now()))
        .unwrap_or_else(|| "-".into());
    debug!(
        "html [{}] [{}] [{}] +[{}]",
        snippet.id,
        age,
        snippet.extra_keys().join(","),
        record.fields.join(",")
    );
}

#[async_trait]
impl ResultSink for SnippetApi {
    async fn commit(&self, record: &CommitRecord) -> Result<(), CommitError> {
        let url = self.endpoint("result");
        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| CommitError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CommitError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(())
    }
}
