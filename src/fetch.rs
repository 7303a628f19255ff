use std::time::Instant;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::api::SnippetApi;
use crate::error::FetchError;
use crate::selection::SelectionFilter;
use crate::snippet::Snippet;

/// Bodies shorter than this (in characters) with HTTP 200 mean "no snippets".
const NEAR_EMPTY_BODY: usize = 3;

/// Snippet selection boundary.
#[async_trait]
pub trait SnippetSource: Send + Sync {
    async fn select(&self, filter: &SelectionFilter) -> Result<Vec<Snippet>, FetchError>;
}

/// Decodes a selection response. The service answers an empty match with a
/// near-empty 200 body instead of `[]`, so that body is never JSON-parsed.
pub fn decode_selection(status: StatusCode, body: &str) -> Result<Vec<Snippet>, FetchError> {
    if status == StatusCode::OK && body.chars().count() < NEAR_EMPTY_BODY {
        debug!("This query returned zero snippets");
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        });
    }
    serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))
}

#[async_trait]
impl SnippetSource for SnippetApi {
    async fn select(&self, filter: &SelectionFilter) -> Result<Vec<Snippet>, FetchError> {
        let url = self.endpoint("content");
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.clone(),
            message: e.to_string(),
        };

        let begin = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(filter)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        let snippets = decode_selection(status, &body)?;

        debug!(
            "Selection for {} completed in {:.2}s ({} snippets)",
            filter.parser_name,
            begin.elapsed().as_secs_f64(),
            snippets.len()
        );
        Ok(snippets)
    }
}
