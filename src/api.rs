use std::time::Duration;

/// HTTP client for the snippet service. Every request inherits `request_timeout`.
pub struct SnippetApi {
    pub(crate) client: reqwest::Client,
    base_url: String,
}

impl SnippetApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("snippet-parsers/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `<base>/api/v1/snippet/<what>`
    pub fn endpoint(&self, what: &str) -> String {
        format!("{}/api/v1/snippet/{}", self.base_url, what)
    }
}
