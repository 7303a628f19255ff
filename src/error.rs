use std::time::Duration;

use thiserror::Error;

/// Problems detected before any network call is made.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown parser `{0}`")]
    UnknownParser(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load parser registry {path}: {reason}")]
    RegistryLoad { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("selection request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("selection returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed selection response: {0}")]
    Malformed(String),
}

/// Failure of one extraction invocation, always reported against its snippet.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("{0}")]
    Failed(String),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("commit request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("commit returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Fatal errors: the run produced no report.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("run exceeded its deadline of {0:?}")]
    Deadline(Duration),
}
