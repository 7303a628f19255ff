use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::executor::FailurePolicy;

const CONFIG_FILE: &str = "config/parsers";
const ENV_PREFIX: &str = "PARSERS";

/// Upper bound on per-run concurrency, whatever the operator asks for.
pub const MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub url: String,
    pub registry: PathBuf,
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub request_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub run_timeout_secs: u64,
    pub progress: bool,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("url", "http://localhost:8000")?
        .set_default("registry", "parsers/parsers-keys.json")?
        .set_default("concurrency", 5_i64)?
        .set_default("failure_policy", "abort")?
        .set_default("request_timeout_secs", 30_i64)?
        .set_default("extract_timeout_secs", 20_i64)?
        .set_default("run_timeout_secs", 600_i64)?
        .set_default("progress", true)
}

impl Settings {
    /// Defaults, then `config/parsers.toml` if present, then `PARSERS_*` env vars.
    pub fn load() -> Result<Self, ConfigError> {
        defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Caps a requested concurrency at [`MAX_CONCURRENCY`]. Zero is passed through
/// and rejected later as a configuration error.
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.min(MAX_CONCURRENCY)
}
