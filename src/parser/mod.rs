pub mod post_type;
pub mod promoted_link;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ExtractionError;
use crate::snippet::Snippet;

/// Fields extracted from one snippet.
pub type Metadata = serde_json::Map<String, Value>;

/// Named counters produced by one extraction; the executor merges them per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally(BTreeMap<String, u64>);

impl Tally {
    pub fn bump(&mut self, counter: &str) {
        *self.0.entry(counter.to_string()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &Tally) {
        for (k, v) in &other.0 {
            *self.0.entry(k.clone()).or_insert(0) += v;
        }
    }

    pub fn get(&self, counter: &str) -> u64 {
        self.0.get(counter).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(" "))
    }
}

pub struct Extraction {
    pub metadata: Metadata,
    pub tally: Tally,
}

/// A metadata extraction routine.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, snippet: &Snippet) -> Result<Extraction, ExtractionError>;
}

/// A built-in routine and its base configuration.
pub struct ParserEntry {
    pub name: &'static str,
    pub about: &'static str,
    /// Requirements applied on top of the completion predicate.
    pub requirements: Value,
    pub extractor: Arc<dyn Extractor>,
}

pub fn catalog() -> Vec<ParserEntry> {
    vec![
        ParserEntry {
            name: promoted_link::NAME,
            about: "Target link of promoted posts",
            requirements: json!({ "type": "promoted" }),
            extractor: Arc::new(promoted_link::PromotedLink),
        },
        ParserEntry {
            name: post_type::NAME,
            about: "Feed vs promoted post classification",
            requirements: json!({}),
            extractor: Arc::new(post_type::PostType),
        },
    ]
}

pub fn lookup(name: &str) -> Option<ParserEntry> {
    catalog().into_iter().find(|p| p.name == name)
}

fn require_html(snippet: &Snippet) -> Result<&str, ExtractionError> {
    if snippet.html.trim().is_empty() {
        return Err(ExtractionError::Failed(format!(
            "snippet {} has no html",
            snippet.id
        )));
    }
    Ok(&snippet.html)
}
