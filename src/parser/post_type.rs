use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::{require_html, Extraction, Extractor, Metadata, Tally};
use crate::error::ExtractionError;
use crate::snippet::Snippet;

pub const NAME: &str = "postType";

static TIMESTAMP: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".timestampContent").expect("static selector"));
static ADS_ABOUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[href="/ads/about"]"#).expect("static selector"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("static selector"));

/// Localized "Sponsored" labels as rendered on promoted posts.
const SPONSORED_LABELS: &[(&str, &str)] = &[
    ("cs", "Sponzorováno"),
    ("da", "Sponsoreret"),
    ("de", "Gesponsert"),
    ("en", "Sponsored"),
    ("es", "Publicidad"),
    ("fr", "Sponsorisé"),
    ("hu", "Hirdetés"),
    ("it", "Sponsorizzata"),
    ("ja", "広告"),
    ("nb", "Sponset"),
    ("nl", "Gesponsord"),
    ("nn", "Sponsa"),
    ("pl", "Sponsorowane"),
    ("pt", "Patrocinado"),
    ("ru", "Реклама"),
    ("sk", "Sponzorované"),
    ("sr", "Спонзорисано"),
    ("sv", "Sponsrad"),
    ("tr", "Sponsorlu"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostKind {
    Feed,
    Promoted { language: Option<&'static str> },
}

/// Tells organic feed posts from promoted ones.
pub struct PostType;

#[async_trait]
impl Extractor for PostType {
    async fn extract(&self, snippet: &Snippet) -> Result<Extraction, ExtractionError> {
        let html = require_html(snippet)?;
        let mut tally = Tally::default();
        let mut metadata = Metadata::new();

        match classify(html) {
            Some(PostKind::Feed) => {
                tally.bump("feed");
                metadata.insert("type".into(), Value::from("feed"));
                metadata.insert(NAME.into(), Value::Bool(true));
            }
            Some(PostKind::Promoted { language }) => {
                tally.bump("promoted");
                metadata.insert("type".into(), Value::from("promoted"));
                metadata.insert(NAME.into(), Value::Bool(true));
                if let Some(lang) = language {
                    metadata.insert("sponsoredLanguage".into(), Value::from(lang));
                }
            }
            None => {
                tally.bump("error");
                metadata.insert(NAME.into(), Value::Bool(false));
            }
        }

        debug!("{} {:?}", snippet.id, metadata.get("type"));
        Ok(Extraction { metadata, tally })
    }
}

pub fn classify(html: &str) -> Option<PostKind> {
    let doc = Html::parse_fragment(html);
    if doc.select(&TIMESTAMP).next().is_some() {
        return Some(PostKind::Feed);
    }
    let language = sponsored_language(&doc);
    if language.is_some() || doc.select(&ADS_ABOUT).next().is_some() {
        return Some(PostKind::Promoted { language });
    }
    None
}

/// Language of the first single-child anchor whose text is a "Sponsored" label.
fn sponsored_language(doc: &Html) -> Option<&'static str> {
    doc.select(&ANCHOR)
        .filter(|a| a.children().count() == 1)
        .find_map(|a| {
            let text: String = a.text().collect();
            let text = text.trim();
            SPONSORED_LABELS
                .iter()
                .find(|(_, label)| *label == text)
                .map(|(lang, _)| *lang)
        })
}
