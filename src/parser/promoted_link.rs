use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::{require_html, Extraction, Extractor, Metadata, Tally};
use crate::error::ExtractionError;
use crate::snippet::Snippet;

pub const NAME: &str = "promotedLink";

static WRAPPER_CLEARFIX: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.userContentWrapper div.clearfix").expect("static selector")
});
static PROFILE_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.profileLink").expect("static selector"));
static USER_CONTENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.userContent").expect("static selector"));
static CLEARFIX_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.clearfix a").expect("static selector"));
static FIRST_CHILD_ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a:first-child").expect("static selector"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// Link shared next to the advertiser's profile link.
    Link,
    /// Video or post attached below the post body.
    Video,
    /// The advertiser's page itself.
    Page,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Link => "link",
            LinkType::Video => "video",
            LinkType::Page => "page",
        }
    }
}

/// Finds the link a promoted post points to.
pub struct PromotedLink;

#[async_trait]
impl Extractor for PromotedLink {
    async fn extract(&self, snippet: &Snippet) -> Result<Extraction, ExtractionError> {
        let html = require_html(snippet)?;
        let mut tally = Tally::default();
        tally.bump("posts");

        let mut metadata = Metadata::new();
        match detect(html) {
            Some((link, link_type)) => {
                debug!("{} {} ({})", snippet.id, link, link_type.as_str());
                metadata.insert("postLink".into(), Value::from(link));
                metadata.insert("linkType".into(), Value::from(link_type.as_str()));
                metadata.insert(NAME.into(), Value::Bool(true));
            }
            None => {
                debug!("{} no promoted link", snippet.id);
                tally.bump("errors");
                metadata.insert(NAME.into(), Value::Bool(false));
            }
        }
        Ok(Extraction { metadata, tally })
    }
}

/// Tries the posted-link, video and page layouts in that order. The first
/// layout that matches decides; an `href="#"` there means no link at all.
pub fn detect(html: &str) -> Option<(String, LinkType)> {
    let doc = Html::parse_fragment(html);

    let (element, link_type) = posted_link(&doc)
        .map(|e| (e, LinkType::Link))
        .or_else(|| video_link(&doc).map(|e| (e, LinkType::Video)))
        .or_else(|| page_link(&doc).map(|e| (e, LinkType::Page)))?;

    match element.value().attr("href") {
        Some(href) if href != "#" && !href.is_empty() => Some((href.to_string(), link_type)),
        _ => None,
    }
}

fn posted_link(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&WRAPPER_CLEARFIX)
        .flat_map(|container| container.select(&PROFILE_LINK))
        .filter_map(|profile| profile.parent().and_then(ElementRef::wrap))
        .filter_map(next_element)
        .find(|e| e.value().attr("href").is_some())
}

fn video_link(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&USER_CONTENT)
        .filter_map(next_element)
        .find_map(|sibling| sibling.select(&CLEARFIX_ANCHOR).next())
}

fn page_link(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&WRAPPER_CLEARFIX)
        .find_map(|container| container.select(&FIRST_CHILD_ANCHOR).next())
}

fn next_element(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.next_siblings().find_map(ElementRef::wrap)
}
