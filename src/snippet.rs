use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

static DATE_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Keys every snippet carries; anything else is parser output or collector metadata.
const ENVELOPE_KEYS: &[&str] = &[
    "_id",
    "savingTime",
    "id",
    "userId",
    "impressionId",
    "timelineId",
    "html",
];

/// One captured HTML fragment, as returned by the snippet service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub id: String,
    #[serde(default)]
    pub html: String,
    #[serde(
        rename = "savingTime",
        default,
        deserialize_with = "deserialize_lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub saving_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snippet {
    pub fn new(id: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            html: html.into(),
            saving_time: None,
            extra: Map::new(),
        }
    }

    /// Non-envelope keys, i.e. the fields earlier parsers have already written.
    pub fn extra_keys(&self) -> Vec<&str> {
        self.extra
            .keys()
            .map(String::as_str)
            .filter(|k| !ENVELOPE_KEYS.contains(k))
            .collect()
    }
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if DATE_ONLY_RE.is_match(raw) {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// clap value parser for `--since` / `--until`.
pub fn parse_cli_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(raw).ok_or_else(|| format!("not an ISO date or timestamp: {}", raw))
}

pub fn deserialize_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{}`", s))),
    }
}

/// Like [`deserialize_opt_timestamp`] but never fails: `savingTime` is only
/// used for logging, so shapes other than a timestamp string or a
/// `{"$date": ...}` wrapper become `None`.
pub fn deserialize_lenient_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    let parsed = match raw {
        Some(Value::String(s)) => parse_timestamp(&s),
        Some(Value::Object(m)) => m.get("$date").and_then(Value::as_str).and_then(parse_timestamp),
        _ => None,
    };
    Ok(parsed)
}

/// Millisecond ISO 8601 with a `Z` suffix, the format the snippet service expects.
pub fn serialize_iso<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Human-readable age relative to `now`, e.g. "2h 5m ago".
pub fn humanize_age(saved: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(saved);
    let (secs, suffix) = if delta.num_seconds() >= 0 {
        (delta.num_seconds(), "ago")
    } else {
        (-delta.num_seconds(), "ahead")
    };
    let body = if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    };
    format!("{} {}", body, suffix)
}
