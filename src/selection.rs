use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::ConfigError;
use crate::registry::RuntimeConfig;
use crate::snippet::serialize_iso;

/// Default selection window when no explicit bounds are given.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 1;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Condition on a single snippet field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field not present, serialized as `{"$exists": false}`.
    Absent,
    /// Field equal to the given value.
    Equals(Value),
}

impl Predicate {
    pub fn from_value(value: Value) -> Self {
        match &value {
            Value::Object(m) if m.len() == 1 && m.get("$exists") == Some(&Value::Bool(false)) => {
                Predicate::Absent
            }
            _ => Predicate::Equals(value),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Predicate::Absent => serde_json::json!({ "$exists": false }),
            Predicate::Equals(v) => v.clone(),
        }
    }

    #[cfg(test)]
    pub fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Predicate::Absent => field.is_none(),
            Predicate::Equals(v) => field == Some(v),
        }
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Field → predicate map deciding which snippets are eligible for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Requirements(BTreeMap<String, Predicate>);

impl Requirements {
    /// Requirements must be a JSON object; `null` or scalars are a configuration error.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::InvalidConfig(format!(
                "requirements has to be an object, got `{}`",
                value
            )));
        };
        Ok(Self(
            map.iter()
                .map(|(k, v)| (k.clone(), Predicate::from_value(v.clone())))
                .collect(),
        ))
    }

    /// Single-target selection: `{id: <target>}` and nothing else.
    pub fn target(id: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Predicate::Equals(Value::from(id)));
        Self(map)
    }

    pub fn set(&mut self, field: &str, predicate: Predicate) {
        self.0.insert(field.to_string(), predicate);
    }

    pub fn get(&self, field: &str) -> Option<&Predicate> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn matches(&self, doc: &serde_json::Map<String, Value>) -> bool {
        self.0
            .iter()
            .all(|(field, predicate)| predicate.matches(doc.get(field)))
    }
}

/// Request payload of the snippet selection boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionFilter {
    #[serde(serialize_with = "serialize_iso")]
    pub since: DateTime<Utc>,
    #[serde(serialize_with = "serialize_iso")]
    pub until: DateTime<Utc>,
    pub parser_name: String,
    pub requirements: Requirements,
}

/// Operator overrides for one invocation.
#[derive(Debug, Clone, Default)]
pub struct SelectionOverrides {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub target_id: Option<String>,
}

/// Builds the selection filter. A target id replaces all requirements and falls
/// back to the descriptor window; otherwise each bound falls back to the
/// one-hour window ending now.
pub fn build_filter(
    config: &RuntimeConfig,
    overrides: &SelectionOverrides,
    clock: &dyn Clock,
) -> SelectionFilter {
    let now = clock.now();
    let window_start = now - Duration::hours(DEFAULT_LOOKBACK_HOURS);

    if let Some(target) = &overrides.target_id {
        return SelectionFilter {
            since: overrides.since.or(config.since).unwrap_or(window_start),
            until: overrides.until.or(config.until).unwrap_or(now),
            parser_name: config.name.clone(),
            requirements: Requirements::target(target),
        };
    }

    SelectionFilter {
        since: overrides.since.unwrap_or(window_start),
        until: overrides.until.unwrap_or(now),
        parser_name: config.name.clone(),
        requirements: config.requirements.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 12, 1, 12, 0, 0).unwrap()
    }

    fn config() -> RuntimeConfig {
        let mut requirements = Requirements::from_json(&json!({ "type": "promoted" })).unwrap();
        requirements.set("promotedLink", Predicate::Absent);
        RuntimeConfig {
            name: "promotedLink".into(),
            key: "K1".into(),
            since: Some(Utc.with_ymd_and_hms(2016, 9, 13, 0, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2016, 11, 1, 0, 0, 0).unwrap()),
            requirements,
            repeat: false,
            concurrency: 5,
        }
    }

    #[test]
    fn default_window_is_last_hour() {
        let f = build_filter(&config(), &SelectionOverrides::default(), &FixedClock(now()));
        assert_eq!(f.until, now());
        assert_eq!(f.since, now() - Duration::hours(1));
        assert_eq!(f.parser_name, "promotedLink");
        assert_eq!(f.requirements, config().requirements);
    }

    #[test]
    fn bounds_override_independently() {
        let since = Utc.with_ymd_and_hms(2016, 11, 30, 0, 0, 0).unwrap();
        let overrides = SelectionOverrides {
            since: Some(since),
            ..Default::default()
        };
        let f = build_filter(&config(), &overrides, &FixedClock(now()));
        assert_eq!(f.since, since);
        assert_eq!(f.until, now());

        let until = Utc.with_ymd_and_hms(2016, 12, 1, 11, 0, 0).unwrap();
        let overrides = SelectionOverrides {
            until: Some(until),
            ..Default::default()
        };
        let f = build_filter(&config(), &overrides, &FixedClock(now()));
        assert_eq!(f.since, now() - Duration::hours(1));
        assert_eq!(f.until, until);
    }

    #[test]
    fn target_replaces_requirements_and_uses_descriptor_window() {
        let overrides = SelectionOverrides {
            target_id: Some("abc123".into()),
            ..Default::default()
        };
        let f = build_filter(&config(), &overrides, &FixedClock(now()));
        assert_eq!(f.requirements, Requirements::target("abc123"));
        assert_eq!(f.requirements.len(), 1);
        assert_eq!(f.since, config().since.unwrap());
        assert_eq!(f.until, config().until.unwrap());
    }

    #[test]
    fn target_still_honours_explicit_bounds() {
        let since = Utc.with_ymd_and_hms(2016, 10, 1, 0, 0, 0).unwrap();
        let overrides = SelectionOverrides {
            since: Some(since),
            target_id: Some("abc123".into()),
            ..Default::default()
        };
        let f = build_filter(&config(), &overrides, &FixedClock(now()));
        assert_eq!(f.since, since);
        assert_eq!(f.until, config().until.unwrap());
    }

    #[test]
    fn wire_format() {
        let f = build_filter(&config(), &SelectionOverrides::default(), &FixedClock(now()));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(
            v,
            json!({
                "since": "2016-12-01T11:00:00.000Z",
                "until": "2016-12-01T12:00:00.000Z",
                "parserName": "promotedLink",
                "requirements": {
                    "type": "promoted",
                    "promotedLink": { "$exists": false }
                }
            })
        );
    }

    #[test]
    fn requirements_must_be_an_object() {
        assert!(Requirements::from_json(&json!(["type"])).is_err());
        assert!(Requirements::from_json(&Value::Null).is_err());
        assert!(Requirements::from_json(&json!("promoted")).is_err());
        assert!(Requirements::from_json(&json!({})).is_ok());
    }

    #[test]
    fn exists_false_round_trips_as_absent() {
        let p = Predicate::from_value(json!({ "$exists": false }));
        assert_eq!(p, Predicate::Absent);
        assert!(p.matches(None));
        assert!(!p.matches(Some(&json!(false))));
        let p = Predicate::from_value(json!(false));
        assert!(p.matches(Some(&json!(false))));
        assert!(!p.matches(None));
    }
}
