use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigError;
use crate::selection::{Predicate, Requirements};
use crate::snippet::deserialize_opt_timestamp;

/// One entry of the versioned parser catalog.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParserDescriptor {
    pub name: String,
    pub key: String,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub until: Option<DateTime<Utc>>,
}

/// Ordered, read-only catalog of parser descriptors, loaded once per process.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: Vec<ParserDescriptor>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let load_err = |reason: String| ConfigError::RegistryLoad {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let descriptors: Vec<ParserDescriptor> =
            serde_json::from_str(&raw).map_err(|e| load_err(e.to_string()))?;
        debug!("Loaded {} parser descriptors from {}", descriptors.len(), path.display());
        Ok(Self { descriptors })
    }

    pub fn from_descriptors(descriptors: Vec<ParserDescriptor>) -> Self {
        Self { descriptors }
    }

    /// First descriptor with a matching name.
    pub fn find(&self, name: &str) -> Option<&ParserDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }
}

/// Caller-supplied configuration before it is merged with the registry.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    pub name: String,
    pub requirements: Value,
    pub repeat: bool,
    pub concurrency: usize,
}

/// Merged configuration driving one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub name: String,
    pub key: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub requirements: Requirements,
    pub repeat: bool,
    pub concurrency: usize,
}

/// Merges the registry entry for `base.name` and sets the completion predicate:
/// `{name: {$exists: false}}` for new snippets, `{name: false}` in repeat mode.
pub fn resolve(base: BaseConfig, registry: &Registry) -> Result<RuntimeConfig, ConfigError> {
    let mut requirements = Requirements::from_json(&base.requirements)?;
    if base.concurrency == 0 {
        return Err(ConfigError::InvalidConfig(
            "concurrency has to be at least 1".into(),
        ));
    }

    let descriptor = registry
        .find(&base.name)
        .ok_or_else(|| ConfigError::UnknownParser(base.name.clone()))?;

    if base.repeat {
        debug!(
            "Repeating analysis on previous failures {{ {}: false }}",
            base.name
        );
        requirements.set(&base.name, Predicate::Equals(Value::Bool(false)));
    } else {
        requirements.set(&base.name, Predicate::Absent);
    }

    Ok(RuntimeConfig {
        name: base.name,
        key: descriptor.key.clone(),
        since: descriptor.since,
        until: descriptor.until,
        requirements,
        repeat: base.repeat,
        concurrency: base.concurrency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::from_descriptors(vec![
            ParserDescriptor {
                name: "promotedLink".into(),
                key: "K1".into(),
                since: Some(Utc.with_ymd_and_hms(2016, 9, 13, 0, 0, 0).unwrap()),
                until: None,
            },
            ParserDescriptor {
                name: "promotedLink".into(),
                key: "shadowed".into(),
                since: None,
                until: None,
            },
        ])
    }

    fn base(requirements: Value, repeat: bool) -> BaseConfig {
        BaseConfig {
            name: "promotedLink".into(),
            requirements,
            repeat,
            concurrency: 5,
        }
    }

    #[test]
    fn first_match_wins() {
        let cfg = resolve(base(json!({}), false), &registry()).unwrap();
        assert_eq!(cfg.key, "K1");
        assert_eq!(cfg.since, Some(Utc.with_ymd_and_hms(2016, 9, 13, 0, 0, 0).unwrap()));
        assert_eq!(cfg.until, None);
    }

    #[test]
    fn fresh_mode_requires_absent_flag() {
        let cfg = resolve(base(json!({ "type": "promoted" }), false), &registry()).unwrap();
        assert_eq!(cfg.requirements.get("promotedLink"), Some(&Predicate::Absent));
        assert_eq!(
            cfg.requirements.get("type"),
            Some(&Predicate::Equals(json!("promoted")))
        );
    }

    #[test]
    fn repeat_mode_requires_false_flag() {
        let cfg = resolve(base(json!({ "type": "promoted" }), true), &registry()).unwrap();
        assert_eq!(
            cfg.requirements.get("promotedLink"),
            Some(&Predicate::Equals(json!(false)))
        );
    }

    #[test]
    fn caller_flag_predicate_is_overwritten() {
        // Repeat decides the flag predicate, whatever the caller put there.
        let cfg = resolve(base(json!({ "promotedLink": true }), false), &registry()).unwrap();
        assert_eq!(cfg.requirements.get("promotedLink"), Some(&Predicate::Absent));
    }

    #[test]
    fn unknown_parser() {
        let mut b = base(json!({}), false);
        b.name = "nope".into();
        assert!(matches!(
            resolve(b, &registry()),
            Err(ConfigError::UnknownParser(n)) if n == "nope"
        ));
    }

    #[test]
    fn non_object_requirements() {
        assert!(matches!(
            resolve(base(json!("promoted"), false), &registry()),
            Err(ConfigError::InvalidConfig(_))
        ));
        assert!(matches!(
            resolve(base(Value::Null, false), &registry()),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_concurrency() {
        let mut b = base(json!({}), false);
        b.concurrency = 0;
        assert!(matches!(resolve(b, &registry()), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn shipped_registry_parses() {
        let reg = Registry::load(Path::new("parsers/parsers-keys.json")).unwrap();
        assert!(reg.find("promotedLink").is_some());
        assert!(reg.find("postType").is_some());
    }

    #[test]
    fn missing_registry_file() {
        let err = Registry::load(Path::new("parsers/does-not-exist.json")).unwrap_err();
        assert!(matches!(err, ConfigError::RegistryLoad { .. }));
    }
}
