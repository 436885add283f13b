use crate::models::Cloud;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An immutable, versioned bundle of rules for one cloud. The triple
/// (name, version, cloud) is unique per customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub id: String,
    pub customer: String,
    pub name: String,
    pub version: String,
    pub cloud: Cloud,
    pub licensed: bool,
    /// License-manager side id, set on licensed rule-sets only.
    pub license_manager_id: Option<String>,
    /// Object-storage location of the packed rule-set content.
    pub source: String,
    pub active: bool,
    pub event_driven: bool,
    pub rules: Vec<String>,
}

/// Rule-set identity on the wire: `<name>`, `<name>:<version>` or
/// `<name>:<version>:<license-key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RulesetName {
    pub name: String,
    pub version: Option<String>,
    pub license_key: Option<String>,
}

impl RulesetName {
    pub fn new(name: impl Into<String>, version: Option<String>, license_key: Option<String>) -> Self {
        RulesetName {
            name: name.into(),
            version,
            license_key,
        }
    }
}

impl FromStr for RulesetName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("rule-set name cannot be empty".to_string());
        }
        let mut parts = s.splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(format!("invalid rule-set identity `{s}`"));
        }
        let version = parts.next().filter(|v| !v.is_empty()).map(str::to_string);
        let license_key = parts.next().filter(|v| !v.is_empty()).map(str::to_string);
        Ok(RulesetName {
            name: name.to_string(),
            version,
            license_key,
        })
    }
}

impl Display for RulesetName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (&self.version, &self.license_key) {
            (Some(version), Some(key)) => write!(f, "{}:{}:{}", self.name, version, key),
            (Some(version), None) => write!(f, "{}:{}", self.name, version),
            (None, Some(key)) => write!(f, "{}::{}", self.name, key),
            (None, None) => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_wire_forms() {
        let bare = RulesetName::from_str("base").unwrap();
        assert_eq!(bare.name, "base");
        assert!(bare.version.is_none() && bare.license_key.is_none());

        let versioned = RulesetName::from_str("base:1.2").unwrap();
        assert_eq!(versioned.version.as_deref(), Some("1.2"));

        let licensed = RulesetName::from_str("base:1.2:lk-42").unwrap();
        assert_eq!(licensed.license_key.as_deref(), Some("lk-42"));
    }

    #[test]
    fn round_trips_through_display() {
        for raw in ["base", "base:1.2", "base:1.2:lk-42"] {
            let parsed = RulesetName::from_str(raw).unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn rejects_empty() {
        assert!(RulesetName::from_str("").is_err());
        assert!(RulesetName::from_str(":1.0").is_err());
    }
}
