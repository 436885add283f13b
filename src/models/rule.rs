use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub cloud: String,
    pub resource: String,
    /// Coded index carried in the policy `comment` field.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Compact flags encoded into a policy's `comment` attribute by the rule
/// tooling. The layout is positional: two digits of cloud domain, one
/// digit marking a global rule, the rest reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleIndex {
    pub cloud_code: u8,
    pub is_global: bool,
}

impl RuleIndex {
    pub fn parse(comment: &str) -> RuleIndex {
        let digits: Vec<u8> = comment.bytes().filter_map(|b| (b as char).to_digit(10).map(|d| d as u8)).collect();
        let cloud_code = match (digits.first(), digits.get(1)) {
            (Some(a), Some(b)) => a * 10 + b,
            _ => 0,
        };
        RuleIndex {
            cloud_code,
            is_global: digits.get(2).copied() == Some(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flag() {
        assert!(RuleIndex::parse("021").is_global);
        assert!(!RuleIndex::parse("020").is_global);
        assert!(!RuleIndex::parse("").is_global);
    }

    #[test]
    fn parses_cloud_code() {
        assert_eq!(RuleIndex::parse("121").cloud_code, 12);
        assert_eq!(RuleIndex::parse("001").cloud_code, 0);
    }
}
