use crate::constants::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Standard,
    EventDriven,
    EventDrivenMultiAccount,
    Scheduled,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Standard => "standard",
            JobType::EventDriven => "event-driven",
            JobType::EventDrivenMultiAccount => "event-driven-multi-account",
            JobType::Scheduled => "scheduled",
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(JobType::Standard),
            "event-driven" => Ok(JobType::EventDriven),
            "event-driven-multi-account" => Ok(JobType::EventDrivenMultiAccount),
            "scheduled" => Ok(JobType::Scheduled),
            _ => Err(format!("unknown job type `{s}`")),
        }
    }
}

/// A rule-set selected for a job, pinned to a concrete version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRuleset {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// The flat key-value bundle handed to the worker through the batch
/// backend. This is the sole interface between the submission controller
/// and the executor; encode/decode must be total and loss-free.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEnvelope {
    pub tenant_name: String,
    pub platform_id: Option<String>,
    pub job_id: Option<String>,
    pub job_type: JobType,
    pub batch_results_ids: Vec<String>,
    pub target_regions: Vec<String>,
    pub target_rulesets: Vec<TargetRuleset>,
    /// `0:<license-manager-id>` entries, the `0:` prefix is a reserved tag.
    pub licensed_rulesets: Vec<String>,
    pub affected_licenses: Vec<String>,
    pub credentials_key: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub job_lifetime_min: i64,
    pub scheduled_job_name: Option<String>,
    pub aws_region: String,
}

impl JobEnvelope {
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(ENV_TENANT_NAME.to_string(), self.tenant_name.clone());
        env.insert(ENV_JOB_TYPE.to_string(), self.job_type.to_string());
        env.insert(ENV_SUBMITTED_AT.to_string(), self.submitted_at.to_rfc3339());
        env.insert(ENV_JOB_LIFETIME_MIN.to_string(), self.job_lifetime_min.to_string());
        env.insert(ENV_AWS_REGION.to_string(), self.aws_region.clone());
        env.insert(
            ENV_TARGET_REGIONS.to_string(),
            self.target_regions.join(","),
        );
        // triples survive arbitrary content as json
        env.insert(
            ENV_TARGET_RULESETS.to_string(),
            serde_json::to_string(&self.target_rulesets).unwrap_or_else(|_| "[]".to_string()),
        );
        env.insert(
            ENV_LICENSED_RULESETS.to_string(),
            self.licensed_rulesets.join(","),
        );
        env.insert(
            ENV_AFFECTED_LICENSES.to_string(),
            self.affected_licenses.join(","),
        );
        if let Some(platform_id) = &self.platform_id {
            env.insert(ENV_PLATFORM_ID.to_string(), platform_id.clone());
        }
        if let Some(job_id) = &self.job_id {
            env.insert(ENV_JOB_ID.to_string(), job_id.clone());
        }
        if !self.batch_results_ids.is_empty() {
            env.insert(
                ENV_BATCH_RESULTS_IDS.to_string(),
                self.batch_results_ids.join(","),
            );
        }
        if let Some(key) = &self.credentials_key {
            env.insert(ENV_CREDENTIALS_KEY.to_string(), key.clone());
        }
        if let Some(name) = &self.scheduled_job_name {
            env.insert(ENV_SCHEDULED_JOB_NAME.to_string(), name.clone());
        }
        env
    }

    pub fn from_env(env: &BTreeMap<String, String>) -> Result<JobEnvelope, String> {
        let get = |key: &str| env.get(key).cloned();
        let required = |key: &str| get(key).ok_or_else(|| format!("envelope misses `{key}`"));
        let list = |key: &str| -> Vec<String> {
            get(key)
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let submitted_at = required(ENV_SUBMITTED_AT)?;
        let submitted_at = DateTime::parse_from_rfc3339(&submitted_at)
            .map_err(|err| format!("invalid `{ENV_SUBMITTED_AT}`: {err}"))?
            .with_timezone(&Utc);
        let job_lifetime_min = match get(ENV_JOB_LIFETIME_MIN) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|err| format!("invalid `{ENV_JOB_LIFETIME_MIN}`: {err}"))?,
            None => DEFAULT_JOB_LIFETIME_MIN,
        };
        let target_rulesets: Vec<TargetRuleset> = match get(ENV_TARGET_RULESETS) {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(&raw).map_err(|err| format!("invalid `{ENV_TARGET_RULESETS}`: {err}"))?
            }
            _ => vec![],
        };

        Ok(JobEnvelope {
            tenant_name: required(ENV_TENANT_NAME)?,
            platform_id: get(ENV_PLATFORM_ID),
            job_id: get(ENV_JOB_ID),
            job_type: JobType::from_str(&required(ENV_JOB_TYPE)?)?,
            batch_results_ids: list(ENV_BATCH_RESULTS_IDS),
            target_regions: list(ENV_TARGET_REGIONS),
            target_rulesets,
            licensed_rulesets: list(ENV_LICENSED_RULESETS),
            affected_licenses: list(ENV_AFFECTED_LICENSES),
            credentials_key: get(ENV_CREDENTIALS_KEY),
            submitted_at,
            job_lifetime_min,
            scheduled_job_name: get(ENV_SCHEDULED_JOB_NAME),
            aws_region: get(ENV_AWS_REGION).unwrap_or_else(|| AWS_DEFAULT_REGION.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn envelope() -> JobEnvelope {
        JobEnvelope {
            tenant_name: "t1".to_string(),
            platform_id: None,
            job_id: Some("job-1".to_string()),
            job_type: JobType::Standard,
            batch_results_ids: vec![],
            target_regions: vec!["eu-west-1".to_string(), "us-east-1".to_string()],
            target_rulesets: vec![TargetRuleset {
                id: "rs-1".to_string(),
                name: "base".to_string(),
                version: "1".to_string(),
            }],
            licensed_rulesets: vec!["0:lm-7".to_string()],
            affected_licenses: vec!["tlk-1".to_string()],
            credentials_key: Some("k1".to_string()),
            submitted_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            job_lifetime_min: 55,
            scheduled_job_name: None,
            aws_region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn env_round_trip_is_loss_free() {
        let original = envelope();
        let decoded = JobEnvelope::from_env(&original.to_env()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let mut e = envelope();
        e.credentials_key = None;
        e.job_id = None;
        let env = e.to_env();
        assert!(!env.contains_key(ENV_CREDENTIALS_KEY));
        assert!(!env.contains_key(ENV_JOB_ID));
        assert_eq!(JobEnvelope::from_env(&env).unwrap(), e);
    }

    #[test]
    fn missing_tenant_is_an_error() {
        let mut env = envelope().to_env();
        env.remove(ENV_TENANT_NAME);
        assert!(JobEnvelope::from_env(&env).is_err());
    }

    #[test]
    fn regions_are_comma_separated() {
        let env = envelope().to_env();
        assert_eq!(env[ENV_TARGET_REGIONS], "eu-west-1,us-east-1");
    }
}
