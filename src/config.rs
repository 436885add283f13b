use crate::constants::*;
use crate::models::Cloud;
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;

/// Process-wide configuration, read once at startup and handed to the
/// components by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub allowed_clouds: BTreeSet<Cloud>,
    pub allow_simultaneous_jobs: bool,
    pub management_credentials_allowed: bool,
    pub skip_cloud_identifier_validation: bool,
    /// Minimum seconds between two scans of one tenant, unset disables the
    /// cooldown.
    pub last_scan_threshold_seconds: Option<i64>,
    pub jobs_time_to_live_days: Option<i64>,
    pub batch_job_queue: String,
    pub batch_job_definition: String,
    pub reports_bucket: String,
    pub statistics_bucket: String,
    pub rulesets_bucket: String,
    pub job_lifetime_min: i64,
    pub aws_region: String,
    pub on_prem: bool,
}

fn env_bool(key: &str) -> bool {
    env::var(key).map(|v| v == "true" || v == "1").unwrap_or(false)
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Config {
            allowed_clouds: BTreeSet::from([Cloud::Aws, Cloud::Azure, Cloud::Google, Cloud::Kubernetes]),
            allow_simultaneous_jobs: false,
            management_credentials_allowed: false,
            skip_cloud_identifier_validation: false,
            last_scan_threshold_seconds: None,
            jobs_time_to_live_days: None,
            batch_job_queue: String::new(),
            batch_job_definition: String::new(),
            reports_bucket: DEFAULT_REPORTS_BUCKET_NAME.to_string(),
            statistics_bucket: DEFAULT_STATISTICS_BUCKET_NAME.to_string(),
            rulesets_bucket: DEFAULT_RULESETS_BUCKET_NAME.to_string(),
            job_lifetime_min: DEFAULT_JOB_LIFETIME_MIN,
            aws_region: AWS_DEFAULT_REGION.to_string(),
            on_prem: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Config {
        let mut config = Config::default();

        if let Ok(raw) = env::var(ENV_ALLOWED_CLOUDS) {
            let clouds: BTreeSet<Cloud> = raw
                .split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| Cloud::from_str(s.trim()).ok())
                .collect();
            if !clouds.is_empty() {
                config.allowed_clouds = clouds;
            }
        }
        config.allow_simultaneous_jobs = env_bool(ENV_ALLOW_SIMULTANEOUS_JOBS);
        config.management_credentials_allowed = env_bool(ENV_ALLOW_MANAGEMENT_CREDENTIALS);
        config.skip_cloud_identifier_validation = env_bool(ENV_SKIP_CLOUD_IDENTIFIER_VALIDATION);
        config.last_scan_threshold_seconds = env::var(ENV_LAST_SCAN_THRESHOLD_SECONDS)
            .ok()
            .and_then(|v| v.parse().ok());
        config.jobs_time_to_live_days = env::var(ENV_JOBS_TIME_TO_LIVE_DAYS).ok().and_then(|v| v.parse().ok());
        config.batch_job_queue = env_or(ENV_BATCH_JOB_QUEUE, "");
        config.batch_job_definition = env_or(ENV_BATCH_JOB_DEFINITION, "");
        config.reports_bucket = env_or(ENV_REPORTS_BUCKET_NAME, DEFAULT_REPORTS_BUCKET_NAME);
        config.statistics_bucket = env_or(ENV_STATISTICS_BUCKET_NAME, DEFAULT_STATISTICS_BUCKET_NAME);
        config.rulesets_bucket = env_or(ENV_RULESETS_BUCKET_NAME, DEFAULT_RULESETS_BUCKET_NAME);
        config.job_lifetime_min = env::var(ENV_JOB_LIFETIME_MIN)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_JOB_LIFETIME_MIN);
        config.aws_region = env_or(ENV_AWS_REGION, AWS_DEFAULT_REGION);
        config.on_prem = env_bool(ENV_ON_PREM);

        config
    }
}
