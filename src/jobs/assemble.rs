use crate::config::Config;
use crate::io_models::envelope::{JobEnvelope, JobType, TargetRuleset};
use crate::models::tenant::Tenant;
use chrono::Utc;

/// Builds the batch envelope for a submission. The submission controller
/// never talks to the worker any other way.
pub struct AssembleService<'a> {
    pub config: &'a Config,
}

pub struct EnvelopeOptions {
    pub target_regions: Vec<String>,
    pub target_rulesets: Vec<TargetRuleset>,
    pub licensed_rulesets: Vec<String>,
    pub affected_licenses: Vec<String>,
    pub credentials_key: Option<String>,
    pub platform_id: Option<String>,
    pub job_type: JobType,
}

impl Default for EnvelopeOptions {
    fn default() -> Self {
        EnvelopeOptions {
            target_regions: vec![],
            target_rulesets: vec![],
            licensed_rulesets: vec![],
            affected_licenses: vec![],
            credentials_key: None,
            platform_id: None,
            job_type: JobType::Standard,
        }
    }
}

impl<'a> AssembleService<'a> {
    pub fn build_job_envelope(&self, tenant: &Tenant, options: EnvelopeOptions) -> JobEnvelope {
        JobEnvelope {
            tenant_name: tenant.name.clone(),
            platform_id: options.platform_id,
            job_id: None,
            job_type: options.job_type,
            batch_results_ids: vec![],
            target_regions: options.target_regions,
            target_rulesets: options.target_rulesets,
            licensed_rulesets: options.licensed_rulesets,
            affected_licenses: options.affected_licenses,
            credentials_key: options.credentials_key,
            submitted_at: Utc::now(),
            job_lifetime_min: self.config.job_lifetime_min,
            scheduled_job_name: None,
            aws_region: self.config.aws_region.clone(),
        }
    }
}

/// Batch job names carry tenant/owner/time; anything outside the
/// backend's charset becomes an underscore.
pub fn sanitize_job_name(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_sanitized() {
        assert_eq!(sanitize_job_name("t1-ops@corp-2024 05"), "t1-ops_corp-2024_05");
        assert_eq!(sanitize_job_name("plain-name_1"), "plain-name_1");
    }
}
