use crate::config::Config;
use crate::models::JobStatus;
use crate::models::job::Job;
use crate::persistence::JobStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

pub struct JobService<'a> {
    pub jobs: &'a dyn JobStore,
    pub config: &'a Config,
}

pub struct NewJob {
    pub id: String,
    pub tenant_name: String,
    pub customer_name: String,
    pub owner: String,
    pub submitted_at: DateTime<Utc>,
    pub platform_id: Option<String>,
    pub rulesets: Vec<String>,
    pub rules_to_scan: Vec<String>,
}

impl<'a> JobService<'a> {
    pub fn create(&self, new_job: NewJob) -> Job {
        let job = Job {
            id: new_job.id,
            tenant_name: new_job.tenant_name,
            customer_name: new_job.customer_name,
            owner: new_job.owner,
            status: JobStatus::Submitted,
            submitted_at: new_job.submitted_at,
            created_at: None,
            started_at: None,
            stopped_at: None,
            platform_id: new_job.platform_id,
            rulesets: new_job.rulesets,
            rules_to_scan: new_job.rules_to_scan,
            reason: None,
            ttl_days: self.config.jobs_time_to_live_days,
        };
        self.jobs.save(&job);
        job
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id)
    }

    pub fn list(&self, customer: Option<&str>, tenants: &BTreeSet<String>, limit: Option<usize>) -> Vec<Job> {
        self.jobs.list(customer, tenants, limit)
    }

    /// Customer scoping: a job is visible when it belongs to the caller's
    /// customer and, if a tenant set is given, to one of those tenants.
    pub fn is_allowed(&self, job: &Job, customer: Option<&str>, tenants: &BTreeSet<String>) -> bool {
        if let Some(customer) = customer
            && job.customer_name != customer
        {
            return false;
        }
        tenants.is_empty() || tenants.contains(&job.tenant_name)
    }

    pub fn set_failed(&self, job: &mut Job, reason: String) {
        job.status = JobStatus::Failed;
        job.stopped_at = Some(Utc::now());
        job.reason = Some(reason);
        self.jobs.save(job);
    }

    /// Remaining cooldown before this tenant may be scanned again, when
    /// the threshold setting is configured.
    pub fn last_scan_cooldown_left(&self, tenant_name: &str) -> Option<Duration> {
        let threshold = self.config.last_scan_threshold_seconds?;
        let last = self.jobs.last_succeeded(tenant_name)?;
        let allowed_after = last.submitted_at + Duration::seconds(threshold);
        let now = Utc::now();
        if allowed_after < now {
            return None;
        }
        Some(allowed_after - now)
    }
}
