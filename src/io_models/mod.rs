use crate::models::JobStatus;
use crate::models::job::Job;
use crate::models::scheduled_job::ScheduledJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod requests;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDto {
    pub id: String,
    pub tenant_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
    pub rulesets: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rules_to_scan: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobDto {
    /// `with_customer: false` drops the customer field from responses that
    /// are already scoped to one customer.
    pub fn from_job(job: &Job, with_customer: bool) -> JobDto {
        JobDto {
            id: job.id.clone(),
            tenant_name: job.tenant_name.clone(),
            customer_name: with_customer.then(|| job.customer_name.clone()),
            status: job.status,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            stopped_at: job.stopped_at,
            platform_id: job.platform_id.clone(),
            rulesets: job.rulesets.clone(),
            rules_to_scan: job.rules_to_scan.clone(),
            reason: job.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJobDto {
    pub name: String,
    pub tenant_name: String,
    pub customer_name: String,
    pub schedule: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_execution_time: Option<DateTime<Utc>>,
    pub rulesets: Vec<String>,
}

impl From<&ScheduledJob> for ScheduledJobDto {
    fn from(job: &ScheduledJob) -> Self {
        ScheduledJobDto {
            name: job.name.clone(),
            tenant_name: job.tenant_name.clone(),
            customer_name: job.customer_name.clone(),
            schedule: job.schedule.clone(),
            enabled: job.enabled,
            last_execution_time: job.last_execution_time,
            rulesets: job.scan_rulesets.clone(),
        }
    }
}
