use crate::errors::ApiError;
use crate::io_models::ScheduledJobDto;
use crate::io_models::envelope::JobEnvelope;
use crate::models::scheduled_job::ScheduledJob;
use crate::models::tenant::Tenant;
use crate::persistence::ScheduledJobStore;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Recurring jobs over the scheduler store. The store's scheduler fires
/// at-least-once; every fire replays the registered envelope, producing a
/// fresh Job row on the worker side.
pub struct SchedulerService<'a> {
    pub store: &'a dyn ScheduledJobStore,
}

impl<'a> SchedulerService<'a> {
    pub fn register(
        &self,
        tenant: &Tenant,
        schedule: &str,
        envelope: &JobEnvelope,
        name: Option<String>,
    ) -> Result<ScheduledJob, ApiError> {
        if schedule.trim().is_empty() {
            return Err(ApiError::validation("schedule cannot be empty"));
        }
        let name = name.unwrap_or_else(|| format!("sentinel-job-{}-{}", tenant.name, &Uuid::new_v4().to_string()[..8]));
        if self.store.get(&name).is_some() {
            return Err(ApiError::validation(format!("Scheduled job {name} already exists")));
        }

        let mut envelope = envelope.clone();
        envelope.scheduled_job_name = Some(name.clone());
        let job = ScheduledJob {
            name,
            tenant_name: tenant.name.clone(),
            customer_name: tenant.customer_name.clone(),
            schedule: schedule.to_string(),
            enabled: true,
            last_execution_time: None,
            envelope: envelope.to_env(),
            scan_rulesets: envelope
                .target_rulesets
                .iter()
                .map(|rs| format!("{}:{}", rs.name, rs.version))
                .collect(),
        };
        self.store.save(&job);
        Ok(job)
    }

    pub fn list(&self, customer: Option<&str>, tenants: &BTreeSet<String>) -> Vec<ScheduledJobDto> {
        self.store
            .list(customer, tenants)
            .iter()
            .map(ScheduledJobDto::from)
            .collect()
    }

    pub fn get(&self, name: &str, customer: Option<&str>, tenants: &BTreeSet<String>) -> Option<ScheduledJob> {
        let job = self.store.get(name)?;
        if let Some(customer) = customer
            && job.customer_name != customer
        {
            return None;
        }
        if !tenants.is_empty() && !tenants.contains(&job.tenant_name) {
            return None;
        }
        Some(job)
    }

    pub fn update(
        &self,
        job: &mut ScheduledJob,
        enabled: Option<bool>,
        schedule: Option<String>,
    ) -> Result<(), ApiError> {
        if let Some(enabled) = enabled {
            job.enabled = enabled;
        }
        if let Some(schedule) = schedule {
            if schedule.trim().is_empty() {
                return Err(ApiError::validation("schedule cannot be empty"));
            }
            job.schedule = schedule;
        }
        self.store.save(job);
        Ok(())
    }

    pub fn deregister(&self, name: &str) {
        self.store.delete(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::jobs::assemble::{AssembleService, EnvelopeOptions};
    use crate::models::Cloud;
    use crate::persistence::memory::InMemoryScheduledJobStore;
    use std::collections::HashMap;

    fn tenant() -> Tenant {
        Tenant {
            name: "t1".to_string(),
            customer_name: "ACME".to_string(),
            cloud: Cloud::Aws,
            project: "123456789012".to_string(),
            active: true,
            regions: BTreeSet::new(),
            parent_map: HashMap::new(),
            management_parent_id: None,
        }
    }

    fn envelope() -> JobEnvelope {
        let config = Config::default();
        AssembleService { config: &config }.build_job_envelope(&tenant(), EnvelopeOptions::default())
    }

    #[test]
    fn register_stamps_the_envelope_with_the_name() {
        let store = InMemoryScheduledJobStore::default();
        let scheduler = SchedulerService { store: &store };
        let job = scheduler
            .register(&tenant(), "cron(0 3 * * ? *)", &envelope(), Some("nightly".to_string()))
            .unwrap();
        assert_eq!(job.name, "nightly");
        assert_eq!(
            job.envelope.get(crate::constants::ENV_SCHEDULED_JOB_NAME),
            Some(&"nightly".to_string())
        );
        assert!(job.enabled);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let store = InMemoryScheduledJobStore::default();
        let scheduler = SchedulerService { store: &store };
        scheduler
            .register(&tenant(), "rate(1 day)", &envelope(), Some("nightly".to_string()))
            .unwrap();
        assert!(
            scheduler
                .register(&tenant(), "rate(1 day)", &envelope(), Some("nightly".to_string()))
                .is_err()
        );
    }

    #[test]
    fn get_is_scoped_by_customer_and_tenants() {
        let store = InMemoryScheduledJobStore::default();
        let scheduler = SchedulerService { store: &store };
        scheduler
            .register(&tenant(), "rate(1 day)", &envelope(), Some("nightly".to_string()))
            .unwrap();

        assert!(scheduler.get("nightly", Some("ACME"), &BTreeSet::new()).is_some());
        assert!(scheduler.get("nightly", Some("OTHER"), &BTreeSet::new()).is_none());
        assert!(
            scheduler
                .get("nightly", None, &BTreeSet::from(["t2".to_string()]))
                .is_none()
        );
    }

    #[test]
    fn update_toggles_and_reschedules() {
        let store = InMemoryScheduledJobStore::default();
        let scheduler = SchedulerService { store: &store };
        let mut job = scheduler
            .register(&tenant(), "rate(1 day)", &envelope(), Some("nightly".to_string()))
            .unwrap();

        scheduler
            .update(&mut job, Some(false), Some("rate(2 days)".to_string()))
            .unwrap();
        let stored = store.get("nightly").unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.schedule, "rate(2 days)");
    }
}
