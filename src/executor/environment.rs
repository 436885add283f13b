use crate::io_models::envelope::{JobEnvelope, JobType};
use std::collections::{BTreeMap, BTreeSet};

/// The worker's view of its batch envelope, decoded once at startup.
pub struct ExecutorEnv {
    pub envelope: JobEnvelope,
}

impl ExecutorEnv {
    pub fn from_process_env() -> Result<ExecutorEnv, String> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Ok(ExecutorEnv {
            envelope: JobEnvelope::from_env(&vars)?,
        })
    }

    pub fn from_map(vars: &BTreeMap<String, String>) -> Result<ExecutorEnv, String> {
        Ok(ExecutorEnv {
            envelope: JobEnvelope::from_env(vars)?,
        })
    }

    pub fn is_scheduled(&self) -> bool {
        self.envelope.job_type == JobType::Scheduled
    }

    pub fn is_event_driven(&self) -> bool {
        matches!(
            self.envelope.job_type,
            JobType::EventDriven | JobType::EventDrivenMultiAccount
        )
    }

    pub fn is_licensed_job(&self) -> bool {
        !self.envelope.affected_licenses.is_empty()
    }

    pub fn target_regions(&self) -> BTreeSet<String> {
        self.envelope.target_regions.iter().cloned().collect()
    }
}
