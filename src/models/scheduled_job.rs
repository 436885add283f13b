use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recurring scan registration backed by the scheduler store. Each fire
/// produces a fresh `Job` row; the executor deduplicates by job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub name: String,
    pub tenant_name: String,
    pub customer_name: String,
    /// Cron or rate expression, opaque to the orchestrator.
    pub schedule: String,
    pub enabled: bool,
    pub last_execution_time: Option<DateTime<Utc>>,
    /// The batch envelope registered for this schedule, replayed on fire.
    pub envelope: BTreeMap<String, String>,
    /// Wire-form rule-set identities captured at registration time; the
    /// executor seeds the dynamic job row from these.
    pub scan_rulesets: Vec<String>,
}

impl ScheduledJob {
    /// `last_execution_time` is monotonically non-decreasing.
    pub fn stamp_execution(&mut self, at: DateTime<Utc>) {
        match self.last_execution_time {
            Some(previous) if previous > at => (),
            _ => self.last_execution_time = Some(at),
        }
    }
}
