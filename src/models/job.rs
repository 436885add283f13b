use crate::models::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A submitted scan job. Created by the submission controller, mutated by
/// the executor (status transitions) and the lock release path, expired by
/// ttl at the store layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_name: String,
    pub customer_name: String,
    pub owner: String,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Present for Kubernetes platform scans.
    pub platform_id: Option<String>,
    /// Wire-form rule-set identities selected for this job.
    pub rulesets: Vec<String>,
    /// Optional whitelist narrowing the scan to specific rules.
    pub rules_to_scan: Vec<String>,
    pub reason: Option<String>,
    /// Row expiry applied by the store layer.
    pub ttl_days: Option<i64>,
}

/// An event-driven batch item: a set of regions and rules affected by
/// ingested cloud events. Created by the external event ingestor, mutated
/// only by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    pub id: String,
    pub tenant_name: String,
    pub customer_name: String,
    pub status: JobStatus,
    /// region -> rule ids affected in that region
    pub regions_to_rules: BTreeMap<String, BTreeSet<String>>,
    pub credentials_key: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl BatchResults {
    /// All rules referenced by this item, across regions.
    pub fn all_rules(&self) -> BTreeSet<String> {
        self.regions_to_rules.values().flatten().cloned().collect()
    }
}
