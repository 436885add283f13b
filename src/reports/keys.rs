use crate::models::job::{BatchResults, Job};
use crate::models::platform::Platform;
use crate::models::tenant::Tenant;

/// Deterministic object-storage key builders. All report keys for one
/// scanned entity live under one prefix so jobs on different tenants never
/// write to the same keys.

const SHARDS_DIR: &str = "shards";
const DIFFERENCE_DIR: &str = "difference";
const LATEST_DIR: &str = "latest";

pub struct TenantReportsKeysBuilder<'a> {
    tenant: &'a Tenant,
}

impl<'a> TenantReportsKeysBuilder<'a> {
    pub fn new(tenant: &'a Tenant) -> Self {
        TenantReportsKeysBuilder { tenant }
    }

    fn prefix(&self) -> String {
        self.tenant.name.clone()
    }

    pub fn job_result(&self, job_id: &str) -> String {
        format!("{}/{}/{}", self.prefix(), job_id, SHARDS_DIR)
    }

    pub fn job_difference(&self, job_id: &str) -> String {
        format!("{}/{}/{}", self.prefix(), job_id, DIFFERENCE_DIR)
    }

    pub fn latest(&self) -> String {
        format!("{}/{}/{}", self.prefix(), LATEST_DIR, SHARDS_DIR)
    }
}

pub struct PlatformReportsKeysBuilder<'a> {
    platform: &'a Platform,
}

impl<'a> PlatformReportsKeysBuilder<'a> {
    pub fn new(platform: &'a Platform) -> Self {
        PlatformReportsKeysBuilder { platform }
    }

    fn prefix(&self) -> String {
        format!("{}/platforms/{}", self.platform.tenant_name, self.platform.id)
    }

    pub fn job_result(&self, job: &Job) -> String {
        format!("{}/{}/{}", self.prefix(), job.id, SHARDS_DIR)
    }

    pub fn job_difference(&self, job: &Job) -> String {
        format!("{}/{}/{}", self.prefix(), job.id, DIFFERENCE_DIR)
    }

    pub fn latest(&self) -> String {
        format!("{}/{}/{}", self.prefix(), LATEST_DIR, SHARDS_DIR)
    }
}

pub struct StatisticsKeysBuilder;

impl StatisticsKeysBuilder {
    pub fn job_statistics(job_id: &str) -> String {
        format!("{job_id}.json.gz")
    }

    pub fn batch_results_statistics(results: &BatchResults) -> String {
        format!("{}.json.gz", results.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cloud;
    use std::collections::{BTreeSet, HashMap};

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

    #[test]
    fn tenant_keys_are_partitioned_per_job() {
        let tenant = tenant();
        let keys = TenantReportsKeysBuilder::new(&tenant);
        assert_eq!(keys.job_result("job-1"), "t1/job-1/shards");
        assert_eq!(keys.job_difference("job-1"), "t1/job-1/difference");
        assert_eq!(keys.latest(), "t1/latest/shards");
    }
}
