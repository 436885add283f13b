use super::*;
use crate::models::JobStatus;

/// In-memory arenas backing on-prem single-process runs and tests. The
/// conditional-put semantics match what the backing store must provide in
/// SaaS mode.

#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: Mutex<HashMap<String, Tenant>>,
}

impl InMemoryTenantStore {
    pub fn with(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let store = InMemoryTenantStore::default();
        for tenant in tenants {
            store.tenants.lock().unwrap().insert(tenant.name.clone(), tenant);
        }
        store
    }
}

impl TenantStore for InMemoryTenantStore {
    fn get(&self, name: &str) -> Option<Tenant> {
        self.tenants.lock().unwrap().get(name).cloned()
    }
}

#[derive(Default)]
pub struct InMemoryParentStore {
    parents: Mutex<HashMap<String, Parent>>,
}

impl InMemoryParentStore {
    pub fn with(parents: impl IntoIterator<Item = Parent>) -> Self {
        let store = InMemoryParentStore::default();
        for parent in parents {
            store.parents.lock().unwrap().insert(parent.id.clone(), parent);
        }
        store
    }
}

impl ParentStore for InMemoryParentStore {
    fn get(&self, id: &str) -> Option<Parent> {
        self.parents.lock().unwrap().get(id).cloned()
    }
}

#[derive(Default)]
pub struct InMemoryApplicationStore {
    applications: Mutex<HashMap<String, Application>>,
}

impl InMemoryApplicationStore {
    pub fn with(applications: impl IntoIterator<Item = Application>) -> Self {
        let store = InMemoryApplicationStore::default();
        for application in applications {
            store
                .applications
                .lock()
                .unwrap()
                .insert(application.id.clone(), application);
        }
        store
    }
}

impl ApplicationStore for InMemoryApplicationStore {
    fn get(&self, id: &str) -> Option<Application> {
        self.applications.lock().unwrap().get(id).cloned()
    }
}

pub struct InMemoryJobStore {
    jobs: Table<Job>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        InMemoryJobStore { jobs: Table::new() }
    }
}

impl JobStore for InMemoryJobStore {
    fn save(&self, job: &Job) {
        self.jobs.put(job.id.clone(), job.clone());
    }

    fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id)
    }

    fn list(&self, customer: Option<&str>, tenants: &BTreeSet<String>, limit: Option<usize>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .into_iter()
            .filter(|job| customer.is_none_or(|c| job.customer_name == c))
            .filter(|job| tenants.is_empty() || tenants.contains(&job.tenant_name))
            .collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        jobs
    }

    fn last_succeeded(&self, tenant_name: &str) -> Option<Job> {
        self.jobs
            .values()
            .into_iter()
            .filter(|job| job.tenant_name == tenant_name && job.status == JobStatus::Succeeded)
            .max_by_key(|job| job.submitted_at)
    }

    fn update(&self, job: &Job) -> bool {
        self.jobs.update_with(&job.id, |stored| match stored {
            Some(stored) => {
                if stored.status.is_terminal() && stored.status != job.status {
                    return false;
                }
                *stored = job.clone();
                true
            }
            None => false,
        })
    }
}

pub struct InMemoryRulesetStore {
    rulesets: Table<Ruleset>,
}

impl Default for InMemoryRulesetStore {
    fn default() -> Self {
        InMemoryRulesetStore { rulesets: Table::new() }
    }
}

impl InMemoryRulesetStore {
    pub fn with(rulesets: impl IntoIterator<Item = Ruleset>) -> Self {
        let store = InMemoryRulesetStore::default();
        for ruleset in rulesets {
            store.save(&ruleset);
        }
        store
    }
}

impl RulesetStore for InMemoryRulesetStore {
    fn iter_standard(&self, customer: &str, cloud: Cloud, active_only: bool) -> Vec<Ruleset> {
        let mut found: Vec<Ruleset> = self
            .rulesets
            .values()
            .into_iter()
            .filter(|rs| {
                rs.customer == customer
                    && rs.cloud == cloud
                    && !rs.licensed
                    && !rs.event_driven
                    && (!active_only || rs.active)
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        found
    }

    fn by_license_manager_ids(&self, ids: &[String]) -> Vec<Ruleset> {
        self.rulesets
            .values()
            .into_iter()
            .filter(|rs| {
                rs.license_manager_id
                    .as_ref()
                    .is_some_and(|id| ids.iter().any(|wanted| wanted == id))
            })
            .collect()
    }

    fn event_driven(&self, cloud: Cloud) -> Option<Ruleset> {
        self.rulesets
            .values()
            .into_iter()
            .find(|rs| rs.cloud == cloud && rs.event_driven && rs.active)
    }

    fn save(&self, ruleset: &Ruleset) {
        self.rulesets.put(ruleset.id.clone(), ruleset.clone());
    }
}

#[derive(Default)]
pub struct InMemoryLicenseStore {
    licenses: Mutex<HashMap<String, License>>,
}

impl InMemoryLicenseStore {
    pub fn with(licenses: impl IntoIterator<Item = License>) -> Self {
        let store = InMemoryLicenseStore::default();
        for license in licenses {
            store.licenses.lock().unwrap().insert(license.key.clone(), license);
        }
        store
    }
}

impl LicenseStore for InMemoryLicenseStore {
    fn get(&self, key: &str) -> Option<License> {
        self.licenses.lock().unwrap().get(key).cloned()
    }
}

pub struct InMemoryBatchResultsStore {
    results: Table<BatchResults>,
}

impl Default for InMemoryBatchResultsStore {
    fn default() -> Self {
        InMemoryBatchResultsStore { results: Table::new() }
    }
}

impl BatchResultsStore for InMemoryBatchResultsStore {
    fn get(&self, id: &str) -> Option<BatchResults> {
        self.results.get(id)
    }

    fn save(&self, results: &BatchResults) {
        self.results.put(results.id.clone(), results.clone());
    }
}

pub struct InMemoryScheduledJobStore {
    jobs: Table<ScheduledJob>,
}

impl Default for InMemoryScheduledJobStore {
    fn default() -> Self {
        InMemoryScheduledJobStore { jobs: Table::new() }
    }
}

impl ScheduledJobStore for InMemoryScheduledJobStore {
    fn save(&self, job: &ScheduledJob) {
        self.jobs.put(job.name.clone(), job.clone());
    }

    fn get(&self, name: &str) -> Option<ScheduledJob> {
        self.jobs.get(name)
    }

    fn delete(&self, name: &str) {
        self.jobs.remove(name);
    }

    fn list(&self, customer: Option<&str>, tenants: &BTreeSet<String>) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .values()
            .into_iter()
            .filter(|job| customer.is_none_or(|c| job.customer_name == c))
            .filter(|job| tenants.is_empty() || tenants.contains(&job.tenant_name))
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }
}

pub struct InMemorySettingsStore {
    settings: Table<serde_json::Value>,
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        InMemorySettingsStore { settings: Table::new() }
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.settings.get(key)
    }

    fn put(&self, key: &str, value: serde_json::Value) {
        self.settings.put(key.to_string(), value);
    }

    fn put_if_absent(&self, key: &str, value: serde_json::Value) -> bool {
        self.settings.put_if_absent(key.to_string(), value)
    }

    fn delete(&self, key: &str) {
        self.settings.remove(key);
    }
}
