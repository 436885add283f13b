use crate::constants::JOB_LOCK_KEY;
use crate::persistence::{SettingsStore, settings_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// At-most-one active job per tenant. Acquisition is a conditional put on
/// the settings store, so two concurrent submissions cannot both win.
pub struct TenantSettingJobLock<'a> {
    tenant_name: String,
    settings: &'a dyn SettingsStore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLockPayload {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<BTreeSet<String>>,
}

impl<'a> TenantSettingJobLock<'a> {
    pub fn new(tenant_name: impl Into<String>, settings: &'a dyn SettingsStore) -> Self {
        TenantSettingJobLock {
            tenant_name: tenant_name.into(),
            settings,
        }
    }

    fn key(&self) -> String {
        settings_key(&[JOB_LOCK_KEY, &self.tenant_name])
    }

    /// Fails when another job already holds the tenant.
    pub fn acquire(&self, job_id: &str, regions: Option<BTreeSet<String>>) -> Result<(), JobLockPayload> {
        let payload = JobLockPayload {
            job_id: job_id.to_string(),
            regions,
        };
        let value = serde_json::to_value(&payload).expect("lock payload is serializable");
        if self.settings.put_if_absent(&self.key(), value) {
            return Ok(());
        }
        Err(self.locked_by().unwrap_or(payload))
    }

    pub fn release(&self) {
        self.settings.delete(&self.key());
    }

    pub fn locked_by(&self) -> Option<JobLockPayload> {
        let value = self.settings.get(&self.key())?;
        serde_json::from_value(value).ok()
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemorySettingsStore;
    use maplit::btreeset;

    #[test]
    fn second_acquire_fails_with_the_holder() {
        let settings = InMemorySettingsStore::default();
        let lock = TenantSettingJobLock::new("t1", &settings);

        lock.acquire("job-1", None).unwrap();
        let holder = lock.acquire("job-2", None).unwrap_err();
        assert_eq!(holder.job_id, "job-1");

        lock.release();
        assert!(!lock.is_locked());
        lock.acquire("job-3", Some(btreeset! {"eu-west-1".to_string()})).unwrap();
        assert_eq!(
            lock.locked_by().unwrap().regions,
            Some(btreeset! {"eu-west-1".to_string()})
        );
    }

    #[test]
    fn locks_are_scoped_per_tenant() {
        let settings = InMemorySettingsStore::default();
        TenantSettingJobLock::new("t1", &settings).acquire("job-1", None).unwrap();
        TenantSettingJobLock::new("t2", &settings).acquire("job-2", None).unwrap();
    }
}
