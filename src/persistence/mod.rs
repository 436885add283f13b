use crate::models::Cloud;
use crate::models::job::{BatchResults, Job};
use crate::models::license::License;
use crate::models::ruleset::Ruleset;
use crate::models::scheduled_job::ScheduledJob;
use crate::models::tenant::{Application, Parent, ParentType, Tenant};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

pub mod memory;

/// Stores are arenas keyed by id; cross-entity references are ids, never
/// pointers. Every trait here is a contract over an external data store;
/// the `memory` module provides the on-prem / test implementations.

pub trait TenantStore: Send + Sync {
    fn get(&self, name: &str) -> Option<Tenant>;
}

pub trait ParentStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Parent>;
}

pub trait ApplicationStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Application>;
}

pub trait JobStore: Send + Sync {
    fn save(&self, job: &Job);
    fn get(&self, id: &str) -> Option<Job>;
    fn list(&self, customer: Option<&str>, tenants: &BTreeSet<String>, limit: Option<usize>) -> Vec<Job>;
    fn last_succeeded(&self, tenant_name: &str) -> Option<Job>;
    /// Conditional write: refused when the stored row is already terminal
    /// and the update would change its status. A terminated job must not be
    /// resurrected by a worker finishing late.
    fn update(&self, job: &Job) -> bool;
}

pub trait RulesetStore: Send + Sync {
    fn iter_standard(&self, customer: &str, cloud: Cloud, active_only: bool) -> Vec<Ruleset>;
    fn by_license_manager_ids(&self, ids: &[String]) -> Vec<Ruleset>;
    fn event_driven(&self, cloud: Cloud) -> Option<Ruleset>;
    fn save(&self, ruleset: &Ruleset);
}

pub trait LicenseStore: Send + Sync {
    fn get(&self, key: &str) -> Option<License>;
}

pub trait BatchResultsStore: Send + Sync {
    fn get(&self, id: &str) -> Option<BatchResults>;
    fn save(&self, results: &BatchResults);
}

pub trait ScheduledJobStore: Send + Sync {
    fn save(&self, job: &ScheduledJob);
    fn get(&self, name: &str) -> Option<ScheduledJob>;
    fn delete(&self, name: &str);
    fn list(&self, customer: Option<&str>, tenants: &BTreeSet<String>) -> Vec<ScheduledJob>;
}

/// Scoped key-value settings. `put_if_absent` must be a conditional put on
/// the backing store: the per-tenant job lock is built on it and a plain
/// read-then-write would race.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn put(&self, key: &str, value: serde_json::Value);
    fn put_if_absent(&self, key: &str, value: serde_json::Value) -> bool;
    fn delete(&self, key: &str);
}

/// Convenience resolver spanning the tenant/parent/application arenas.
pub struct LinkedEntities<'a> {
    pub parents: &'a dyn ParentStore,
    pub applications: &'a dyn ApplicationStore,
}

impl<'a> LinkedEntities<'a> {
    pub fn linked_parent(&self, tenant: &Tenant, type_: ParentType) -> Option<Parent> {
        let id = tenant.linked_parent(type_)?;
        self.parents.get(id).filter(|p| !p.is_deleted)
    }

    pub fn linked_application(&self, tenant: &Tenant, type_: ParentType) -> Option<Application> {
        let parent = self.linked_parent(tenant, type_)?;
        self.applications.get(&parent.application_id)
    }
}

/// Composes a settings key out of scope segments, `JOB_LOCK#t1` style.
pub fn settings_key(segments: &[&str]) -> String {
    segments.join("#")
}

pub(crate) struct Table<V> {
    rows: Mutex<HashMap<String, V>>,
}

impl<V: Clone> Table<V> {
    pub(crate) fn new() -> Self {
        Table {
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn put(&self, key: String, value: V) {
        self.rows.lock().unwrap().insert(key, value);
    }

    pub(crate) fn put_if_absent(&self, key: String, value: V) -> bool {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&key) {
            return false;
        }
        rows.insert(key, value);
        true
    }

    pub(crate) fn remove(&self, key: &str) {
        self.rows.lock().unwrap().remove(key);
    }

    pub(crate) fn values(&self) -> Vec<V> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub(crate) fn update_with<R>(&self, key: &str, f: impl FnOnce(Option<&mut V>) -> R) -> R {
        let mut rows = self.rows.lock().unwrap();
        f(rows.get_mut(key))
    }
}
