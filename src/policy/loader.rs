use crate::constants::{AWS_DEFAULT_REGION, GLOBAL_REGION};
use crate::models::Cloud;
use crate::policy::{LoadOptions, Policy, PolicyDescriptor, PolicyEngine};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Turns raw policy descriptors into executable policies bound to a region
/// or to the synthetic `global` bucket. Descriptors that fail to
/// instantiate or validate are skipped with a warning, never fatal.
pub struct PoliciesLoader<'a> {
    engine: &'a dyn PolicyEngine,
    cloud: Cloud,
    output_dir: PathBuf,
    regions: BTreeSet<String>,
    load_global: bool,
    cache_period_sec: u64,
}

impl<'a> PoliciesLoader<'a> {
    pub fn new(engine: &'a dyn PolicyEngine, cloud: Cloud, output_dir: &Path, regions: BTreeSet<String>, load_global: bool) -> Self {
        if cloud != Cloud::Aws && !regions.is_empty() {
            warn!("given regions will be ignored because the cloud is {cloud}");
        }
        PoliciesLoader {
            engine,
            cloud,
            output_dir: output_dir.to_path_buf(),
            regions,
            load_global,
            cache_period_sec: 30,
        }
    }

    pub fn with_cache_period(mut self, cache_period_sec: u64) -> Self {
        self.cache_period_sec = cache_period_sec;
        self
    }

    fn options(&self) -> LoadOptions {
        LoadOptions {
            output_dir: self.output_dir.clone(),
            regions: self.regions.clone(),
            cache_period_sec: self.cache_period_sec,
        }
    }

    fn set_global_output(&self, policy: &mut Policy) {
        policy.output_dir = self.output_dir.join(GLOBAL_REGION);
    }

    fn set_regional_output(&self, policy: &mut Policy) {
        policy.output_dir = self.output_dir.join(&policy.region);
    }

    pub fn get_policy_region(policy: &Policy) -> String {
        policy.effective_region()
    }

    /// Instantiate, group by provider, init each provider once, validate.
    fn load(&self, descriptors: &[PolicyDescriptor], options: &LoadOptions) -> Vec<Policy> {
        let required: BTreeSet<String> = descriptors.iter().flat_map(|d| d.resource_types()).collect();
        self.engine.register_resource_types(&required);

        let mut provider_policies: BTreeMap<String, Vec<Policy>> = BTreeMap::new();
        for descriptor in descriptors {
            match self.engine.instantiate(descriptor, options) {
                Ok(policy) => provider_policies.entry(policy.provider.clone()).or_default().push(policy),
                Err(err) => {
                    warn!("cannot load policy {}: {err}. Skipping", descriptor.name);
                }
            }
        }

        let mut result = Vec::new();
        for (provider, policies) in provider_policies {
            let policies = match self.engine.initialize_provider(&provider, policies, options) {
                Ok(policies) => policies,
                Err(err) => {
                    warn!("provider {provider} initialization failed: {err}. Skipping its policies");
                    continue;
                }
            };
            for mut policy in policies {
                match self.engine.validate(&mut policy) {
                    Ok(()) => result.push(policy),
                    Err(err) => {
                        warn!("policy {} validation failed: {err}. Skipping", policy.name);
                    }
                }
            }
        }
        result
    }

    /// Keeps only policies whose region must be scanned. Globals are kept
    /// regardless (when enabled), emitted once, and pinned to the default
    /// region. s3 is region-dependent but its API is global, so it is
    /// treated as global and requested once.
    fn prepare_policies(&self, policies: Vec<Policy>) -> Vec<Policy> {
        let mut global_yielded: HashSet<String> = HashSet::new();
        let mut result = Vec::new();
        let (mut n_global, mut n_not_global) = (0usize, 0usize);
        for mut policy in policies {
            if self.load_global && policy.is_global() {
                if global_yielded.contains(&policy.name) {
                    continue;
                }
                debug!("global policy found: {}", policy.name);
                self.set_global_output(&mut policy);
                policy.region = AWS_DEFAULT_REGION.to_string();
                global_yielded.insert(policy.name.clone());
                n_global += 1;
            } else if !policy.is_global() && (self.regions.is_empty() || self.regions.contains(&policy.region)) {
                debug!("not global policy found: {}", policy.name);
                self.set_regional_output(&mut policy);
                n_not_global += 1;
            } else {
                continue;
            }
            result.push(policy);
        }
        debug!("global policies: {n_global}");
        debug!("not global policies: {n_not_global}");
        result
    }

    pub fn load_from_policies(&self, descriptors: &[PolicyDescriptor]) -> Vec<Policy> {
        info!("loading policies");
        let options = self.options();
        let items = self.load(descriptors, &options);
        let items = match self.cloud {
            Cloud::Aws => self.prepare_policies(items),
            _ => items
                .into_iter()
                .map(|mut policy| {
                    self.set_global_output(&mut policy);
                    policy
                })
                .collect(),
        };
        info!("policies were loaded");
        items
    }

    /// Loading mode for event-driven scans: a mapping region -> rule ids
    /// decides both which policies to keep and where they run.
    pub fn load_from_regions_to_rules(
        &self,
        descriptors: &[PolicyDescriptor],
        mapping: &BTreeMap<String, BTreeSet<String>>,
    ) -> Vec<Policy> {
        let rules: BTreeSet<String> = mapping.values().flatten().cloned().collect();
        if self.cloud != Cloud::Aws {
            let mut items: Vec<Policy> = self
                .load(descriptors, &self.options())
                .into_iter()
                .filter(|p| rules.contains(&p.name))
                .collect();
            for policy in items.iter_mut() {
                self.set_global_output(policy);
            }
            return items;
        }

        let mut options = self.options();
        options.regions = mapping.keys().cloned().chain([AWS_DEFAULT_REGION.to_string()]).collect();
        let loaded = self.load(descriptors, &options);
        self.prepare_policies(loaded)
            .into_iter()
            .filter(|policy| {
                if policy.is_global() {
                    rules.contains(&policy.name)
                } else {
                    mapping.get(&policy.region).is_some_and(|wanted| wanted.contains(&policy.name))
                }
            })
            .collect_vec()
    }
}
