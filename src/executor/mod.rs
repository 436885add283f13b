use crate::constants::{
    AWS_DEFAULT_REGION_ENV, EXCLUDED_RULES_KEY, GLOBAL_REGION,
};
use crate::errors::{EXIT_CODE_RECOVERABLE, EXIT_CODE_SUCCESS, EXIT_CODE_UNEXPECTED, ExecutorError};
use crate::executor::environment::ExecutorEnv;
use crate::executor::process::{RegionScan, spawn_region_scan};
use crate::io_models::envelope::{JobEnvelope, JobType};
use crate::jobs::lock::TenantSettingJobLock;
use crate::models::job::{BatchResults, Job};
use crate::models::platform::Platform;
use crate::models::ruleset::RulesetName;
use crate::models::tenant::Tenant;
use crate::models::{Cloud, JobStatus};
use crate::object_storage::gz_put_json;
use crate::policy::PolicyDescriptor;
use crate::policy::PolicyEngine;
use crate::policy::loader::PoliciesLoader;
use crate::reports::keys::{PlatformReportsKeysBuilder, StatisticsKeysBuilder, TenantReportsKeysBuilder};
use crate::scan::result::JobResult;
use crate::scan::runner::{FailedPolicies, Runner};
use crate::services::Services;
use crate::sharding::{ShardsCollection, ShardsCollectionFactory, ShardsS3Io};
use crate::siem::{
    ScanJob, ShardCollectionDojoConvertor, ShardCollectionUdmEntitiesConvertor, ShardCollectionUdmEventsConvertor,
    UdmConverterType, job_tags,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub mod environment;
pub mod process;

/// The worker-side driver: decodes the envelope, resolves credentials,
/// loads policies, fences each region into a child process, aggregates
/// shards, diffs against the latest state and reports back.
pub struct Executor<'a> {
    pub services: &'a Services,
    pub engine: &'a dyn PolicyEngine,
    pub executor_bin: PathBuf,
}

struct ReportKeys {
    job_result: String,
    job_difference: String,
    latest: String,
}

impl Executor<'_> {
    pub fn run(&self, env: &ExecutorEnv) -> i32 {
        match env.envelope.job_type {
            JobType::EventDriven | JobType::EventDrivenMultiAccount => {
                info!("starting event driven job");
                self.multi_account_event_driven_job(env)
            }
            _ => {
                info!("starting standard job");
                self.single_account_standard_job(env)
            }
        }
    }

    fn deadline(&self, job_id: Option<&str>, lifetime_min: i64) -> DateTime<Utc> {
        let started_at = job_id
            .and_then(|id| self.services.batch.job_started_at(id))
            .unwrap_or_else(Utc::now);
        started_at + Duration::minutes(lifetime_min)
    }

    fn single_account_standard_job(&self, env: &ExecutorEnv) -> i32 {
        let envelope = &env.envelope;
        let tenant = match self.services.tenants.get(&envelope.tenant_name) {
            Some(tenant) => tenant,
            None => {
                error!("tenant {} does not exist", envelope.tenant_name);
                return EXIT_CODE_UNEXPECTED;
            }
        };

        let mut job = match self.materialize_job(envelope, &tenant) {
            Ok(job) => job,
            Err(message) => {
                error!("{message}");
                return EXIT_CODE_UNEXPECTED;
            }
        };

        if env.is_scheduled() {
            let lock = TenantSettingJobLock::new(&tenant.name, self.services.settings.as_ref());
            let regions = if envelope.target_regions.is_empty() {
                BTreeSet::from([GLOBAL_REGION.to_string()])
            } else {
                env.target_regions()
            };
            if let Err(holder) = lock.acquire(&job.id, Some(regions)) {
                warn!("tenant {} is locked by job {}", tenant.name, holder.job_id);
                job.status = JobStatus::Failed;
                job.stopped_at = Some(Utc::now());
                job.reason = Some(format!("tenant is locked by job {}", holder.job_id));
                let _ = self.services.jobs.update(&job);
                return EXIT_CODE_UNEXPECTED;
            }
        }

        // the lock is held from here on (acquired by the submission
        // controller, or above for scheduled fires), release it whatever
        // happens next
        let lock_tenant = tenant.name.clone();
        let settings = self.services.settings.clone();
        scopeguard::defer! {
            TenantSettingJobLock::new(&lock_tenant, settings.as_ref()).release();
        }

        job.created_at = Some(Utc::now());
        job.started_at = Some(Utc::now());
        job.status = JobStatus::Running;
        if self.services.config.on_prem && !self.services.jobs.update(&job) {
            warn!("job {} refused the RUNNING transition", job.id);
        }

        let work_dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                error!("cannot create work dir: {err}");
                return EXIT_CODE_UNEXPECTED;
            }
        };

        let outcome = self.standard_job(&mut job, &tenant, env, work_dir.path());
        let code = match &outcome {
            Ok(()) => {
                job.status = JobStatus::Succeeded;
                job.stopped_at = Some(Utc::now());
                EXIT_CODE_SUCCESS
            }
            Err(err) => {
                error!("executor error occurred: {err}");
                job.status = JobStatus::Failed;
                job.stopped_at = Some(Utc::now());
                job.reason = Some(err.to_string());
                err.exit_code()
            }
        };

        // failures are always written, success transitions are the event
        // pipeline's business unless we run on-prem
        if code != EXIT_CODE_SUCCESS || self.services.config.on_prem {
            let _ = self.services.jobs.update(&job);
        }

        if self.services.config.on_prem && env.is_licensed_job() {
            info!("the job is licensed on premises, updating in the license manager");
            if let Err(err) = self.services.license_manager.update_job(
                &job.id,
                &job.customer_name,
                job.created_at,
                job.started_at,
                job.stopped_at,
                job.status,
            ) {
                warn!("cannot update the license manager: {err}");
            }
        }
        code
    }

    /// API jobs come with their row already created; scheduled fires
    /// materialize a fresh one from the envelope.
    fn materialize_job(&self, envelope: &JobEnvelope, tenant: &Tenant) -> Result<Job, String> {
        if let Some(job_id) = &envelope.job_id
            && let Some(job) = self.services.jobs.get(job_id)
        {
            return Ok(job);
        }
        let scheduled_name = envelope
            .scheduled_job_name
            .as_ref()
            .ok_or_else(|| format!("job {:?} does not exist", envelope.job_id))?;
        let scheduled = self
            .services
            .scheduled_jobs
            .get(scheduled_name)
            .ok_or_else(|| format!("scheduled job {scheduled_name} does not exist"))?;

        let job = Job {
            id: envelope.job_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
            tenant_name: tenant.name.clone(),
            customer_name: tenant.customer_name.clone(),
            owner: "scheduler".to_string(),
            status: JobStatus::Submitted,
            submitted_at: envelope.submitted_at,
            created_at: None,
            started_at: None,
            stopped_at: None,
            platform_id: envelope.platform_id.clone(),
            rulesets: scheduled.scan_rulesets.clone(),
            rules_to_scan: vec![],
            reason: None,
            ttl_days: self.services.config.jobs_time_to_live_days,
        };
        self.services.jobs.save(&job);
        Ok(job)
    }

    fn standard_job(
        &self,
        job: &mut Job,
        tenant: &Tenant,
        env: &ExecutorEnv,
        work_dir: &Path,
    ) -> Result<(), ExecutorError> {
        let envelope = &env.envelope;
        let internal = |message: String| ExecutorError::Internal(message);

        let platform: Option<Platform> = match &envelope.platform_id {
            Some(platform_id) => {
                let parent = self
                    .services
                    .parents
                    .get(platform_id)
                    .ok_or_else(|| internal(format!("platform {platform_id} does not exist")))?;
                Some(Platform::from_parent(&parent).map_err(internal)?)
            }
            None => None,
        };
        let cloud = if platform.is_some() { Cloud::Kubernetes } else { tenant.cloud };
        info!(
            "{} job '{}' has started: cloud={cloud}, tenant={}",
            envelope.job_type, job.id, tenant.name
        );

        let resolver = self.services.credentials_resolver();
        let credentials = match &platform {
            Some(platform) => resolver.resolve_platform(platform, envelope.credentials_key.as_deref()),
            None => resolver.resolve(tenant, envelope.credentials_key.as_deref(), None),
        }
        .map_err(|err| {
            warn!("{err}");
            ExecutorError::NoCredentials
        })?;

        if let Some(name) = &envelope.scheduled_job_name
            && let Some(mut scheduled) = self.services.scheduled_jobs.get(name)
        {
            scheduled.stamp_execution(Utc::now());
            self.services.scheduled_jobs.save(&scheduled);
        }

        let started_at = Utc::now();
        let deadline = self.deadline(Some(job.id.as_str()), envelope.job_lifetime_min);

        let licensed_urls = self.licensed_ruleset_urls(tenant, job)?;
        let standard_urls = self.standard_ruleset_urls(tenant, job);
        let keep: BTreeSet<String> = job.rules_to_scan.iter().cloned().collect();
        let exclude = self.rules_to_exclude(tenant);
        let descriptors = self.get_policies(licensed_urls.into_iter().chain(standard_urls), &keep, &exclude);

        let mut policies_file = tempfile::NamedTempFile::new().map_err(|e| internal(e.to_string()))?;
        policies_file
            .write_all(&serde_json::to_vec(&descriptors).map_err(|e| internal(e.to_string()))?)
            .and_then(|()| policies_file.flush())
            .map_err(|e| internal(e.to_string()))?;

        let mut env_frame = credentials.as_env_vars();
        env_frame.push((AWS_DEFAULT_REGION_ENV.to_string(), self.services.config.aws_region.clone()));

        let mut failed = FailedPolicies::new();
        let regions = std::iter::once(GLOBAL_REGION.to_string()).chain(env.target_regions());
        for region in regions {
            info!("starting scan process for region {region}");
            let scan = RegionScan {
                cloud,
                region,
                policies_file: policies_file.path().to_path_buf(),
                work_dir: work_dir.to_path_buf(),
                deadline,
            };
            failed.extend(spawn_region_scan(&self.executor_bin, &scan, &env_frame));
        }

        let result = JobResult::new(work_dir, cloud);
        let keys = match &platform {
            Some(platform) => {
                let keys = PlatformReportsKeysBuilder::new(platform);
                ReportKeys {
                    job_result: keys.job_result(job),
                    job_difference: keys.job_difference(job),
                    latest: keys.latest(),
                }
            }
            None => {
                let keys = TenantReportsKeysBuilder::new(tenant);
                ReportKeys {
                    job_result: keys.job_result(&job.id),
                    job_difference: keys.job_difference(&job.id),
                    latest: keys.latest(),
                }
            }
        };

        let mut collection = ShardsCollectionFactory::from_cloud(cloud);
        collection.put_parts(result.iter_shard_parts());
        collection.set_meta(result.rules_meta());

        info!("going to upload to SIEM");
        self.upload_to_siem(tenant, &collection, &ScanJob::Standard(job), platform.as_ref());

        self.write_reports(&mut collection, cloud, &keys)?;

        info!("writing statistics");
        let statistics = result.statistics(&tenant.name, Some(started_at), Some(Utc::now()), &failed);
        gz_put_json(
            self.services.object_storage.as_ref(),
            &self.services.config.statistics_bucket,
            &StatisticsKeysBuilder::job_statistics(&job.id),
            &serde_json::to_value(&statistics).map_err(|e| internal(e.to_string()))?,
        )
        .map_err(|e| internal(e.to_string()))?;

        info!("job '{}' has ended", job.id);
        Ok(())
    }

    /// End-of-job write protocol: persist the job report, pull only the
    /// affected latest shards, write the difference, then fold the new
    /// findings into latest. The diff always lands before latest moves.
    fn write_reports(&self, collection: &mut ShardsCollection, cloud: Cloud, keys: &ReportKeys) -> Result<(), ExecutorError> {
        let internal = |message: String| ExecutorError::Internal(message);
        let bucket = self.services.config.reports_bucket.clone();
        let io = |root: &str| -> Arc<dyn crate::sharding::ShardsIo> {
            Arc::new(ShardsS3Io::new(bucket.clone(), root, self.services.object_storage.clone()))
        };

        debug!("writing job report");
        collection.set_io(io(&keys.job_result));
        collection.write_all().map_err(|e| internal(e.to_string()))?;
        collection.write_meta().map_err(|e| internal(e.to_string()))?;

        debug!("pulling latest state");
        let mut latest = ShardsCollectionFactory::from_cloud(cloud).with_io(io(&keys.latest));
        latest.fetch_by_indexes(collection.indexes()).map_err(|e| internal(e.to_string()))?;
        latest.fetch_meta().map_err(|e| internal(e.to_string()))?;

        debug!("writing difference");
        let mut difference = &*collection - &latest;
        difference.set_io(io(&keys.job_difference));
        difference.write_all().map_err(|e| internal(e.to_string()))?;

        debug!("writing latest state");
        let meta = collection.meta().clone();
        latest.update(collection);
        latest.update_meta(&meta);
        latest.write_all().map_err(|e| internal(e.to_string()))?;
        latest.write_meta().map_err(|e| internal(e.to_string()))?;
        Ok(())
    }

    /// Pre-authorizes licensed rule-sets through the license manager and
    /// pins the job's ruleset list to the exact versions it returned.
    fn licensed_ruleset_urls(&self, tenant: &Tenant, job: &mut Job) -> Result<Vec<String>, ExecutorError> {
        let parsed: Vec<RulesetName> = job
            .rulesets
            .iter()
            .filter_map(|raw| raw.parse::<RulesetName>().ok())
            .collect();
        let (licensed, standard): (Vec<&RulesetName>, Vec<&RulesetName>) =
            parsed.iter().partition(|name| name.license_key.is_some());
        if licensed.is_empty() {
            return Ok(vec![]);
        }
        let license_key = licensed[0].license_key.clone().unwrap_or_default();
        let denied = |reason: String| ExecutorError::LmDenied { reason };
        let license = self
            .services
            .licenses
            .get(&license_key)
            .ok_or_else(|| denied(format!("license {license_key} does not exist")))?;
        let tenant_license_key = license
            .tenant_license_key(&tenant.customer_name)
            .ok_or_else(|| denied(format!("customer {} holds no grant", tenant.customer_name)))?;

        debug!("going to license job '{}'", job.id);
        let names: Vec<String> = licensed
            .iter()
            .map(|name| RulesetName::new(name.name.clone(), name.version.clone(), None).to_string())
            .collect();
        let ruleset_map = std::collections::BTreeMap::from([(tenant_license_key.to_string(), names)]);
        let licensed_job = self
            .services
            .license_manager
            .post_job(&job.id, &tenant.customer_name, &tenant.name, &ruleset_map)
            .map_err(|err| denied(err.to_string()))?;
        info!("job {} was allowed", job.id);

        // the manager answers with pinned versions, keep the job row in sync
        let returned: Vec<RulesetName> = licensed_job
            .ruleset_content
            .keys()
            .filter_map(|id| id.parse::<RulesetName>().ok())
            .collect();
        job.rulesets = standard
            .iter()
            .map(|name| name.to_string())
            .chain(
                returned
                    .iter()
                    .map(|name| RulesetName::new(name.name.clone(), name.version.clone(), Some(license_key.clone())).to_string()),
            )
            .collect();
        let _ = self.services.jobs.update(job);

        Ok(licensed_job.ruleset_content.values().cloned().collect())
    }

    fn standard_ruleset_urls(&self, tenant: &Tenant, job: &Job) -> Vec<String> {
        let available = self.services.rulesets.iter_standard(&tenant.customer_name, tenant.cloud, true);
        job.rulesets
            .iter()
            .filter_map(|raw| raw.parse::<RulesetName>().ok())
            .filter(|name| name.license_key.is_none())
            .filter_map(|name| {
                available
                    .iter()
                    .find(|rs| {
                        rs.name == name.name && name.version.as_ref().is_none_or(|version| &rs.version == version)
                    })
                    .map(|rs| rs.source.clone())
            })
            .collect()
    }

    /// Tenant-level and customer-level exclusions are unioned.
    fn rules_to_exclude(&self, tenant: &Tenant) -> BTreeSet<String> {
        info!("querying excluded rules");
        let mut excluded = BTreeSet::new();
        let keys = [
            crate::persistence::settings_key(&[EXCLUDED_RULES_KEY, "customer", &tenant.customer_name]),
            crate::persistence::settings_key(&[EXCLUDED_RULES_KEY, "tenant", &tenant.name]),
        ];
        for key in keys {
            if let Some(value) = self.services.settings.get(&key)
                && let Some(rules) = value.get("rules").and_then(|r| r.as_array())
            {
                excluded.extend(rules.iter().filter_map(|r| r.as_str()).map(str::to_string));
            }
        }
        excluded
    }

    fn fetch_ruleset(&self, url: &str) -> Option<Vec<PolicyDescriptor>> {
        let raw: serde_json::Value = if url.starts_with("http://") || url.starts_with("https://") {
            match reqwest::blocking::get(url).and_then(|response| response.json()) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("cannot download rule-set from {url}: {err}");
                    return None;
                }
            }
        } else {
            let body = match self
                .services
                .object_storage
                .get_object(&self.services.config.rulesets_bucket, url)
            {
                Ok(Some(body)) => body,
                Ok(None) => {
                    warn!("rule-set object {url} does not exist");
                    return None;
                }
                Err(err) => {
                    warn!("cannot read rule-set object {url}: {err}");
                    return None;
                }
            };
            // packed rule-sets may or may not be gzipped
            let decoded = if body.starts_with(&[0x1f, 0x8b]) {
                use std::io::Read;
                let mut decoder = flate2::read::GzDecoder::new(body.as_slice());
                let mut raw = Vec::new();
                if let Err(err) = decoder.read_to_end(&mut raw) {
                    warn!("cannot decompress rule-set object {url}: {err}");
                    return None;
                }
                raw
            } else {
                body
            };
            match serde_json::from_slice(&decoded) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("rule-set object {url} is not valid json: {err}");
                    return None;
                }
            }
        };
        // packed rule-sets are either a bare list or {"policies": [...]}
        let descriptors = raw.get("policies").cloned().unwrap_or(raw);
        match serde_json::from_value(descriptors) {
            Ok(descriptors) => Some(descriptors),
            Err(err) => {
                warn!("rule-set {url} is malformed: {err}");
                None
            }
        }
    }

    fn get_policies(
        &self,
        urls: impl Iterator<Item = String>,
        keep: &BTreeSet<String>,
        exclude: &BTreeSet<String>,
    ) -> Vec<PolicyDescriptor> {
        let mut seen = BTreeSet::new();
        let mut result = Vec::new();
        for url in urls {
            let Some(descriptors) = self.fetch_ruleset(&url) else {
                continue;
            };
            for descriptor in descriptors {
                if exclude.contains(&descriptor.name) {
                    continue;
                }
                if !keep.is_empty() && !keep.contains(&descriptor.name) {
                    continue;
                }
                if seen.insert(descriptor.name.clone()) {
                    result.push(descriptor);
                }
            }
        }
        result
    }

    /// Both integration families are independent and failure-tolerant: a
    /// refused upload never fails the job.
    fn upload_to_siem(
        &self,
        tenant: &Tenant,
        collection: &ShardsCollection,
        job: &ScanJob,
        platform: Option<&Platform>,
    ) {
        for integration in self.services.integrations.dojo_adapters(tenant) {
            let convertor = ShardCollectionDojoConvertor::from_scan_type(&integration.configuration.scan_type);
            let configuration = integration.configuration.substitute_fields(job, platform);
            let request = crate::clients::dojo::ImportScanRequest {
                scan_type: configuration.scan_type,
                scan_date: Utc::now(),
                product_type_name: configuration.product_type,
                product_name: configuration.product,
                engagement_name: configuration.engagement,
                test_title: configuration.test,
                data: convertor.convert(collection),
                tags: job_tags(job),
            };
            if let Err(err) = integration.api.import_scan(&request) {
                error!("unexpected error occurred pushing to the defect tracker: {err}");
            }
        }
        for integration in self.services.integrations.udm_adapters(tenant) {
            debug!("going to push data to the UDM sink");
            let outcome = match integration.converter_type {
                UdmConverterType::Events => {
                    let events = ShardCollectionUdmEventsConvertor::convert(collection, tenant);
                    integration.api.create_udm_events(&events)
                }
                UdmConverterType::Entities => {
                    let entities = ShardCollectionUdmEntitiesConvertor::convert(collection, tenant);
                    integration.api.create_udm_entities(&entities, &integration.log_type)
                }
            };
            if let Err(err) = outcome {
                error!("unexpected error occurred pushing to the UDM sink: {err}");
            }
        }
    }

    fn multi_account_event_driven_job(&self, env: &ExecutorEnv) -> i32 {
        let mut code = EXIT_CODE_SUCCESS;
        for id in &env.envelope.batch_results_ids {
            info!("processing batch results with id {id}");
            let mut results = match self.services.batch_results.get(id) {
                Some(results) => results,
                None => {
                    warn!("batch results item {id} does not exist, skipping");
                    continue;
                }
            };
            if results.status == JobStatus::Succeeded {
                info!("batch results already succeeded, skipping");
                continue;
            }
            match self.batch_results_job(&mut results, env) {
                Ok(()) => {
                    info!("job for batch result {id} has finished");
                    results.status = JobStatus::Succeeded;
                    results.reason = None;
                }
                Err(err) => {
                    error!("executor exception occurred: {err}");
                    results.status = JobStatus::Failed;
                    results.reason = Some(err.to_string());
                    if matches!(err, ExecutorError::NoCredentials) {
                        // recoverable, the batch backend may retry
                        code = EXIT_CODE_RECOVERABLE;
                    }
                }
            }
            results.stopped_at = Some(Utc::now());
            info!("saving batch results item");
            self.services.batch_results.save(&results);
        }
        code
    }

    /// Event-driven scans stay in-process: the affected rule and region
    /// set is small, per-region isolation buys nothing here.
    fn batch_results_job(&self, results: &mut BatchResults, env: &ExecutorEnv) -> Result<(), ExecutorError> {
        let internal = |message: String| ExecutorError::Internal(message);
        let envelope = &env.envelope;
        let tenant = self
            .services
            .tenants
            .get(&results.tenant_name)
            .ok_or_else(|| internal(format!("tenant {} does not exist", results.tenant_name)))?;
        let cloud = tenant.cloud;

        let resolver = self.services.credentials_resolver();
        let credentials = resolver
            .resolve(&tenant, envelope.credentials_key.as_deref(), Some(results))
            .map_err(|err| {
                warn!("{err}");
                ExecutorError::NoCredentials
            })?;

        let ruleset = self
            .services
            .rulesets
            .event_driven(cloud)
            .ok_or_else(|| internal(format!("no event-driven rule-set for {cloud}")))?;
        let keep = results.all_rules();
        let exclude = self.rules_to_exclude(&tenant);
        let descriptors = self.get_policies(std::iter::once(ruleset.source), &keep, &exclude);

        let work_dir = tempfile::tempdir().map_err(|e| internal(e.to_string()))?;
        let started_at = Utc::now();
        let deadline = self.deadline(None, envelope.job_lifetime_min);

        let mut env_frame = credentials.as_env_vars();
        env_frame.push((AWS_DEFAULT_REGION_ENV.to_string(), self.services.config.aws_region.clone()));
        let _scoped = ScopedEnvironment::new(&env_frame);

        let loader = PoliciesLoader::new(self.engine, cloud, work_dir.path(), env.target_regions(), true);
        let policies = loader.load_from_regions_to_rules(&descriptors, &results.regions_to_rules);
        let mut runner = Runner::new(cloud, deadline);
        runner.start(policies);
        let failed = runner.failed();

        let result = JobResult::new(work_dir.path(), cloud);
        let keys_builder = TenantReportsKeysBuilder::new(&tenant);
        let keys = ReportKeys {
            job_result: keys_builder.job_result(&results.id),
            job_difference: keys_builder.job_difference(&results.id),
            latest: keys_builder.latest(),
        };

        let mut collection = ShardsCollectionFactory::from_cloud(cloud);
        collection.put_parts(result.iter_shard_parts());
        collection.set_meta(result.rules_meta());

        info!("going to upload to SIEM");
        self.upload_to_siem(&tenant, &collection, &ScanJob::EventDriven(results), None);

        self.write_reports(&mut collection, cloud, &keys)?;

        info!("writing statistics");
        let statistics = result.statistics(&tenant.name, Some(started_at), Some(Utc::now()), &failed);
        gz_put_json(
            self.services.object_storage.as_ref(),
            &self.services.config.statistics_bucket,
            &StatisticsKeysBuilder::batch_results_statistics(results),
            &serde_json::to_value(&statistics).map_err(|e| internal(e.to_string()))?,
        )
        .map_err(|e| internal(e.to_string()))?;
        Ok(())
    }
}

/// Exports a set of environment variables for the lifetime of the value
/// and restores the previous state on drop. The worker is single-threaded
/// at this point, nothing else reads the environment concurrently.
pub struct ScopedEnvironment {
    saved: Vec<(String, Option<String>)>,
}

impl ScopedEnvironment {
    pub fn new(vars: &[(String, String)]) -> ScopedEnvironment {
        let mut saved = Vec::with_capacity(vars.len());
        for (key, value) in vars {
            saved.push((key.clone(), std::env::var(key).ok()));
            unsafe { std::env::set_var(key, value) };
        }
        ScopedEnvironment { saved }
    }
}

impl Drop for ScopedEnvironment {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..) {
            match previous {
                Some(value) => unsafe { std::env::set_var(&key, value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}
