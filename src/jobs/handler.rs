use crate::clients::sts::{AwsApiCredentials, StsClient};
use crate::constants::{AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN, LICENSED_RULESET_TAG, MULTIREGION};
use crate::errors::ApiError;
use crate::io_models::JobDto;
use crate::io_models::envelope::{JobEnvelope, JobType, TargetRuleset};
use crate::io_models::requests::*;
use crate::jobs::assemble::{AssembleService, EnvelopeOptions, sanitize_job_name};
use crate::jobs::lock::TenantSettingJobLock;
use crate::jobs::scheduler::SchedulerService;
use crate::jobs::service::{JobService, NewJob};
use crate::license::LicenseService;
use crate::models::Cloud;
use crate::models::license::License;
use crate::models::platform::Platform;
use crate::models::regions;
use crate::models::ruleset::{Ruleset, RulesetName};
use crate::models::tenant::Tenant;
use crate::services::Services;
use itertools::Itertools;
use std::collections::BTreeSet;
use uuid::Uuid;

/// The job submission & lifecycle controller. One method per endpoint;
/// the HTTP layer maps `ApiError::kind` to a status code.
pub struct JobHandler<'a> {
    services: &'a Services,
}

impl<'a> JobHandler<'a> {
    pub fn new(services: &'a Services) -> Self {
        JobHandler { services }
    }

    fn job_service(&self) -> JobService<'a> {
        JobService {
            jobs: self.services.jobs.as_ref(),
            config: &self.services.config,
        }
    }

    fn license_service(&self) -> LicenseService<'a> {
        LicenseService {
            licenses: self.services.licenses.as_ref(),
            parents: self.services.parents.as_ref(),
            applications: self.services.applications.as_ref(),
        }
    }

    fn scheduler_service(&self) -> SchedulerService<'a> {
        SchedulerService {
            store: self.services.scheduled_jobs.as_ref(),
        }
    }

    fn assemble_service(&self) -> AssembleService<'a> {
        AssembleService {
            config: &self.services.config,
        }
    }

    fn obtain_tenant(&self, tenant_name: &str, customer: Option<&str>) -> Result<Tenant, ApiError> {
        let tenant = self.services.tenants.get(tenant_name);
        match tenant {
            Some(tenant) if tenant.active && customer.is_none_or(|c| tenant.customer_name == c) => Ok(tenant),
            _ => Err(ApiError::not_found(format!("Active tenant `{tenant_name}` not found"))),
        }
    }

    fn ensure_cloud_allowed(&self, tenant: &Tenant) -> Result<(), ApiError> {
        if !self.services.config.allowed_clouds.contains(&tenant.cloud) {
            let message = format!("Scan for `{}` is not allowed", tenant.cloud);
            info!("{message}");
            return Err(ApiError::forbidden(message));
        }
        Ok(())
    }

    fn ensure_not_locked(&self, tenant_name: &str) -> Result<(), ApiError> {
        if self.services.config.allow_simultaneous_jobs {
            return Ok(());
        }
        let lock = TenantSettingJobLock::new(tenant_name, self.services.settings.as_ref());
        if let Some(holder) = lock.locked_by() {
            return Err(ApiError::forbidden(format!(
                "Job {} is already running for tenant {tenant_name}",
                holder.job_id
            )));
        }
        Ok(())
    }

    fn ensure_no_cooldown(&self, tenant_name: &str) -> Result<(), ApiError> {
        if let Some(left) = self.job_service().last_scan_cooldown_left(tenant_name) {
            return Err(ApiError::forbidden(format!(
                "This tenant can be scanned after {}s",
                left.num_seconds().max(0)
            )));
        }
        Ok(())
    }

    /// Validates supplied credentials against the tenant identity, then
    /// stages them to the secret store. Azure has no reliable identity
    /// check in its credentials, so it passes through unchecked.
    fn stage_credentials(
        &self,
        tenant: &Tenant,
        credentials: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Option<String>, ApiError> {
        let credentials = match credentials {
            Some(credentials) => credentials,
            None => return Ok(None),
        };
        if !self.services.config.skip_cloud_identifier_validation {
            info!("validating cloud identifier");
            self.validate_cloud_identifier(tenant, credentials)?;
        }
        let key = format!("{}-credentials-{}", tenant.name, &Uuid::new_v4().to_string()[..8]);
        let raw = serde_json::Value::Object(credentials.clone()).to_string();
        self.services
            .secrets
            .save_secret(&key, &raw)
            .map_err(|err| ApiError::upstream_unavailable(format!("cannot stage credentials: {err}")))?;
        Ok(Some(key))
    }

    fn validate_cloud_identifier(
        &self,
        tenant: &Tenant,
        credentials: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ApiError> {
        let mismatch = || {
            ApiError::validation(
                "Target account identifier didn't match with one provided in the credentials. \
                 Check your credentials and try again.",
            )
        };
        let get = |key: &str| credentials.get(key).and_then(|v| v.as_str()).map(str::to_string);
        match tenant.cloud {
            Cloud::Aws => {
                let access_key_id = get(AWS_ACCESS_KEY_ID)
                    .ok_or_else(|| ApiError::validation("Invalid AWS credentials provided."))?;
                let secret_access_key = get(AWS_SECRET_ACCESS_KEY)
                    .ok_or_else(|| ApiError::validation("Invalid AWS credentials provided."))?;
                let sts = StsClient::from_keys(
                    AwsApiCredentials {
                        access_key_id,
                        secret_access_key,
                        session_token: get(AWS_SESSION_TOKEN),
                    },
                    &self.services.config.aws_region,
                );
                let account = sts.get_caller_identity_account().map_err(|err| {
                    warn!("invalid AWS credentials provided: {err}");
                    ApiError::validation("Invalid AWS credentials provided.")
                })?;
                if account != tenant.project {
                    return Err(mismatch());
                }
                Ok(())
            }
            Cloud::Google => {
                if get("project_id").as_deref() != Some(tenant.project.as_str()) {
                    return Err(mismatch());
                }
                Ok(())
            }
            // no validator exists for Azure credentials
            Cloud::Azure | Cloud::Kubernetes => Ok(()),
        }
    }

    /// GCP cannot scan individual regions; everything else must be a
    /// subset of the tenant's active regions, defaulting to all of them.
    fn resolve_regions_to_scan(&self, target_regions: &BTreeSet<String>, tenant: &Tenant) -> Result<BTreeSet<String>, ApiError> {
        if tenant.cloud == Cloud::Google {
            return Ok(BTreeSet::from([MULTIREGION.to_string()]));
        }
        let unknown: Vec<&String> = target_regions
            .iter()
            .filter(|r| !regions::is_known_region(tenant.cloud, r))
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::validation(format!(
                "Regions: {} do not exist in {}",
                unknown.iter().join(", "),
                tenant.cloud
            )));
        }
        let missing: Vec<&String> = target_regions.iter().filter(|r| !tenant.regions.contains(*r)).collect();
        if !missing.is_empty() {
            return Err(ApiError::validation(format!(
                "Regions: {} not active in tenant: {}",
                missing.iter().join(", "),
                tenant.name
            )));
        }
        if target_regions.is_empty() {
            return Ok(tenant.regions.clone());
        }
        Ok(target_regions.clone())
    }

    fn retrieve_standard_rulesets(&self, tenant: &Tenant, names: &BTreeSet<String>) -> Vec<Ruleset> {
        let all = self
            .services
            .rulesets
            .iter_standard(&tenant.customer_name, tenant.cloud, true);
        if names.is_empty() {
            return all;
        }
        all.into_iter().filter(|rs| names.contains(&rs.name)).collect()
    }

    /// Licensed rule-set selection: everything the license grants for the
    /// scan domain, optionally narrowed by name.
    fn retrieve_licensed_rulesets(
        &self,
        license: &License,
        tenant_license_key: &str,
        domain: Cloud,
        names: &BTreeSet<String>,
    ) -> (Vec<String>, Vec<String>, Vec<Ruleset>) {
        let rulesets: Vec<Ruleset> = self
            .services
            .rulesets
            .by_license_manager_ids(&license.ruleset_ids)
            .into_iter()
            .filter(|rs| rs.cloud == domain)
            .filter(|rs| names.is_empty() || names.contains(&rs.name))
            .collect();
        let licensed: Vec<String> = rulesets
            .iter()
            .filter_map(|rs| rs.license_manager_id.as_ref())
            .map(|id| format!("{LICENSED_RULESET_TAG}:{id}"))
            .collect();
        let affected = vec![tenant_license_key.to_string()];
        (affected, licensed, rulesets)
    }

    fn ensure_job_is_allowed(&self, tenant: &Tenant, tenant_license_key: &str) -> Result<(), ApiError> {
        info!("going to check for permission to exhaust {tenant_license_key}");
        if !self.services.license_manager.is_allowed_to_license_a_job(
            &tenant.customer_name,
            &tenant.name,
            &[tenant_license_key.to_string()],
        ) {
            return Err(ApiError::forbidden(format!(
                "Tenant:'{}' could not be granted to start a licensed job.",
                tenant.name
            )));
        }
        info!("tenant '{}' has been granted permission to submit a licensed job", tenant.name);
        Ok(())
    }

    /// Resolves requested rule names against the license's rule universe:
    /// exact ids, else a unique prefix. Offenders are enumerated.
    fn resolve_rules_to_scan(&self, rules_to_scan: &[String], rulesets: &[Ruleset], cloud: Cloud) -> Result<Vec<String>, ApiError> {
        if rules_to_scan.is_empty() {
            return Ok(vec![]);
        }
        let available: BTreeSet<&str> = rulesets.iter().flat_map(|rs| rs.rules.iter()).map(String::as_str).collect();
        let mut resolved = Vec::new();
        let mut not_resolved = Vec::new();
        for rule in rules_to_scan {
            if available.contains(rule.as_str()) {
                resolved.push(rule.clone());
                continue;
            }
            match available.iter().find(|id| id.starts_with(rule.as_str())) {
                Some(id) => resolved.push((*id).to_string()),
                None => not_resolved.push(rule.clone()),
            }
        }
        if !not_resolved.is_empty() {
            return Err(ApiError::validation(format!(
                "These rules are not allowed by your {cloud} license: {}",
                not_resolved.iter().join(", ")
            )));
        }
        Ok(resolved)
    }

    /// The shared tail of every submission: batch submit, job row, lock.
    /// The lock is the last side-effect; a refused batch submit leaves no
    /// state behind.
    fn submit_batch_job(
        &self,
        tenant: &Tenant,
        user_id: &str,
        envelope: JobEnvelope,
        job_rulesets: Vec<String>,
        rules_to_scan: Vec<String>,
        platform_id: Option<String>,
    ) -> Result<JobDto, ApiError> {
        let job_name = sanitize_job_name(&format!(
            "{}-{}-{}",
            tenant.name,
            user_id,
            envelope.submitted_at.timestamp()
        ));
        debug!("going to submit batch job with name {job_name}");

        let submitted = self
            .services
            .batch
            .submit_job(&job_name, &envelope.to_env())
            .map_err(|err| ApiError::upstream_unavailable(format!("Batch backend failed to respond: {err}")))?;

        let job = self.job_service().create(NewJob {
            id: submitted.id.clone(),
            tenant_name: tenant.name.clone(),
            customer_name: tenant.customer_name.clone(),
            owner: user_id.to_string(),
            submitted_at: envelope.submitted_at,
            platform_id,
            rulesets: job_rulesets,
            rules_to_scan,
        });

        if !self.services.config.allow_simultaneous_jobs {
            let lock = TenantSettingJobLock::new(&tenant.name, self.services.settings.as_ref());
            if let Err(holder) = lock.acquire(&job.id, None) {
                let mut job = job;
                self.job_service()
                    .set_failed(&mut job, format!("Lost the tenant lock to job {}", holder.job_id));
                let _ = self.services.batch.terminate_job(&job.id, "tenant lock conflict");
                return Err(ApiError::forbidden(format!(
                    "Job {} is already running for tenant {}",
                    holder.job_id, tenant.name
                )));
            }
        }

        Ok(JobDto::from_job(&job, true))
    }

    /// POST /jobs/standard, not-licensed rule-sets only.
    pub fn post_standard(&self, request: &SubmitStandardJobRequest) -> Result<JobDto, ApiError> {
        let tenant = self.obtain_tenant(&request.tenant_name, request.customer.as_deref())?;
        let credentials_key = self.stage_credentials(&tenant, request.credentials.as_ref())?;
        self.ensure_cloud_allowed(&tenant)?;
        self.ensure_not_locked(&tenant.name)?;
        self.ensure_no_cooldown(&tenant.name)?;

        let regions_to_scan = self.resolve_regions_to_scan(&request.target_regions, &tenant)?;
        let rulesets = self.retrieve_standard_rulesets(&tenant, &request.target_rulesets);
        if rulesets.is_empty() {
            return Err(ApiError::not_found("No standard rule-sets found"));
        }
        let target_rulesets: Vec<TargetRuleset> = rulesets
            .iter()
            .map(|rs| TargetRuleset {
                id: rs.id.clone(),
                name: rs.name.clone(),
                version: rs.version.clone(),
            })
            .collect();
        let job_rulesets = rulesets
            .iter()
            .map(|rs| RulesetName::new(rs.name.clone(), Some(rs.version.clone()), None).to_string())
            .collect();

        let envelope = self.assemble_service().build_job_envelope(
            &tenant,
            EnvelopeOptions {
                target_regions: regions_to_scan.into_iter().collect(),
                target_rulesets,
                credentials_key,
                ..EnvelopeOptions::default()
            },
        );
        self.submit_batch_job(&tenant, &request.user_id, envelope, job_rulesets, vec![], None)
    }

    /// POST /jobs, licensed rule-sets. The main business case.
    pub fn post_licensed(&self, request: &SubmitLicensedJobRequest) -> Result<JobDto, ApiError> {
        let tenant = self.obtain_tenant(&request.tenant_name, request.customer.as_deref())?;
        let credentials_key = self.stage_credentials(&tenant, request.credentials.as_ref())?;
        self.ensure_cloud_allowed(&tenant)?;
        self.ensure_not_locked(&tenant.name)?;
        self.ensure_no_cooldown(&tenant.name)?;

        let regions_to_scan = self.resolve_regions_to_scan(&request.target_regions, &tenant)?;
        let tenant_license = self
            .license_service()
            .resolve_tenant_license(&tenant, tenant.cloud.as_str())?;
        self.ensure_job_is_allowed(&tenant, &tenant_license.tenant_license_key)?;

        let (affected_licenses, licensed_rulesets, rulesets) = self.retrieve_licensed_rulesets(
            &tenant_license.license,
            &tenant_license.tenant_license_key,
            tenant.cloud,
            &request.target_rulesets,
        );
        if licensed_rulesets.is_empty() {
            return Err(ApiError::validation("No rule-sets found in license"));
        }
        let rules_to_scan = self.resolve_rules_to_scan(&request.rules_to_scan, &rulesets, tenant.cloud)?;
        let job_rulesets = rulesets
            .iter()
            .map(|rs| {
                RulesetName::new(
                    rs.name.clone(),
                    Some(rs.version.clone()),
                    Some(tenant_license.license.key.clone()),
                )
                .to_string()
            })
            .collect();

        let envelope = self.assemble_service().build_job_envelope(
            &tenant,
            EnvelopeOptions {
                target_regions: regions_to_scan.into_iter().collect(),
                licensed_rulesets,
                affected_licenses,
                credentials_key,
                ..EnvelopeOptions::default()
            },
        );
        self.submit_batch_job(&tenant, &request.user_id, envelope, job_rulesets, rules_to_scan, None)
    }

    /// POST /jobs/k8s, the licensed flow against the KUBERNETES domain.
    pub fn post_k8s(&self, request: &SubmitK8sJobRequest) -> Result<JobDto, ApiError> {
        let parent = self.services.parents.get(&request.platform_id);
        let parent = match parent {
            Some(parent)
                if !parent.is_deleted && request.customer.as_deref().is_none_or(|c| parent.customer_id == c) =>
            {
                parent
            }
            _ => {
                return Err(ApiError::not_found(format!(
                    "Active platform: {} not found",
                    request.platform_id
                )));
            }
        };
        let platform = Platform::from_parent(&parent).map_err(ApiError::validation)?;
        let tenant = self.obtain_tenant(&platform.tenant_name, request.customer.as_deref())?;
        self.ensure_not_locked(&tenant.name)?;

        let tenant_license = self
            .license_service()
            .resolve_tenant_license(&tenant, Cloud::Kubernetes.as_str())?;
        self.ensure_job_is_allowed(&tenant, &tenant_license.tenant_license_key)?;

        let (affected_licenses, licensed_rulesets, rulesets) = self.retrieve_licensed_rulesets(
            &tenant_license.license,
            &tenant_license.tenant_license_key,
            Cloud::Kubernetes,
            &request.target_rulesets,
        );
        if licensed_rulesets.is_empty() {
            return Err(ApiError::validation("No rule-sets found in license"));
        }
        let credentials_key = match &request.token {
            Some(token) => {
                debug!("temp token was provided, saving to the secret store");
                let key = format!("{}-token-{}", tenant.name, &Uuid::new_v4().to_string()[..8]);
                self.services
                    .secrets
                    .save_secret(&key, token)
                    .map_err(|err| ApiError::upstream_unavailable(format!("cannot stage token: {err}")))?;
                Some(key)
            }
            None => None,
        };
        let job_rulesets = rulesets
            .iter()
            .map(|rs| {
                RulesetName::new(
                    rs.name.clone(),
                    Some(rs.version.clone()),
                    Some(tenant_license.license.key.clone()),
                )
                .to_string()
            })
            .collect();

        let envelope = self.assemble_service().build_job_envelope(
            &tenant,
            EnvelopeOptions {
                licensed_rulesets,
                affected_licenses,
                credentials_key,
                platform_id: Some(platform.id.clone()),
                ..EnvelopeOptions::default()
            },
        );
        self.submit_batch_job(
            &tenant,
            &request.user_id,
            envelope,
            job_rulesets,
            vec![],
            Some(platform.id),
        )
    }

    /// GET /jobs
    pub fn query(&self, request: &QueryJobsRequest) -> Vec<JobDto> {
        let with_customer = request.customer.is_none();
        self.job_service()
            .list(request.customer.as_deref(), &request.tenants, request.limit)
            .iter()
            .map(|job| JobDto::from_job(job, with_customer))
            .collect()
    }

    /// GET /jobs/{job_id}. Historically an empty list, not a 404.
    pub fn get(&self, request: &GetJobRequest) -> Vec<JobDto> {
        let service = self.job_service();
        match service.get(&request.job_id) {
            Some(job) if service.is_allowed(&job, request.customer.as_deref(), &request.tenants) => {
                vec![JobDto::from_job(&job, true)]
            }
            _ => vec![],
        }
    }

    /// DELETE /jobs/{job_id}
    pub fn delete(&self, request: &TerminateJobRequest) -> Result<String, ApiError> {
        let service = self.job_service();
        let mut job = match service.get(&request.job_id) {
            Some(job) if service.is_allowed(&job, request.customer.as_deref(), &request.tenants) => job,
            _ => {
                return Err(ApiError::not_found(format!(
                    "Job with id '{}' was not found",
                    request.job_id
                )));
            }
        };
        if job.status.is_terminal() {
            let message = format!("Can not terminate job with status {}", job.status);
            warn!("{message}");
            return Err(ApiError::validation(message));
        }

        let reason = format!(
            "Initiated by user '{}' (customer '{}')",
            request.user_id,
            request.customer.as_deref().unwrap_or("SYSTEM")
        );
        service.set_failed(&mut job, reason.clone());
        TenantSettingJobLock::new(&job.tenant_name, self.services.settings.as_ref()).release();

        info!("going to terminate job with id '{}'", request.job_id);
        let _ = self.services.batch.terminate_job(&request.job_id, &reason);
        Ok(format!("The job with id '{}' will be terminated", request.job_id))
    }

    /// POST /scheduled-job
    pub fn post_scheduled(&self, request: &RegisterScheduledJobRequest) -> Result<crate::io_models::ScheduledJobDto, ApiError> {
        let tenant = self.obtain_tenant(&request.tenant_name, request.customer.as_deref())?;
        self.ensure_cloud_allowed(&tenant)?;
        let regions_to_scan = self.resolve_regions_to_scan(&request.target_regions, &tenant)?;

        let tenant_license = self
            .license_service()
            .resolve_tenant_license(&tenant, tenant.cloud.as_str())?;
        let (affected_licenses, licensed_rulesets, rulesets) = self.retrieve_licensed_rulesets(
            &tenant_license.license,
            &tenant_license.tenant_license_key,
            tenant.cloud,
            &request.target_rulesets,
        );
        if licensed_rulesets.is_empty() {
            return Err(ApiError::validation("No rule-sets found in license"));
        }

        let envelope = self.assemble_service().build_job_envelope(
            &tenant,
            EnvelopeOptions {
                target_regions: regions_to_scan.into_iter().collect(),
                target_rulesets: rulesets
                    .iter()
                    .map(|rs| TargetRuleset {
                        id: rs.id.clone(),
                        name: rs.name.clone(),
                        version: rs.version.clone(),
                    })
                    .collect(),
                licensed_rulesets,
                affected_licenses,
                job_type: JobType::Scheduled,
                ..EnvelopeOptions::default()
            },
        );
        let job = self
            .scheduler_service()
            .register(&tenant, &request.schedule, &envelope, request.name.clone())?;
        Ok(crate::io_models::ScheduledJobDto::from(&job))
    }

    /// GET /scheduled-job
    pub fn query_scheduled(&self, request: &QueryScheduledJobsRequest) -> Vec<crate::io_models::ScheduledJobDto> {
        let scheduler = self.scheduler_service();
        match &request.name {
            Some(name) => scheduler
                .get(name, request.customer.as_deref(), &request.tenants)
                .map(|job| vec![crate::io_models::ScheduledJobDto::from(&job)])
                .unwrap_or_default(),
            None => scheduler.list(request.customer.as_deref(), &request.tenants),
        }
    }

    /// DELETE /scheduled-job/{name}
    pub fn delete_scheduled(&self, request: &QueryScheduledJobsRequest) -> Result<(), ApiError> {
        let name = request
            .name
            .as_deref()
            .ok_or_else(|| ApiError::validation("scheduled job name is required"))?;
        let scheduler = self.scheduler_service();
        if scheduler.get(name, request.customer.as_deref(), &request.tenants).is_none() {
            return Err(ApiError::not_found(format!("Scheduled job {name} not found")));
        }
        scheduler.deregister(name);
        Ok(())
    }

    /// PATCH /scheduled-job/{name}
    pub fn patch_scheduled(&self, request: &PatchScheduledJobRequest) -> Result<crate::io_models::ScheduledJobDto, ApiError> {
        let scheduler = self.scheduler_service();
        let mut job = scheduler
            .get(&request.name, request.customer.as_deref(), &request.tenants)
            .ok_or_else(|| ApiError::not_found(format!("Scheduled job {} not found", request.name)))?;
        scheduler.update(&mut job, request.enabled, request.schedule.clone())?;
        Ok(crate::io_models::ScheduledJobDto::from(&job))
    }
}
