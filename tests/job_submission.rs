use maplit::hashmap;
use sentinel_engine::clients::batch::RecordingBatchClient;
use sentinel_engine::clients::license_manager::StaticLicenseManagerClient;
use sentinel_engine::config::Config;
use sentinel_engine::constants::{ENV_LICENSED_RULESETS, ENV_TARGET_REGIONS, ENV_TARGET_RULESETS};
use sentinel_engine::errors::ApiErrorKind;
use sentinel_engine::io_models::envelope::TargetRuleset;
use sentinel_engine::io_models::requests::*;
use sentinel_engine::jobs::handler::JobHandler;
use sentinel_engine::jobs::lock::TenantSettingJobLock;
use sentinel_engine::models::license::{CustomerLicenseGrant, License};
use sentinel_engine::models::ruleset::Ruleset;
use sentinel_engine::models::tenant::{Application, Parent, ParentType, Tenant};
use sentinel_engine::models::{Cloud, JobStatus};
use sentinel_engine::persistence::memory::*;
use sentinel_engine::services::{Services, ServicesBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn tenant(name: &str, cloud: Cloud, regions: &[&str]) -> Tenant {
    Tenant {
        name: name.to_string(),
        customer_name: "ACME".to_string(),
        cloud,
        project: "123456789012".to_string(),
        active: true,
        regions: regions.iter().map(|r| r.to_string()).collect(),
        parent_map: hashmap! {ParentType::CustodianLicenses => format!("p-lic-{name}")},
        management_parent_id: None,
    }
}

fn licensing_entities(tenant_name: &str, domain: &str) -> (Parent, Application) {
    let parent = Parent {
        id: format!("p-lic-{tenant_name}"),
        customer_id: "ACME".to_string(),
        tenant_name: tenant_name.to_string(),
        type_: ParentType::CustodianLicenses,
        application_id: format!("app-lic-{tenant_name}"),
        is_deleted: false,
        meta: serde_json::Value::Null,
    };
    let application = Application {
        id: format!("app-lic-{tenant_name}"),
        customer_id: "ACME".to_string(),
        secret: None,
        credentials: None,
        license_keys: hashmap! {domain.to_string() => "lk-1".to_string()},
    };
    (parent, application)
}

fn license() -> License {
    License {
        key: "lk-1".to_string(),
        expiration: Some(chrono::Utc::now() + chrono::Duration::days(30)),
        ruleset_ids: vec!["lm-7".to_string()],
        customers: hashmap! {
            "ACME".to_string() => CustomerLicenseGrant {
                tenant_license_key: "tlk-1".to_string(),
            },
        },
    }
}

fn standard_ruleset(cloud: Cloud) -> Ruleset {
    Ruleset {
        id: "rs-1".to_string(),
        customer: "ACME".to_string(),
        name: "base".to_string(),
        version: "1".to_string(),
        cloud,
        licensed: false,
        license_manager_id: None,
        source: "rulesets/base-1.json".to_string(),
        active: true,
        event_driven: false,
        rules: vec!["rule-aws-001".to_string()],
    }
}

fn licensed_ruleset(cloud: Cloud) -> Ruleset {
    Ruleset {
        id: "rs-2".to_string(),
        customer: "ACME".to_string(),
        name: "full".to_string(),
        version: "2".to_string(),
        cloud,
        licensed: true,
        license_manager_id: Some("lm-7".to_string()),
        source: "rulesets/full-2.json".to_string(),
        active: true,
        event_driven: false,
        rules: vec!["rule-aws-001".to_string(), "rule-aws-002".to_string()],
    }
}

struct Fixture {
    services: Services,
    batch: Arc<RecordingBatchClient>,
}

fn fixture(tenants: Vec<Tenant>, config: Config, lm_allows: bool) -> Fixture {
    let batch = Arc::new(RecordingBatchClient::default());
    let cloud = tenants.first().map(|t| t.cloud).unwrap_or(Cloud::Aws);
    let mut parents = Vec::new();
    let mut applications = Vec::new();
    for tenant in &tenants {
        let (parent, application) = licensing_entities(&tenant.name, cloud.as_str());
        parents.push(parent);
        applications.push(application);
    }

    let services = ServicesBuilder::new(config)
        .tenants(Arc::new(InMemoryTenantStore::with(tenants)))
        .parents(Arc::new(InMemoryParentStore::with(parents)))
        .applications(Arc::new(InMemoryApplicationStore::with(applications)))
        .rulesets(Arc::new(InMemoryRulesetStore::with([
            standard_ruleset(cloud),
            licensed_ruleset(cloud),
        ])))
        .licenses(Arc::new(InMemoryLicenseStore::with([license()])))
        .license_manager(Arc::new(if lm_allows {
            StaticLicenseManagerClient::allowing(BTreeMap::from([(
                "full:2".to_string(),
                "https://packs.example/full-2.json".to_string(),
            )]))
        } else {
            StaticLicenseManagerClient::denying()
        }))
        .batch(batch.clone())
        .build();
    Fixture { services, batch }
}

fn standard_request(tenant_name: &str) -> SubmitStandardJobRequest {
    SubmitStandardJobRequest {
        customer: Some("ACME".to_string()),
        tenant_name: tenant_name.to_string(),
        user_id: "ops".to_string(),
        target_rulesets: BTreeSet::new(),
        target_regions: BTreeSet::new(),
        credentials: None,
    }
}

#[test]
fn happy_aws_standard_submission() {
    let fixture = fixture(
        vec![tenant("t1", Cloud::Aws, &["us-east-1", "eu-west-1"])],
        Config::default(),
        true,
    );
    let handler = JobHandler::new(&fixture.services);

    let dto = handler.post_standard(&standard_request("t1")).unwrap();
    assert_eq!(dto.status, JobStatus::Submitted);
    assert_eq!(dto.rulesets, vec!["base:1".to_string()]);

    let submitted = fixture.batch.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    let (job_name, envs) = &submitted[0];
    assert!(job_name.starts_with("t1-ops-"));
    assert_eq!(envs[ENV_TARGET_REGIONS], "eu-west-1,us-east-1");
    let triples: Vec<TargetRuleset> = serde_json::from_str(&envs[ENV_TARGET_RULESETS]).unwrap();
    assert_eq!(triples.len(), 1);
    assert_eq!((triples[0].name.as_str(), triples[0].version.as_str()), ("base", "1"));

    // the job row exists and the tenant is locked
    assert!(fixture.services.jobs.get(&dto.id).is_some());
    let lock = TenantSettingJobLock::new("t1", fixture.services.settings.as_ref());
    assert_eq!(lock.locked_by().unwrap().job_id, dto.id);
}

#[test]
fn gcp_submission_collapses_regions_to_multiregion() {
    let fixture = fixture(
        vec![tenant("t2", Cloud::Google, &["us-central1", "europe-west1"])],
        Config::default(),
        true,
    );
    let handler = JobHandler::new(&fixture.services);

    let request = SubmitLicensedJobRequest {
        customer: Some("ACME".to_string()),
        tenant_name: "t2".to_string(),
        user_id: "ops".to_string(),
        target_rulesets: BTreeSet::new(),
        target_regions: BTreeSet::new(),
        rules_to_scan: vec![],
        credentials: None,
    };
    handler.post_licensed(&request).unwrap();

    let submitted = fixture.batch.submitted.lock().unwrap();
    assert_eq!(submitted[0].1[ENV_TARGET_REGIONS], "multiregion");
    assert_eq!(submitted[0].1[ENV_LICENSED_RULESETS], "0:lm-7");
}

#[test]
fn license_denial_leaves_no_state_behind() {
    let fixture = fixture(
        vec![tenant("t1", Cloud::Aws, &["eu-west-1"])],
        Config::default(),
        false,
    );
    let handler = JobHandler::new(&fixture.services);

    let request = SubmitLicensedJobRequest {
        customer: Some("ACME".to_string()),
        tenant_name: "t1".to_string(),
        user_id: "ops".to_string(),
        target_rulesets: BTreeSet::new(),
        target_regions: BTreeSet::new(),
        rules_to_scan: vec![],
        credentials: None,
    };
    let err = handler.post_licensed(&request).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Forbidden);

    assert!(fixture.batch.submitted.lock().unwrap().is_empty());
    assert!(fixture.services.jobs.list(None, &BTreeSet::new(), None).is_empty());
    assert!(!TenantSettingJobLock::new("t1", fixture.services.settings.as_ref()).is_locked());
}

#[test]
fn held_lock_forbids_submission() {
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], Config::default(), true);
    TenantSettingJobLock::new("t1", fixture.services.settings.as_ref())
        .acquire("other-job", None)
        .unwrap();

    let handler = JobHandler::new(&fixture.services);
    let err = handler.post_standard(&standard_request("t1")).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Forbidden);
    assert!(err.message.contains("other-job"));
}

#[test]
fn simultaneous_jobs_flag_disables_the_lock() {
    let config = Config {
        allow_simultaneous_jobs: true,
        ..Config::default()
    };
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], config, true);
    let handler = JobHandler::new(&fixture.services);

    handler.post_standard(&standard_request("t1")).unwrap();
    handler.post_standard(&standard_request("t1")).unwrap();
    assert_eq!(fixture.batch.submitted.lock().unwrap().len(), 2);
}

#[test]
fn cooldown_rejects_with_remaining_duration() {
    let config = Config {
        last_scan_threshold_seconds: Some(3600),
        ..Config::default()
    };
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], config, true);
    let handler = JobHandler::new(&fixture.services);

    let dto = handler.post_standard(&standard_request("t1")).unwrap();
    let mut job = fixture.services.jobs.get(&dto.id).unwrap();
    job.status = JobStatus::Succeeded;
    fixture.services.jobs.save(&job);
    TenantSettingJobLock::new("t1", fixture.services.settings.as_ref()).release();

    let err = handler.post_standard(&standard_request("t1")).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Forbidden);
    assert!(err.message.contains("can be scanned after"));
}

#[test]
fn refused_batch_submit_acquires_nothing() {
    let batch = Arc::new(RecordingBatchClient::refusing());
    let services = ServicesBuilder::new(Config::default())
        .tenants(Arc::new(InMemoryTenantStore::with([tenant(
            "t1",
            Cloud::Aws,
            &["eu-west-1"],
        )])))
        .rulesets(Arc::new(InMemoryRulesetStore::with([standard_ruleset(Cloud::Aws)])))
        .batch(batch)
        .build();
    let handler = JobHandler::new(&services);

    let err = handler.post_standard(&standard_request("t1")).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::UpstreamUnavailable);
    assert!(services.jobs.list(None, &BTreeSet::new(), None).is_empty());
    assert!(!TenantSettingJobLock::new("t1", services.settings.as_ref()).is_locked());
}

#[test]
fn unknown_rules_to_scan_are_enumerated() {
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], Config::default(), true);
    let handler = JobHandler::new(&fixture.services);

    let request = SubmitLicensedJobRequest {
        customer: Some("ACME".to_string()),
        tenant_name: "t1".to_string(),
        user_id: "ops".to_string(),
        target_rulesets: BTreeSet::new(),
        target_regions: BTreeSet::new(),
        rules_to_scan: vec!["rule-aws-001".to_string(), "rule-azure-999".to_string()],
        credentials: None,
    };
    let err = handler.post_licensed(&request).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Validation);
    assert!(err.message.contains("rule-azure-999"));
    assert!(!err.message.contains("rule-aws-001"));
}

#[test]
fn inactive_region_is_a_validation_error() {
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], Config::default(), true);
    let handler = JobHandler::new(&fixture.services);

    let mut request = standard_request("t1");
    request.target_regions = BTreeSet::from(["us-east-1".to_string()]);
    let err = handler.post_standard(&request).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Validation);
    assert!(err.message.contains("us-east-1"));
}

#[test]
fn unknown_region_is_a_validation_error() {
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], Config::default(), true);
    let handler = JobHandler::new(&fixture.services);

    let mut request = standard_request("t1");
    request.target_regions = BTreeSet::from(["westeurope".to_string()]);
    let err = handler.post_standard(&request).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Validation);
    assert!(err.message.contains("westeurope"));
}

#[test]
fn disallowed_cloud_is_forbidden() {
    let config = Config {
        allowed_clouds: BTreeSet::from([Cloud::Azure]),
        ..Config::default()
    };
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], config, true);
    let handler = JobHandler::new(&fixture.services);

    let err = handler.post_standard(&standard_request("t1")).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Forbidden);
}

#[test]
fn termination_flow() {
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], Config::default(), true);
    let handler = JobHandler::new(&fixture.services);
    let dto = handler.post_standard(&standard_request("t1")).unwrap();

    let request = TerminateJobRequest {
        job_id: dto.id.clone(),
        customer: Some("ACME".to_string()),
        tenants: BTreeSet::new(),
        user_id: "ops".to_string(),
    };
    handler.delete(&request).unwrap();

    let job = fixture.services.jobs.get(&dto.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.reason.as_deref().unwrap().contains("ops"));
    assert!(job.reason.as_deref().unwrap().contains("ACME"));
    assert!(!TenantSettingJobLock::new("t1", fixture.services.settings.as_ref()).is_locked());
    assert_eq!(*fixture.batch.terminated.lock().unwrap(), vec![dto.id.clone()]);

    // terminal jobs cannot be terminated again
    let err = handler.delete(&request).unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Validation);
}

#[test]
fn unknown_job_is_not_found() {
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], Config::default(), true);
    let handler = JobHandler::new(&fixture.services);
    let err = handler
        .delete(&TerminateJobRequest {
            job_id: "missing".to_string(),
            customer: None,
            tenants: BTreeSet::new(),
            user_id: "ops".to_string(),
        })
        .unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::NotFound);
}

#[test]
fn query_scopes_by_customer_and_tenant() {
    let fixture = fixture(
        vec![
            tenant("t1", Cloud::Aws, &["eu-west-1"]),
            tenant("t2", Cloud::Aws, &["eu-west-1"]),
        ],
        Config {
            allow_simultaneous_jobs: true,
            ..Config::default()
        },
        true,
    );
    let handler = JobHandler::new(&fixture.services);
    handler.post_standard(&standard_request("t1")).unwrap();
    handler.post_standard(&standard_request("t2")).unwrap();

    let all = handler.query(&QueryJobsRequest {
        customer: Some("ACME".to_string()),
        tenants: BTreeSet::new(),
        limit: None,
    });
    assert_eq!(all.len(), 2);
    // the customer field is dropped from customer-scoped listings
    assert!(all.iter().all(|dto| dto.customer_name.is_none()));

    let scoped = handler.query(&QueryJobsRequest {
        customer: None,
        tenants: BTreeSet::from(["t2".to_string()]),
        limit: None,
    });
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].tenant_name, "t2");
}

#[test]
fn scheduled_job_lifecycle() {
    let fixture = fixture(vec![tenant("t1", Cloud::Aws, &["eu-west-1"])], Config::default(), true);
    let handler = JobHandler::new(&fixture.services);

    let dto = handler
        .post_scheduled(&RegisterScheduledJobRequest {
            customer: Some("ACME".to_string()),
            tenant_name: "t1".to_string(),
            schedule: "rate(1 day)".to_string(),
            name: Some("nightly".to_string()),
            target_rulesets: BTreeSet::new(),
            target_regions: BTreeSet::new(),
        })
        .unwrap();
    assert_eq!(dto.name, "nightly");
    assert!(dto.enabled);

    let patched = handler
        .patch_scheduled(&PatchScheduledJobRequest {
            name: "nightly".to_string(),
            customer: Some("ACME".to_string()),
            tenants: BTreeSet::new(),
            enabled: Some(false),
            schedule: None,
        })
        .unwrap();
    assert!(!patched.enabled);

    handler
        .delete_scheduled(&QueryScheduledJobsRequest {
            customer: Some("ACME".to_string()),
            tenants: BTreeSet::new(),
            name: Some("nightly".to_string()),
        })
        .unwrap();
    assert!(
        handler
            .query_scheduled(&QueryScheduledJobsRequest {
                customer: Some("ACME".to_string()),
                tenants: BTreeSet::new(),
                name: None,
            })
            .is_empty()
    );
}
