use maplit::hashmap;
use sentinel_engine::clients::batch::RecordingBatchClient;
use sentinel_engine::config::Config;
use sentinel_engine::credentials::InstanceIdentity;
use sentinel_engine::errors::{EXIT_CODE_RECOVERABLE, EXIT_CODE_SUCCESS};
use sentinel_engine::executor::Executor;
use sentinel_engine::executor::environment::ExecutorEnv;
use sentinel_engine::io_models::envelope::{JobEnvelope, JobType};
use sentinel_engine::models::job::{BatchResults, Job};
use sentinel_engine::models::ruleset::Ruleset;
use sentinel_engine::models::tenant::{Application, Parent, ParentType, Tenant};
use sentinel_engine::models::{Cloud, JobStatus};
use sentinel_engine::object_storage::{InMemoryObjectStorage, ObjectStorage, gz_get_json};
use sentinel_engine::persistence::memory::*;
use sentinel_engine::policy::engine::DryRunEngine;
use sentinel_engine::services::{Services, ServicesBuilder};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

struct NoInstanceIdentity;

impl InstanceIdentity for NoInstanceIdentity {
    fn aws_account_id(&self) -> Option<String> {
        None
    }
    fn azure_subscription_id(&self) -> Option<String> {
        None
    }
}

fn tenant(with_access: bool) -> Tenant {
    let parent_map = if with_access {
        hashmap! {ParentType::CustodianAccess => "p-access".to_string()}
    } else {
        hashmap! {}
    };
    Tenant {
        name: "t1".to_string(),
        customer_name: "ACME".to_string(),
        cloud: Cloud::Aws,
        project: "123456789012".to_string(),
        active: true,
        regions: BTreeSet::from(["eu-west-1".to_string()]),
        parent_map,
        management_parent_id: None,
    }
}

fn access_entities() -> (Parent, Application) {
    let parent = Parent {
        id: "p-access".to_string(),
        customer_id: "ACME".to_string(),
        tenant_name: "t1".to_string(),
        type_: ParentType::CustodianAccess,
        application_id: "app-access".to_string(),
        is_deleted: false,
        meta: serde_json::Value::Null,
    };
    let application = Application {
        id: "app-access".to_string(),
        customer_id: "ACME".to_string(),
        secret: None,
        credentials: Some(json!({
            "AWS_ACCESS_KEY_ID": "AKIAFAKE",
            "AWS_SECRET_ACCESS_KEY": "secret",
        })),
        license_keys: Default::default(),
    };
    (parent, application)
}

fn services(with_access: bool, rulesets: Vec<Ruleset>, storage: Arc<InMemoryObjectStorage>) -> Services {
    let (parent, application) = access_entities();
    let config = Config {
        on_prem: true,
        ..Config::default()
    };
    ServicesBuilder::new(config)
        .tenants(Arc::new(InMemoryTenantStore::with([tenant(with_access)])))
        .parents(Arc::new(InMemoryParentStore::with([parent])))
        .applications(Arc::new(InMemoryApplicationStore::with([application])))
        .rulesets(Arc::new(InMemoryRulesetStore::with(rulesets)))
        .batch(Arc::new(RecordingBatchClient::default()))
        .instance_identity(Arc::new(NoInstanceIdentity))
        .object_storage(storage)
        .build()
}

fn standard_ruleset() -> Ruleset {
    Ruleset {
        id: "rs-1".to_string(),
        customer: "ACME".to_string(),
        name: "base".to_string(),
        version: "1".to_string(),
        cloud: Cloud::Aws,
        licensed: false,
        license_manager_id: None,
        source: "base-1.json".to_string(),
        active: true,
        event_driven: false,
        rules: vec![],
    }
}

fn event_driven_ruleset() -> Ruleset {
    Ruleset {
        id: "rs-ed".to_string(),
        customer: "ACME".to_string(),
        name: "_ED_AWS".to_string(),
        version: "1".to_string(),
        cloud: Cloud::Aws,
        licensed: false,
        license_manager_id: None,
        source: "ed-aws.json".to_string(),
        active: true,
        event_driven: true,
        rules: vec![],
    }
}

fn executor_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_executor"))
}

#[test]
fn standard_job_end_to_end() {
    let storage = Arc::new(InMemoryObjectStorage::default());
    storage
        .put_object(
            "rulesets",
            "base-1.json",
            serde_json::to_vec(&json!([
                {"name": "ec2-open", "resource": "ec2"},
                {"name": "buckets-public", "resource": "s3"},
            ]))
            .unwrap(),
        )
        .unwrap();
    let services = services(true, vec![standard_ruleset()], storage.clone());

    let job = Job {
        id: "job-1".to_string(),
        tenant_name: "t1".to_string(),
        customer_name: "ACME".to_string(),
        owner: "ops".to_string(),
        status: JobStatus::Submitted,
        submitted_at: chrono::Utc::now(),
        created_at: None,
        started_at: None,
        stopped_at: None,
        platform_id: None,
        rulesets: vec!["base:1".to_string()],
        rules_to_scan: vec![],
        reason: None,
        ttl_days: None,
    };
    services.jobs.save(&job);

    let envelope = JobEnvelope {
        tenant_name: "t1".to_string(),
        platform_id: None,
        job_id: Some("job-1".to_string()),
        job_type: JobType::Standard,
        batch_results_ids: vec![],
        target_regions: vec!["eu-west-1".to_string()],
        target_rulesets: vec![],
        licensed_rulesets: vec![],
        affected_licenses: vec![],
        credentials_key: None,
        submitted_at: chrono::Utc::now(),
        job_lifetime_min: 55,
        scheduled_job_name: None,
        aws_region: "us-east-1".to_string(),
    };
    let env = ExecutorEnv::from_map(&envelope.to_env()).unwrap();

    let engine = DryRunEngine;
    let executor = Executor {
        services: &services,
        engine: &engine,
        executor_bin: executor_bin(),
    };
    assert_eq!(executor.run(&env), EXIT_CODE_SUCCESS);

    let job = services.jobs.get("job-1").unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.stopped_at.is_some());

    // the latest state and the job report were persisted
    assert!(
        storage
            .get_object("reports", "t1/latest/shards/meta.json")
            .unwrap()
            .is_some()
    );
    let statistics = gz_get_json(storage.as_ref(), "statistics", "job-1.json.gz")
        .unwrap()
        .expect("statistics must be written");
    assert_eq!(statistics["tenant"], "t1");
    let per_rule = statistics["per_rule"].as_array().unwrap();
    assert!(!per_rule.is_empty());
    assert!(per_rule.iter().all(|r| r["status"] == "SUCCEEDED"));
    // the s3-backed policy ran once, in the global bucket
    assert!(
        per_rule
            .iter()
            .any(|r| r["rule"] == "buckets-public" && r["region"] == "global")
    );
    assert!(
        per_rule
            .iter()
            .all(|r| !(r["rule"] == "buckets-public" && r["region"] == "eu-west-1"))
    );
}

#[test]
fn event_driven_job_end_to_end() {
    let storage = Arc::new(InMemoryObjectStorage::default());
    storage
        .put_object(
            "rulesets",
            "ed-aws.json",
            serde_json::to_vec(&json!([
                {"name": "ed-rule", "resource": "ec2"},
                {"name": "unrelated-rule", "resource": "ec2"},
            ]))
            .unwrap(),
        )
        .unwrap();
    let services = services(true, vec![event_driven_ruleset()], storage.clone());

    let results = BatchResults {
        id: "br-1".to_string(),
        tenant_name: "t1".to_string(),
        customer_name: "ACME".to_string(),
        status: JobStatus::Submitted,
        regions_to_rules: BTreeMap::from([(
            "eu-west-1".to_string(),
            BTreeSet::from(["ed-rule".to_string()]),
        )]),
        credentials_key: None,
        submitted_at: chrono::Utc::now(),
        stopped_at: None,
        reason: None,
    };
    services.batch_results.save(&results);

    let envelope = JobEnvelope {
        tenant_name: "t1".to_string(),
        platform_id: None,
        job_id: None,
        job_type: JobType::EventDrivenMultiAccount,
        batch_results_ids: vec!["br-1".to_string()],
        target_regions: vec!["eu-west-1".to_string()],
        target_rulesets: vec![],
        licensed_rulesets: vec![],
        affected_licenses: vec![],
        credentials_key: None,
        submitted_at: chrono::Utc::now(),
        job_lifetime_min: 55,
        scheduled_job_name: None,
        aws_region: "us-east-1".to_string(),
    };
    let env = ExecutorEnv::from_map(&envelope.to_env()).unwrap();

    let engine = DryRunEngine;
    let executor = Executor {
        services: &services,
        engine: &engine,
        executor_bin: executor_bin(),
    };
    assert_eq!(executor.run(&env), EXIT_CODE_SUCCESS);

    let results = services.batch_results.get("br-1").unwrap();
    assert_eq!(results.status, JobStatus::Succeeded);
    assert!(results.stopped_at.is_some());

    // only the mapped rule ran
    let statistics = gz_get_json(storage.as_ref(), "statistics", "br-1.json.gz")
        .unwrap()
        .expect("statistics must be written");
    let per_rule = statistics["per_rule"].as_array().unwrap();
    assert!(per_rule.iter().any(|r| r["rule"] == "ed-rule"));
    assert!(per_rule.iter().all(|r| r["rule"] != "unrelated-rule"));
}

#[test]
fn event_driven_without_credentials_is_recoverable() {
    let storage = Arc::new(InMemoryObjectStorage::default());
    let services = services(false, vec![event_driven_ruleset()], storage);

    let results = BatchResults {
        id: "br-2".to_string(),
        tenant_name: "t1".to_string(),
        customer_name: "ACME".to_string(),
        status: JobStatus::Submitted,
        regions_to_rules: BTreeMap::new(),
        credentials_key: None,
        submitted_at: chrono::Utc::now(),
        stopped_at: None,
        reason: None,
    };
    services.batch_results.save(&results);

    let envelope = JobEnvelope {
        tenant_name: "t1".to_string(),
        platform_id: None,
        job_id: None,
        job_type: JobType::EventDrivenMultiAccount,
        batch_results_ids: vec!["br-2".to_string()],
        target_regions: vec![],
        target_rulesets: vec![],
        licensed_rulesets: vec![],
        affected_licenses: vec![],
        credentials_key: None,
        submitted_at: chrono::Utc::now(),
        job_lifetime_min: 55,
        scheduled_job_name: None,
        aws_region: "us-east-1".to_string(),
    };
    let env = ExecutorEnv::from_map(&envelope.to_env()).unwrap();

    let engine = DryRunEngine;
    let executor = Executor {
        services: &services,
        engine: &engine,
        executor_bin: executor_bin(),
    };
    assert_eq!(executor.run(&env), EXIT_CODE_RECOVERABLE);

    let results = services.batch_results.get("br-2").unwrap();
    assert_eq!(results.status, JobStatus::Failed);
    assert!(results.reason.is_some());
}
