/// Synthetic region bucket for policies that must run exactly once per job.
pub const GLOBAL_REGION: &str = "global";
/// The only scannable "region" for GCP tenants, individual regions cannot be
/// targeted there.
pub const MULTIREGION: &str = "multiregion";

pub const AWS_DEFAULT_REGION: &str = "us-east-1";

// Batch envelope environment variables. This set is the whole interface
// between the submission controller and the executor.
pub const ENV_TENANT_NAME: &str = "TENANT_NAME";
pub const ENV_PLATFORM_ID: &str = "PLATFORM_ID";
pub const ENV_JOB_ID: &str = "JOB_ID";
pub const ENV_JOB_TYPE: &str = "JOB_TYPE";
pub const ENV_BATCH_RESULTS_ID: &str = "BATCH_RESULTS_ID";
pub const ENV_BATCH_RESULTS_IDS: &str = "BATCH_RESULTS_IDS";
pub const ENV_TARGET_REGIONS: &str = "TARGET_REGIONS";
pub const ENV_TARGET_RULESETS: &str = "TARGET_RULESETS";
pub const ENV_LICENSED_RULESETS: &str = "LICENSED_RULESETS";
pub const ENV_AFFECTED_LICENSES: &str = "AFFECTED_LICENSES";
pub const ENV_CREDENTIALS_KEY: &str = "CREDENTIALS_KEY";
pub const ENV_SUBMITTED_AT: &str = "SUBMITTED_AT";
pub const ENV_JOB_LIFETIME_MIN: &str = "JOB_LIFETIME_MIN";
pub const ENV_SCHEDULED_JOB_NAME: &str = "SCHEDULED_JOB_NAME";
pub const ENV_AWS_REGION: &str = "AWS_REGION";

// Orchestrator process configuration.
pub const ENV_ALLOWED_CLOUDS: &str = "ALLOWED_CLOUDS_TO_SCAN";
pub const ENV_ALLOW_SIMULTANEOUS_JOBS: &str = "ALLOW_SIMULTANEOUS_JOBS_FOR_ONE_TENANT";
pub const ENV_ALLOW_MANAGEMENT_CREDENTIALS: &str = "ALLOW_MANAGEMENT_CREDENTIALS";
pub const ENV_SKIP_CLOUD_IDENTIFIER_VALIDATION: &str = "SKIP_CLOUD_IDENTIFIER_VALIDATION";
pub const ENV_LAST_SCAN_THRESHOLD_SECONDS: &str = "LAST_SCAN_THRESHOLD_SECONDS";
pub const ENV_JOBS_TIME_TO_LIVE_DAYS: &str = "JOBS_TIME_TO_LIVE_DAYS";
pub const ENV_BATCH_JOB_QUEUE: &str = "BATCH_JOB_QUEUE";
pub const ENV_BATCH_JOB_DEFINITION: &str = "BATCH_JOB_DEFINITION";
pub const ENV_REPORTS_BUCKET_NAME: &str = "REPORTS_BUCKET_NAME";
pub const ENV_STATISTICS_BUCKET_NAME: &str = "STATISTICS_BUCKET_NAME";
pub const ENV_RULESETS_BUCKET_NAME: &str = "RULESETS_BUCKET_NAME";
pub const ENV_ON_PREM: &str = "ON_PREM";
pub const ENV_LM_API_HOST: &str = "LM_ACCESS_DATA_HOST";
pub const ENV_LM_CLIENT_KEY: &str = "LM_CLIENT_KEY";
pub const ENV_VAULT_ADDR: &str = "VAULT_ADDR";

/// Vault KV2 mount the orchestrator keeps its secrets under.
pub const SECRETS_MOUNT: &str = "sentinel";

pub const DEFAULT_REPORTS_BUCKET_NAME: &str = "reports";
pub const DEFAULT_STATISTICS_BUCKET_NAME: &str = "statistics";
pub const DEFAULT_RULESETS_BUCKET_NAME: &str = "rulesets";
pub const DEFAULT_JOB_LIFETIME_MIN: i64 = 55;

// Cloud SDK credential variables exported around a scan.
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const AWS_DEFAULT_REGION_ENV: &str = "AWS_DEFAULT_REGION";
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const KUBECONFIG: &str = "KUBECONFIG";

/// Settings key holding the per-tenant / per-customer excluded rules.
pub const EXCLUDED_RULES_KEY: &str = "EXCLUDED_RULES";
/// Settings key prefix for the per-tenant job lock.
pub const JOB_LOCK_KEY: &str = "JOB_LOCK";

/// Reserved tag prepended to license-manager ruleset ids in the envelope.
pub const LICENSED_RULESET_TAG: &str = "0";

/// EKS bearer token prefix, per the aws-iam-authenticator token spec.
pub const EKS_TOKEN_PREFIX: &str = "k8s-aws-v1.";
pub const EKS_CLUSTER_NAME_HEADER: &str = "x-k8s-aws-id";
pub const EKS_TOKEN_EXPIRES_IN_SEC: i64 = 60;

// Per-cloud service error codes driving the runner state machine.
pub const AWS_ACCESS_DENIED_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "AuthorizationError",
    "OptInRequired",
];
pub const AWS_INVALID_CREDENTIALS_ERROR_CODES: &[&str] = &[
    "AuthFailure",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "ExpiredToken",
    "ExpiredTokenException",
];
pub const AZURE_INVALID_CREDENTIALS_ERROR_CODES: &[&str] = &[
    "InvalidAuthenticationTokenTenant",
    "AuthorizationFailed",
    "ClientAuthenticationError",
];
