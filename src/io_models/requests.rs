use derivative::Derivative;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Typed command structs, one per endpoint. The HTTP layer fills them from
/// the validated body; nothing here re-validates shape, only semantics.

#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
pub struct SubmitStandardJobRequest {
    pub customer: Option<String>,
    pub tenant_name: String,
    pub user_id: String,
    #[serde(default)]
    pub target_rulesets: BTreeSet<String>,
    #[serde(default)]
    pub target_regions: BTreeSet<String>,
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub credentials: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
pub struct SubmitLicensedJobRequest {
    pub customer: Option<String>,
    pub tenant_name: String,
    pub user_id: String,
    #[serde(default)]
    pub target_rulesets: BTreeSet<String>,
    #[serde(default)]
    pub target_regions: BTreeSet<String>,
    #[serde(default)]
    pub rules_to_scan: Vec<String>,
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub credentials: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
pub struct SubmitK8sJobRequest {
    pub customer: Option<String>,
    pub platform_id: String,
    pub user_id: String,
    #[serde(default)]
    pub target_rulesets: BTreeSet<String>,
    /// Optional long-lived bearer token staged to the secret store.
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryJobsRequest {
    pub customer: Option<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetJobRequest {
    pub job_id: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminateJobRequest {
    pub job_id: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterScheduledJobRequest {
    pub customer: Option<String>,
    pub tenant_name: String,
    pub schedule: String,
    pub name: Option<String>,
    #[serde(default)]
    pub target_rulesets: BTreeSet<String>,
    #[serde(default)]
    pub target_regions: BTreeSet<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryScheduledJobsRequest {
    pub customer: Option<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchScheduledJobRequest {
    pub name: String,
    pub customer: Option<String>,
    #[serde(default)]
    pub tenants: BTreeSet<String>,
    pub enabled: Option<bool>,
    pub schedule: Option<String>,
}
